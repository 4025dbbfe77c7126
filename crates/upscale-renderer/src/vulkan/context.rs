//! Vulkan context: instance, physical device, logical device, and queues.

use ash::{vk, Entry, Instance, Device};
use ash::ext::sample_locations;
use ash::khr::{surface, swapchain};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use super::{APP_NAME, ENGINE_NAME, ENGINE_VERSION, REQUIRED_VK_VERSION};
use crate::error::{RendererError, RendererResult};

/// Programmable sample location support of the selected physical device.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleLocationCapabilities {
    /// VK_EXT_sample_locations is available and accepts 2 samples per pixel.
    pub supported: bool,
    pub sample_counts: vk::SampleCountFlags,
    pub max_grid_size: vk::Extent2D,
    pub variable_sample_locations: bool,
}

/// Queue family indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }
}

/// Main Vulkan context holding all core Vulkan objects.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub queue_families: QueueFamilyIndices,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    // Extension loaders
    pub surface_loader: surface::Instance,
    pub swapchain_loader: swapchain::Device,
    pub sample_locations_loader: Option<sample_locations::Device>,

    // Capabilities
    pub sample_locations: SampleLocationCapabilities,
    pub device_properties: vk::PhysicalDeviceProperties,
    pub timestamp_valid_bits: u32,

    // Debug messenger (only in debug builds)
    #[cfg(debug_assertions)]
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    #[cfg(debug_assertions)]
    debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
}

impl VulkanContext {
    /// Create a new Vulkan context.
    ///
    /// # Arguments
    /// * `display_handle` - Raw display handle used to pick surface extensions
    /// * `enable_validation` - Whether to enable validation layers
    pub unsafe fn new(
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> RendererResult<Self> {
        // Load Vulkan entry point
        let entry = Entry::linked();

        // Check Vulkan version
        let api_version = entry.try_enumerate_instance_version()
            .map_err(RendererError::vk("vkEnumerateInstanceVersion"))?
            .unwrap_or(vk::API_VERSION_1_0);

        if api_version < REQUIRED_VK_VERSION {
            return Err(RendererError::Unsupported(format!(
                "Vulkan 1.3 required, but only {}.{}.{} available",
                vk::api_version_major(api_version),
                vk::api_version_minor(api_version),
                vk::api_version_patch(api_version)
            )));
        }

        // Create instance
        let instance = Self::create_instance(&entry, display_handle, enable_validation)?;

        // Setup debug messenger in debug builds
        #[cfg(debug_assertions)]
        let (debug_utils_loader, debug_messenger) = if enable_validation {
            Self::setup_debug_messenger(&entry, &instance)?
        } else {
            (None, None)
        };

        // Create surface loader
        let surface_loader = surface::Instance::new(&entry, &instance);

        // Select physical device
        let (physical_device, queue_families) = Self::pick_physical_device(&instance)?;

        // Get device properties
        let device_properties = instance.get_physical_device_properties(physical_device);
        let graphics_family = queue_families.graphics
            .ok_or_else(|| RendererError::Unsupported("No graphics queue family".to_string()))?;
        let timestamp_valid_bits = instance
            .get_physical_device_queue_family_properties(physical_device)
            [graphics_family as usize]
            .timestamp_valid_bits;

        // Check optional sample locations support
        let sample_locations = Self::check_sample_location_support(&instance, physical_device);
        if sample_locations.supported {
            log::info!(
                "Programmable sample locations: counts {:?}, grid {}x{}",
                sample_locations.sample_counts,
                sample_locations.max_grid_size.width,
                sample_locations.max_grid_size.height
            );
        } else {
            log::warn!("VK_EXT_sample_locations unavailable, checkerboard falls back to viewport jitter");
        }

        // Create logical device
        let (device, graphics_queue, present_queue) = Self::create_logical_device(
            &instance,
            physical_device,
            &queue_families,
            sample_locations.supported,
        )?;

        // Create extension loaders
        let swapchain_loader = swapchain::Device::new(&instance, &device);
        let sample_locations_loader = sample_locations.supported
            .then(|| sample_locations::Device::new(&instance, &device));

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            queue_families,
            graphics_queue,
            present_queue,
            surface_loader,
            swapchain_loader,
            sample_locations_loader,
            sample_locations,
            device_properties,
            timestamp_valid_bits,
            #[cfg(debug_assertions)]
            debug_messenger,
            #[cfg(debug_assertions)]
            debug_utils_loader,
        })
    }

    /// Create Vulkan instance with required extensions.
    unsafe fn create_instance(
        entry: &Entry,
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> RendererResult<Instance> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(ENGINE_VERSION)
            .api_version(REQUIRED_VK_VERSION);

        // Get required surface extensions
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .map_err(RendererError::vk("enumerate surface extensions"))?
            .to_vec();

        // Add debug utils extension in debug builds
        #[cfg(debug_assertions)]
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        // Validation layers
        let layer_names: Vec<CString> = if enable_validation {
            vec![CString::from(c"VK_LAYER_KHRONOS_validation")]
        } else {
            vec![]
        };
        let layer_name_ptrs: Vec<*const c_char> = layer_names.iter()
            .map(|n| n.as_ptr())
            .collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);

        entry.create_instance(&create_info, None)
            .map_err(RendererError::vk("vkCreateInstance"))
    }

    /// Setup debug messenger for validation layers.
    #[cfg(debug_assertions)]
    unsafe fn setup_debug_messenger(
        entry: &Entry,
        instance: &Instance,
    ) -> RendererResult<(Option<ash::ext::debug_utils::Instance>, Option<vk::DebugUtilsMessengerEXT>)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR |
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL |
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION |
                vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = debug_utils
            .create_debug_utils_messenger(&create_info, None)
            .map_err(RendererError::vk("vkCreateDebugUtilsMessengerEXT"))?;

        Ok((Some(debug_utils), Some(messenger)))
    }

    /// Select the best physical device.
    unsafe fn pick_physical_device(
        instance: &Instance,
    ) -> RendererResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = instance.enumerate_physical_devices()
            .map_err(RendererError::vk("vkEnumeratePhysicalDevices"))?;

        // Score and sort devices
        let mut scored_devices: Vec<_> = devices.iter()
            .filter_map(|&device| {
                let score = Self::rate_device(instance, device);
                (score > 0).then_some((device, score))
            })
            .collect();

        scored_devices.sort_by(|a, b| b.1.cmp(&a.1));

        let physical_device = scored_devices.first()
            .map(|(device, _)| *device)
            .ok_or_else(|| RendererError::Unsupported("No suitable GPU found".to_string()))?;
        let queue_families = Self::find_queue_families(instance, physical_device);

        // Log selected device
        let props = instance.get_physical_device_properties(physical_device);
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
        log::info!(
            "Selected GPU: {} (timestamp period {} ns, min UBO alignment {})",
            name,
            props.limits.timestamp_period,
            props.limits.min_uniform_buffer_offset_alignment
        );

        Ok((physical_device, queue_families))
    }

    /// Rate a physical device (higher is better).
    unsafe fn rate_device(instance: &Instance, device: vk::PhysicalDevice) -> u32 {
        let props = instance.get_physical_device_properties(device);

        // Must support Vulkan 1.3
        if props.api_version < REQUIRED_VK_VERSION {
            return 0;
        }

        // Graphics and compute on one queue, with timestamps.
        let queue_families = Self::find_queue_families(instance, device);
        if !queue_families.is_complete() {
            return 0;
        }

        let mut score = 1u32;

        // Prefer discrete GPU
        if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 10000;
        } else if props.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 1000;
        }

        // Bonus for programmable sample locations
        if Self::check_sample_location_support(instance, device).supported {
            score += 500;
        }

        // Add VRAM size to score
        let memory_props = instance.get_physical_device_memory_properties(device);
        for heap in &memory_props.memory_heaps[..memory_props.memory_heap_count as usize] {
            if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
                score += (heap.size / (1024 * 1024)) as u32;
            }
        }

        score
    }

    /// Find a queue family with graphics, compute and timestamp support.
    ///
    /// Presentation is assumed to share the graphics family.
    unsafe fn find_queue_families(instance: &Instance, device: vk::PhysicalDevice) -> QueueFamilyIndices {
        let queue_families = instance.get_physical_device_queue_family_properties(device);

        let mut indices = QueueFamilyIndices::default();
        for (i, family) in queue_families.iter().enumerate() {
            let flags = family.queue_flags;
            if flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                && family.timestamp_valid_bits > 0
            {
                indices.graphics = Some(i as u32);
                indices.present = Some(i as u32);
                break;
            }
        }

        indices
    }

    /// Check VK_EXT_sample_locations support for 2x checkerboard fields.
    unsafe fn check_sample_location_support(
        instance: &Instance,
        device: vk::PhysicalDevice,
    ) -> SampleLocationCapabilities {
        let extensions = match instance.enumerate_device_extension_properties(device) {
            Ok(ext) => ext,
            Err(_) => return SampleLocationCapabilities::default(),
        };

        // Check for the extension
        let has_extension = extensions.iter().any(|e| {
            CStr::from_ptr(e.extension_name.as_ptr()) == sample_locations::NAME
        });
        if !has_extension {
            return SampleLocationCapabilities::default();
        }

        // Query sample location properties
        let mut sl_props = vk::PhysicalDeviceSampleLocationsPropertiesEXT::default();
        let mut props2 = vk::PhysicalDeviceProperties2::default()
            .push_next(&mut sl_props);
        instance.get_physical_device_properties2(device, &mut props2);

        SampleLocationCapabilities {
            supported: sl_props.sample_location_sample_counts.contains(vk::SampleCountFlags::TYPE_2),
            sample_counts: sl_props.sample_location_sample_counts,
            max_grid_size: sl_props.max_sample_location_grid_size,
            variable_sample_locations: sl_props.variable_sample_locations == vk::TRUE,
        }
    }

    /// Create logical device with required features and extensions.
    unsafe fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilyIndices,
        enable_sample_locations: bool,
    ) -> RendererResult<(Device, vk::Queue, vk::Queue)> {
        let graphics_family = queue_families.graphics
            .ok_or_else(|| RendererError::Unsupported("No graphics queue family".to_string()))?;
        let present_family = queue_families.present.unwrap_or(graphics_family);

        // Collect unique queue families
        let queue_priorities = [1.0f32];
        let mut unique_families = vec![graphics_family];
        if present_family != graphics_family {
            unique_families.push(present_family);
        }
        let queue_create_infos: Vec<_> = unique_families.iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        // Device extensions
        let mut extensions: Vec<*const c_char> = vec![swapchain::NAME.as_ptr()];
        if enable_sample_locations {
            extensions.push(sample_locations::NAME.as_ptr());
        }

        // Vulkan 1.3 features
        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true);

        // Checkerboard fields shade each sample separately.
        let core_features = vk::PhysicalDeviceFeatures::default()
            .sample_rate_shading(true);

        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(core_features)
            .push_next(&mut vulkan_13_features);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features2);

        let device = instance.create_device(physical_device, &create_info, None)
            .map_err(RendererError::vk("vkCreateDevice"))?;

        // Get queues
        let graphics_queue = device.get_device_queue(graphics_family, 0);
        let present_queue = device.get_device_queue(present_family, 0);

        Ok((device, graphics_queue, present_queue))
    }

    /// Minimum alignment of dynamic uniform buffer offsets.
    pub fn min_uniform_buffer_offset_alignment(&self) -> u64 {
        self.device_properties.limits.min_uniform_buffer_offset_alignment
    }

    /// Nanoseconds per timestamp tick.
    pub fn timestamp_period(&self) -> f32 {
        self.device_properties.limits.timestamp_period
    }

    /// Wait for all device operations to complete.
    pub fn wait_idle(&self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.wait_idle();

            #[cfg(debug_assertions)]
            if let (Some(loader), Some(messenger)) = (&self.debug_utils_loader, self.debug_messenger) {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers.
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[VK] {}", message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[VK] {}", message);
    }

    vk::FALSE
}
