//! GPU memory management using gpu-allocator.
//!
//! Buffers and images keep a handle to the shared allocator and release
//! their memory when dropped.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc, Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

use super::VulkanContext;
use crate::error::{RendererError, RendererResult};

/// GPU buffer with associated memory.
pub struct Buffer {
    pub handle: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    memory: MemoryManager,
}

impl Buffer {
    /// Host-visible bytes of the buffer, if it was allocated mappable.
    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.allocation.as_mut().and_then(|a| a.mapped_slice_mut())
    }

    /// Copy plain-old-data into the start of a mapped buffer.
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> RendererResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mapped = self.mapped_slice_mut()
            .ok_or_else(|| RendererError::Unsupported("buffer is not host mapped".to_string()))?;
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.memory.device.destroy_buffer(self.handle, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.memory.free(allocation);
        }
    }
}

/// GPU image with associated memory and a default view.
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub samples: vk::SampleCountFlags,
    pub aspect: vk::ImageAspectFlags,
    memory: MemoryManager,
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.memory.device.destroy_image_view(self.view, None);
            self.memory.device.destroy_image(self.handle, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.memory.free(allocation);
        }
    }
}

/// Parameters for a single-mip 2D image.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    /// Allows programmable sample locations on depth attachments.
    pub sample_locations_compatible: bool,
}

impl ImageDesc {
    pub fn new(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            samples: vk::SampleCountFlags::TYPE_1,
            sample_locations_compatible: false,
        }
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }
}

/// Memory manager wrapping gpu-allocator. Cheap to clone.
#[derive(Clone)]
pub struct MemoryManager {
    allocator: Arc<Mutex<Allocator>>,
    device: ash::Device,
}

impl MemoryManager {
    /// Create a new memory manager.
    pub unsafe fn new(ctx: &VulkanContext) -> RendererResult<Self> {
        let mut debug_settings = gpu_allocator::AllocatorDebugSettings::default();
        debug_settings.log_memory_information = cfg!(debug_assertions);
        debug_settings.log_leaks_on_shutdown = true;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: ctx.device.clone(),
            physical_device: ctx.physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }).map_err(|source| RendererError::Allocation { name: "allocator".to_string(), source })?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            device: ctx.device.clone(),
        })
    }

    fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::warn!("Failed to free GPU allocation: {}", e);
        }
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RendererResult<Allocation> {
        self.allocator.lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|source| RendererError::Allocation { name: name.to_string(), source })
    }

    /// Create a buffer with the specified usage and memory location.
    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> RendererResult<Buffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = self.device.create_buffer(&buffer_info, None)
            .map_err(RendererError::vk("vkCreateBuffer"))?;

        let requirements = self.device.get_buffer_memory_requirements(handle);
        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.device.destroy_buffer(handle, None);
                return Err(e);
            }
        };

        // From here the buffer owns both halves and cleans up on error.
        let buffer = Buffer {
            handle,
            allocation: Some(allocation),
            size,
            memory: self.clone(),
        };
        if let Some(allocation) = &buffer.allocation {
            self.device.bind_buffer_memory(handle, allocation.memory(), allocation.offset())
                .map_err(RendererError::vk("vkBindBufferMemory"))?;
        }

        Ok(buffer)
    }

    /// Create a staging buffer (CPU-visible, transfer source).
    pub unsafe fn create_staging_buffer(&self, size: vk::DeviceSize, name: &str) -> RendererResult<Buffer> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            name,
        )
    }

    /// Create a vertex buffer (GPU-only).
    pub unsafe fn create_vertex_buffer(&self, size: vk::DeviceSize, name: &str) -> RendererResult<Buffer> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )
    }

    /// Create an index buffer (GPU-only).
    pub unsafe fn create_index_buffer(&self, size: vk::DeviceSize, name: &str) -> RendererResult<Buffer> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )
    }

    /// Create a device-local 2D image and its view.
    pub unsafe fn create_image(&self, desc: &ImageDesc, name: &str) -> RendererResult<Image> {
        let flags = if desc.sample_locations_compatible {
            vk::ImageCreateFlags::SAMPLE_LOCATIONS_COMPATIBLE_DEPTH_EXT
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D { width: desc.extent.width, height: desc.extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = self.device.create_image(&image_info, None)
            .map_err(RendererError::vk("vkCreateImage"))?;

        let requirements = self.device.get_image_memory_requirements(handle);
        let allocation = match self.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.device.destroy_image(handle, None);
                return Err(e);
            }
        };

        let aspect = aspect_for_format(desc.format);
        let mut image = Image {
            handle,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            samples: desc.samples,
            aspect,
            memory: self.clone(),
        };

        if let Some(allocation) = &image.allocation {
            self.device.bind_image_memory(handle, allocation.memory(), allocation.offset())
                .map_err(RendererError::vk("vkBindImageMemory"))?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        image.view = self.device.create_image_view(&view_info, None)
            .map_err(RendererError::vk("vkCreateImageView"))?;

        Ok(image)
    }
}

/// Image aspect implied by a format.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::R16G16B16A16_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
        assert!(aspect_for_format(vk::Format::D24_UNORM_S8_UINT)
            .contains(vk::ImageAspectFlags::STENCIL));
    }

    #[test]
    fn test_image_desc_defaults_single_sample() {
        let desc = ImageDesc::new(
            vk::Extent2D { width: 960, height: 540 },
            vk::Format::R16G16_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        );
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc.samples(vk::SampleCountFlags::TYPE_2).samples, vk::SampleCountFlags::TYPE_2);
    }
}
