//! Vulkan surface creation from window handles.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use super::VulkanContext;
use crate::error::{RendererError, RendererResult};

/// Wrapper around a Vulkan surface.
pub struct VulkanSurface {
    pub handle: vk::SurfaceKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    loader: ash::khr::surface::Instance,
}

impl VulkanSurface {
    /// Create a new Vulkan surface from window handles.
    ///
    /// # Safety
    /// The window handles must be valid and outlive the surface.
    pub unsafe fn new(
        ctx: &VulkanContext,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> RendererResult<Self> {
        let handle = ash_window::create_surface(
            &ctx.entry,
            &ctx.instance,
            display_handle,
            window_handle,
            None,
        ).map_err(RendererError::vk("vkCreateSurfaceKHR"))?;

        let mut surface = Self {
            handle,
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            loader: ctx.surface_loader.clone(),
        };

        // Graphics queue must be able to present
        let graphics_family = ctx.queue_families.graphics.unwrap_or(0);
        let supported = ctx.surface_loader
            .get_physical_device_surface_support(ctx.physical_device, graphics_family, handle)
            .map_err(RendererError::vk("vkGetPhysicalDeviceSurfaceSupportKHR"))?;
        if !supported {
            return Err(RendererError::Unsupported(
                "graphics queue cannot present to this window".to_string(),
            ));
        }

        // Query surface capabilities
        surface.refresh_capabilities(ctx)?;

        // Choose surface format (prefer SRGB)
        let formats = ctx.surface_loader
            .get_physical_device_surface_formats(ctx.physical_device, handle)
            .map_err(RendererError::vk("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
        surface.format = Self::choose_surface_format(&formats);

        // Choose present mode (fifo for vsync)
        let present_modes = ctx.surface_loader
            .get_physical_device_surface_present_modes(ctx.physical_device, handle)
            .map_err(RendererError::vk("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;
        surface.present_mode = Self::choose_present_mode(&present_modes, true);

        Ok(surface)
    }

    /// Create a surface from a winit window.
    pub unsafe fn from_winit(
        ctx: &VulkanContext,
        window: &winit::window::Window,
    ) -> RendererResult<Self> {
        let display_handle = window.display_handle()
            .map_err(|e| RendererError::Window(e.to_string()))?
            .as_raw();
        let window_handle = window.window_handle()
            .map_err(|e| RendererError::Window(e.to_string()))?
            .as_raw();

        Self::new(ctx, display_handle, window_handle)
    }

    /// Choose the best surface format.
    fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
        // Prefer SRGB B8G8R8A8
        for format in formats {
            if format.format == vk::Format::B8G8R8A8_SRGB &&
               format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR {
                return *format;
            }
        }

        // Fallback to UNORM B8G8R8A8
        for format in formats {
            if format.format == vk::Format::B8G8R8A8_UNORM {
                return *format;
            }
        }

        // Just use the first available
        formats.first().copied().unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
    }

    /// Choose the best present mode.
    fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
        if vsync {
            // FIFO is guaranteed to be available
            return vk::PresentModeKHR::FIFO;
        }

        // Prefer mailbox (low latency)
        if modes.contains(&vk::PresentModeKHR::MAILBOX) {
            return vk::PresentModeKHR::MAILBOX;
        }

        // Immediate (no vsync, may tear)
        if modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
            return vk::PresentModeKHR::IMMEDIATE;
        }

        // Fallback to FIFO
        vk::PresentModeKHR::FIFO
    }

    /// Refresh surface capabilities (e.g., after window resize).
    pub unsafe fn refresh_capabilities(&mut self, ctx: &VulkanContext) -> RendererResult<()> {
        self.capabilities = ctx.surface_loader
            .get_physical_device_surface_capabilities(ctx.physical_device, self.handle)
            .map_err(RendererError::vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        Ok(())
    }

    /// Get the current extent, clamped to surface capabilities.
    pub fn get_extent(&self, desired_width: u32, desired_height: u32) -> vk::Extent2D {
        clamp_extent(&self.capabilities, desired_width, desired_height)
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

/// Surface extent: the fixed current extent if defined, else the desired
/// size clamped to the supported range.
fn clamp_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        // The surface size is defined
        capabilities.current_extent
    } else {
        // Clamp to min/max
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_srgb_bgra() {
        let formats = [
            vk::SurfaceFormatKHR { format: vk::Format::R8G8B8A8_UNORM, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR },
            vk::SurfaceFormatKHR { format: vk::Format::B8G8R8A8_SRGB, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR },
        ];
        assert_eq!(VulkanSurface::choose_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(VulkanSurface::choose_surface_format(&formats[..1]).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_extent_clamped_when_undefined() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 2560, height: 1600 },
            ..Default::default()
        };
        let extent = clamp_extent(&capabilities, 3840, 1080);
        assert_eq!((extent.width, extent.height), (2560, 1080));
    }
}
