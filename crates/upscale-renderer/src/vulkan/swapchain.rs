//! Vulkan swapchain and frame-in-flight synchronization.
//!
//! The swapchain images are only ever blit targets; the renderer composes
//! into its own present image and copies it over at the end of the frame.

use ash::vk;

use super::{VulkanContext, VulkanSurface};
use crate::error::{RendererError, RendererResult};

/// Per-frame synchronization primitives.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Result of acquiring or presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    Ready,
    /// The surface changed and the swapchain must be rebuilt.
    OutOfDate,
}

/// Vulkan swapchain with per-frame synchronization.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub frame_sync: Vec<FrameSync>,
    pub current_frame: usize,
    pub image_index: u32,
    loader: ash::khr::swapchain::Device,
    device: ash::Device,
}

impl Swapchain {
    /// Create a swapchain with `frames_in_flight` sets of sync objects.
    pub unsafe fn new(
        ctx: &VulkanContext,
        surface: &VulkanSurface,
        width: u32,
        height: u32,
        frames_in_flight: usize,
    ) -> RendererResult<Self> {
        let mut swapchain = Self {
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: surface.format.format,
            extent: vk::Extent2D { width, height },
            frame_sync: Vec::with_capacity(frames_in_flight),
            current_frame: 0,
            image_index: 0,
            loader: ctx.swapchain_loader.clone(),
            device: ctx.device.clone(),
        };

        // Create synchronization objects
        swapchain.create_sync_objects(frames_in_flight)?;

        // Create swapchain
        swapchain.build(surface, width, height, frames_in_flight as u32)?;

        log::info!(
            "Swapchain {}x{} {:?}, {} images, {} frames in flight",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format,
            swapchain.images.len(),
            frames_in_flight
        );

        Ok(swapchain)
    }

    /// (Re)create the swapchain handle, retiring any previous one.
    unsafe fn build(
        &mut self,
        surface: &VulkanSurface,
        width: u32,
        height: u32,
        frames_in_flight: u32,
    ) -> RendererResult<()> {
        let extent = surface.get_extent(width, height);

        // Determine image count (at least one per frame in flight)
        let min_images = surface.capabilities.min_image_count;
        let max_images = if surface.capabilities.max_image_count == 0 {
            u32::MAX
        } else {
            surface.capabilities.max_image_count
        };
        let image_count = (min_images + 1).max(frames_in_flight).min(max_images);

        // Create swapchain with the old one as base
        let old_swapchain = self.handle;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface.format.format)
            .image_color_space(surface.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(surface.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = self.loader
            .create_swapchain(&create_info, None)
            .map_err(RendererError::vk("vkCreateSwapchainKHR"))?;

        // Destroy old swapchain if provided
        if old_swapchain != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(old_swapchain, None);
        }
        self.handle = handle;

        // Get swapchain images
        self.images = self.loader
            .get_swapchain_images(handle)
            .map_err(RendererError::vk("vkGetSwapchainImagesKHR"))?;
        self.format = surface.format.format;
        self.extent = extent;

        Ok(())
    }

    /// Create synchronization objects for each frame in flight.
    unsafe fn create_sync_objects(&mut self, frames_in_flight: usize) -> RendererResult<()> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default()
            .flags(vk::FenceCreateFlags::SIGNALED);

        for _ in 0..frames_in_flight {
            let mut sync = FrameSync {
                image_available: vk::Semaphore::null(),
                render_finished: vk::Semaphore::null(),
                in_flight: vk::Fence::null(),
            };
            let result = (|| -> RendererResult<()> {
                sync.image_available = self.device.create_semaphore(&semaphore_info, None)
                    .map_err(RendererError::vk("vkCreateSemaphore"))?;
                sync.render_finished = self.device.create_semaphore(&semaphore_info, None)
                    .map_err(RendererError::vk("vkCreateSemaphore"))?;
                sync.in_flight = self.device.create_fence(&fence_info, None)
                    .map_err(RendererError::vk("vkCreateFence"))?;
                Ok(())
            })();
            self.frame_sync.push(sync);
            result?;
        }

        Ok(())
    }

    /// Number of frames the CPU may record ahead.
    pub fn frames_in_flight(&self) -> usize {
        self.frame_sync.len()
    }

    /// Wait for the current frame slot's previous submission to finish.
    pub unsafe fn wait_for_frame(&self) -> RendererResult<()> {
        let sync = &self.frame_sync[self.current_frame];
        self.device.wait_for_fences(&[sync.in_flight], true, u64::MAX)
            .map_err(RendererError::vk("vkWaitForFences"))
    }

    /// Acquire the next swapchain image for the current frame slot.
    pub unsafe fn acquire_next_image(&mut self) -> RendererResult<SwapchainStatus> {
        let sync = &self.frame_sync[self.current_frame];

        // Acquire next image
        let result = self.loader.acquire_next_image(
            self.handle,
            u64::MAX,
            sync.image_available,
            vk::Fence::null(),
        );

        match result {
            Ok((index, false)) => {
                self.image_index = index;
                Ok(SwapchainStatus::Ready)
            }
            Ok((index, true)) => {
                // Suboptimal but still usable this frame.
                self.image_index = index;
                Ok(SwapchainStatus::Ready)
            }
            // Swapchain needs recreation
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
            Err(e) => Err(RendererError::Vulkan { what: "vkAcquireNextImageKHR", result: e }),
        }
    }

    /// Present the current image and advance to the next frame slot.
    pub unsafe fn present(&mut self, ctx: &VulkanContext) -> RendererResult<SwapchainStatus> {
        let sync = &self.frame_sync[self.current_frame];

        let swapchains = [self.handle];
        let image_indices = [self.image_index];
        let wait_semaphores = [sync.render_finished];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = self.loader.queue_present(ctx.present_queue, &present_info);

        // Advance to next frame
        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();

        match result {
            Ok(false) => Ok(SwapchainStatus::Ready),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
            Err(e) => Err(RendererError::Vulkan { what: "vkQueuePresentKHR", result: e }),
        }
    }

    /// Get the current frame's synchronization primitives.
    pub fn current_sync(&self) -> &FrameSync {
        &self.frame_sync[self.current_frame]
    }

    /// Reset the current frame's fence (call before submitting commands).
    pub unsafe fn reset_fence(&self) -> RendererResult<()> {
        let sync = &self.frame_sync[self.current_frame];
        self.device.reset_fences(&[sync.in_flight])
            .map_err(RendererError::vk("vkResetFences"))
    }

    /// Get the current swapchain image.
    pub fn current_image(&self) -> vk::Image {
        self.images[self.image_index as usize]
    }

    /// Recreate the swapchain (e.g., after window resize).
    pub unsafe fn recreate(
        &mut self,
        ctx: &VulkanContext,
        surface: &mut VulkanSurface,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        ctx.wait_idle();
        surface.refresh_capabilities(ctx)?;

        // Keep sync objects, rebuild the rest
        let frames = self.frame_sync.len() as u32;
        self.build(surface, width, height, frames)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            for sync in &self.frame_sync {
                self.device.destroy_semaphore(sync.image_available, None);
                self.device.destroy_semaphore(sync.render_finished, None);
                self.device.destroy_fence(sync.in_flight, None);
            }

            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}
