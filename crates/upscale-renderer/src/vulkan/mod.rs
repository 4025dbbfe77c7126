//! Vulkan 1.3 backend: device bootstrap, resource wrappers and the
//! per-frame streaming/timing helpers the upscale pipeline is built on.

pub mod context;
pub mod surface;
pub mod swapchain;
pub mod memory;
pub mod commands;
pub mod recorder;
pub mod descriptors;
pub mod pipeline;
pub mod timestamps;
pub mod constant_stream;

pub use context::VulkanContext;
pub use surface::VulkanSurface;
pub use swapchain::Swapchain;
pub use memory::{Buffer, Image, MemoryManager};
pub use commands::{CommandManager, VkRecorder};
pub use recorder::{CommandRecorder, ImageTransition};
pub use descriptors::{DescriptorPool, Sampler};
pub use pipeline::{Program, ProgramKind};
pub use timestamps::{GpuTimers, PerFrameTimerData, TimerTag};
pub use constant_stream::{ConstantStream, DynamicRing};

use ash::vk;
use std::ffi::CStr;

/// Required Vulkan 1.3 features for the renderer.
pub const REQUIRED_VK_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

/// Application name for Vulkan instance.
pub const APP_NAME: &CStr = c"Upscale Demo";

/// Engine name for Vulkan instance.
pub const ENGINE_NAME: &CStr = c"Upscale Renderer";

/// Engine version.
pub const ENGINE_VERSION: u32 = vk::make_api_version(0, 1, 0, 0);

/// Full single-mip, single-layer color subresource.
pub const COLOR_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Convert a renderer extent into a Vulkan extent.
pub fn vk_extent(extent: upscale_common::Extent2D) -> vk::Extent2D {
    vk::Extent2D { width: extent.width, height: extent.height }
}
