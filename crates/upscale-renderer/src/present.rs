//! Scale the composite to present resolution and hand it to the swapchain.

use ash::vk;
use upscale_common::Extent2D;

use crate::compute::{BracketedDispatch, ComputePass};
use crate::error::RendererResult;
use crate::targets::RenderTargets;
use crate::upscale::{ScaledCopyConstants, SPATIAL_BINDINGS};
use crate::vulkan::descriptors::{DescriptorEntry, DescriptorPool, Sampler};
use crate::vulkan::pipeline::spirv;
use crate::vulkan::recorder::{CommandRecorder, ImageTransition};
use crate::vulkan::{ConstantStream, VkRecorder, VulkanContext};

/// Transitions before and after blitting the present image into a
/// swapchain image.
pub fn blit_transitions(present: vk::Image, swapchain: vk::Image) -> ([ImageTransition; 2], [ImageTransition; 2]) {
    use vk::ImageLayout as L;
    let before = [
        ImageTransition::color(present, L::GENERAL, L::TRANSFER_SRC_OPTIMAL),
        ImageTransition::color(swapchain, L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
    ];
    let after = [
        ImageTransition::color(present, L::TRANSFER_SRC_OPTIMAL, L::GENERAL),
        ImageTransition::color(swapchain, L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR),
    ];
    (before, after)
}

pub struct PresentCopy {
    pass: ComputePass,
    sampler: Sampler,
}

impl PresentCopy {
    pub unsafe fn new(ctx: &VulkanContext, pool: &DescriptorPool, frame_count: usize) -> RendererResult<Self> {
        Ok(Self {
            pass: ComputePass::new(
                ctx, pool, "present_copy", spirv::PRESENT_COPY_COMP, &SPATIAL_BINDINGS, frame_count,
            )?,
            sampler: Sampler::clamped(ctx, vk::Filter::LINEAR)?,
        })
    }

    /// Scaled copy of the composite into the present image.
    pub unsafe fn prepare(
        &self,
        device: &ash::Device,
        frame_index: usize,
        constants: &mut ConstantStream,
        targets: &RenderTargets,
        src: Extent2D,
        dst: Extent2D,
    ) -> RendererResult<BracketedDispatch> {
        use vk::ImageLayout as L;
        let entries = [
            DescriptorEntry::Sampled {
                view: targets.composite.view,
                sampler: self.sampler.handle,
                layout: L::GENERAL,
            },
            DescriptorEntry::Storage { view: targets.present.view },
            DescriptorEntry::DynamicUniform {
                buffer: constants.buffer(frame_index),
                range: std::mem::size_of::<ScaledCopyConstants>() as vk::DeviceSize,
            },
        ];
        let offset = constants.upload(&ScaledCopyConstants::new(src, dst))?;
        let dispatch = self.pass.prepare(device, frame_index, &entries, &[offset], dst)?;

        Ok(BracketedDispatch {
            barriers: vec![
                ImageTransition::color(targets.composite.handle, L::GENERAL, L::GENERAL),
                ImageTransition::color(targets.present.handle, L::GENERAL, L::GENERAL),
            ],
            dispatch,
        })
    }
}

/// Blit the present image into `swapchain_image` and leave it ready to present.
pub unsafe fn record_present_blit(
    rec: &mut VkRecorder<'_>,
    present: vk::Image,
    present_extent: vk::Extent2D,
    swapchain_image: vk::Image,
    swapchain_extent: vk::Extent2D,
) {
    let (before, after) = blit_transitions(present, swapchain_image);
    rec.transition_images(&before);
    rec.blit_image(present, present_extent, swapchain_image, swapchain_extent);
    rec.transition_images(&after);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_blit_leaves_present_image_general() {
        let present = vk::Image::from_raw(1);
        let swapchain = vk::Image::from_raw(2);
        let (before, after) = blit_transitions(present, swapchain);

        assert_eq!(before[0].old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(after[0], before[0].reversed());
        assert_eq!(before[1].old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(after[1].old_layout, before[1].new_layout);
        assert_eq!(after[1].new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }
}
