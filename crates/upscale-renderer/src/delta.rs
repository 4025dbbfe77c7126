//! Image delta visualization.
//!
//! Writes a target-sized composite: the left half shows the upscaled image,
//! the right half the amplified absolute difference between the upscaled
//! image and a native target-resolution render of the same frame.

use ash::vk;
use upscale_common::Extent2D;

use crate::compute::{BracketedDispatch, ComputePass};
use crate::error::RendererResult;
use crate::targets::RenderTargets;
use crate::vulkan::descriptors::{BindingKind, DescriptorEntry, DescriptorPool, Sampler};
use crate::vulkan::pipeline::spirv;
use crate::vulkan::recorder::ImageTransition;
use crate::vulkan::{ConstantStream, VulkanContext};

const DELTA_BINDINGS: [BindingKind; 4] = [
    BindingKind::SampledImage,
    BindingKind::SampledImage,
    BindingKind::StorageImage,
    BindingKind::DynamicUniform,
];

/// Constants consumed by `image_delta.comp`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DeltaConstants {
    pub size: [u32; 2],
    pub amplifier: f32,
    /// First column showing the difference.
    pub split_x: u32,
}

impl DeltaConstants {
    pub fn new(extent: Extent2D, amplifier: f32) -> Self {
        Self {
            size: [extent.width, extent.height],
            amplifier,
            split_x: extent.width / 2,
        }
    }
}

/// Transitions around the delta dispatch.
pub fn delta_barriers(upscaled: vk::Image, reference: vk::Image, composite: vk::Image) -> Vec<ImageTransition> {
    use vk::ImageLayout as L;
    vec![
        ImageTransition::color(upscaled, L::GENERAL, L::GENERAL),
        ImageTransition::color(reference, L::COLOR_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
        ImageTransition::color(composite, L::GENERAL, L::GENERAL),
    ]
}

pub struct DeltaPass {
    pass: ComputePass,
    sampler: Sampler,
}

impl DeltaPass {
    pub unsafe fn new(ctx: &VulkanContext, pool: &DescriptorPool, frame_count: usize) -> RendererResult<Self> {
        Ok(Self {
            pass: ComputePass::new(ctx, pool, "image_delta", spirv::IMAGE_DELTA_COMP, &DELTA_BINDINGS, frame_count)?,
            sampler: Sampler::clamped(ctx, vk::Filter::NEAREST)?,
        })
    }

    pub unsafe fn prepare(
        &self,
        device: &ash::Device,
        frame_index: usize,
        constants: &mut ConstantStream,
        targets: &RenderTargets,
        extent: Extent2D,
        amplifier: f32,
    ) -> RendererResult<BracketedDispatch> {
        let entries = [
            DescriptorEntry::Sampled {
                view: targets.target.view,
                sampler: self.sampler.handle,
                layout: vk::ImageLayout::GENERAL,
            },
            DescriptorEntry::Sampled {
                view: targets.reference.color.view,
                sampler: self.sampler.handle,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
            DescriptorEntry::Storage { view: targets.composite.view },
            DescriptorEntry::DynamicUniform {
                buffer: constants.buffer(frame_index),
                range: std::mem::size_of::<DeltaConstants>() as vk::DeviceSize,
            },
        ];
        let offset = constants.upload(&DeltaConstants::new(extent, amplifier))?;
        let dispatch = self.pass.prepare(device, frame_index, &entries, &[offset], extent)?;

        Ok(BracketedDispatch {
            barriers: delta_barriers(
                targets.target.handle,
                targets.reference.color.handle,
                targets.composite.handle,
            ),
            dispatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_delta_constants_split_half() {
        let c = DeltaConstants::new(Extent2D::new(1920, 1080), 8.0);
        assert_eq!(c.size, [1920, 1080]);
        assert_eq!(c.split_x, 960);
        assert_eq!(c.amplifier, 8.0);
    }

    #[test]
    fn test_reference_read_as_shader_input() {
        let reference = vk::Image::from_raw(2);
        let barriers = delta_barriers(vk::Image::from_raw(1), reference, vk::Image::from_raw(3));
        let t = barriers.iter().find(|t| t.image == reference).unwrap();
        assert_eq!(t.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(barriers.iter().filter(|t| t.image != reference).all(|t| t.old_layout == t.new_layout));
    }
}
