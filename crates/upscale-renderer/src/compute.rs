//! Compute passes: a program plus one descriptor set per frame slot.

use ash::vk;
use upscale_common::Extent2D;

use crate::error::{RendererError, RendererResult};
use crate::vulkan::descriptors::{update_set, BindingKind, DescriptorEntry, DescriptorPool};
use crate::vulkan::recorder::{CommandRecorder, ImageTransition};
use crate::vulkan::{Program, VulkanContext};

/// Workgroup counts covering `extent` with groups of `group` threads.
///
/// Rounds up on each axis so edge pixels are always covered; Z is 1.
pub fn dispatch_dimensions(extent: Extent2D, group: [u32; 2]) -> [u32; 3] {
    [
        extent.width.div_ceil(group[0].max(1)),
        extent.height.div_ceil(group[1].max(1)),
        1,
    ]
}

/// Everything needed to record one bound dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeDispatch {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set: vk::DescriptorSet,
    pub dynamic_offsets: Vec<u32>,
    pub groups: [u32; 3],
}

impl ComputeDispatch {
    pub fn record(&self, rec: &mut impl CommandRecorder) {
        rec.bind_compute(self.pipeline, self.layout, self.set, &self.dynamic_offsets);
        rec.dispatch(self.groups);
    }
}

/// Record `dispatch` between `barriers` and their reversal, so every image
/// leaves in the layout it entered with.
pub fn record_bracketed(
    rec: &mut impl CommandRecorder,
    barriers: &[ImageTransition],
    dispatch: &ComputeDispatch,
) {
    rec.transition_images(barriers);
    dispatch.record(rec);
    let after: Vec<_> = barriers.iter().map(|t| t.reversed()).collect();
    rec.transition_images(&after);
}

/// A dispatch plus the transitions that bracket it.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketedDispatch {
    pub barriers: Vec<ImageTransition>,
    pub dispatch: ComputeDispatch,
}

impl BracketedDispatch {
    pub fn record(&self, rec: &mut impl CommandRecorder) {
        record_bracketed(rec, &self.barriers, &self.dispatch);
    }
}

/// A compute program and its per-frame descriptor sets.
pub struct ComputePass {
    pub program: Program,
    sets: Vec<vk::DescriptorSet>,
}

impl ComputePass {
    pub unsafe fn new(
        ctx: &VulkanContext,
        pool: &DescriptorPool,
        name: &'static str,
        spirv: &'static [u8],
        bindings: &[BindingKind],
        frame_count: usize,
    ) -> RendererResult<Self> {
        let program = Program::compute(ctx, name, spirv, bindings)?;
        let sets = pool.allocate(program.set_layout, frame_count)?;
        Ok(Self { program, sets })
    }

    /// Declared workgroup size.
    pub fn workgroup(&self) -> [u32; 2] {
        self.program.workgroup_xy().unwrap_or([1, 1])
    }

    /// Write this frame's descriptors and size the dispatch to cover `extent`.
    pub unsafe fn prepare(
        &self,
        device: &ash::Device,
        frame_index: usize,
        entries: &[DescriptorEntry],
        dynamic_offsets: &[u32],
        extent: Extent2D,
    ) -> RendererResult<ComputeDispatch> {
        let groups = dispatch_dimensions(extent, self.workgroup());
        self.prepare_with_groups(device, frame_index, entries, dynamic_offsets, groups)
    }

    /// Like [`prepare`](Self::prepare) with explicit workgroup counts.
    pub unsafe fn prepare_with_groups(
        &self,
        device: &ash::Device,
        frame_index: usize,
        entries: &[DescriptorEntry],
        dynamic_offsets: &[u32],
        groups: [u32; 3],
    ) -> RendererResult<ComputeDispatch> {
        if entries.len() != self.program.bindings.len()
            || dynamic_offsets.len() != self.program.dynamic_offset_count()
        {
            return Err(RendererError::Shader {
                name: self.program.name,
                reason: format!(
                    "{} descriptors and {} dynamic offsets supplied for {} bindings",
                    entries.len(),
                    dynamic_offsets.len(),
                    self.program.bindings.len()
                ),
            });
        }

        let set = self.sets[frame_index];
        update_set(device, set, entries);

        Ok(ComputeDispatch {
            pipeline: self.program.pipeline,
            layout: self.program.layout,
            set,
            dynamic_offsets: dynamic_offsets.to_vec(),
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::recorder::mock::{MockRecorder, Recorded};

    #[test]
    fn test_dispatch_dims_720p_to_1080p() {
        assert_eq!(dispatch_dimensions(Extent2D::new(1920, 1080), [8, 8]), [240, 135, 1]);
        assert_eq!(dispatch_dimensions(Extent2D::new(1920, 1085), [8, 8]), [240, 136, 1]);
    }

    #[test]
    fn test_dispatch_dims_minimal_cover() {
        for width in [1u32, 7, 8, 9, 540, 959, 960, 1080, 2160, 3840] {
            for group in [1u32, 3, 8, 16, 32] {
                let [d, _, z] = dispatch_dimensions(Extent2D::new(width, 1), [group, 1]);
                assert!(d * group >= width, "{} / {}", width, group);
                assert!((d - 1) * group < width, "{} / {}", width, group);
                assert_eq!(z, 1);
            }
        }
    }

    #[test]
    fn test_bracketed_restores_layouts() {
        let barrier = ImageTransition::color(
            vk::Image::null(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        let work = BracketedDispatch {
            barriers: vec![barrier],
            dispatch: ComputeDispatch {
                pipeline: vk::Pipeline::null(),
                layout: vk::PipelineLayout::null(),
                set: vk::DescriptorSet::null(),
                dynamic_offsets: Vec::new(),
                groups: [1, 1, 1],
            },
        };
        let mut rec = MockRecorder::default();
        work.record(&mut rec);
        assert_eq!(rec.commands.first(), Some(&Recorded::Transition(vec![barrier])));
        assert_eq!(rec.commands.last(), Some(&Recorded::Transition(vec![barrier.reversed()])));
        assert_eq!(rec.dispatches(), vec![[1, 1, 1]]);
    }

    #[test]
    fn test_dispatch_records_bind_then_dispatch() {
        let dispatch = ComputeDispatch {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set: vk::DescriptorSet::null(),
            dynamic_offsets: vec![512],
            groups: [4, 2, 1],
        };
        let mut rec = MockRecorder::default();
        dispatch.record(&mut rec);
        assert_eq!(
            rec.commands,
            vec![
                Recorded::BindCompute {
                    pipeline: vk::Pipeline::null(),
                    set: vk::DescriptorSet::null(),
                    offsets: vec![512],
                },
                Recorded::Dispatch([4, 2, 1]),
            ]
        );
    }
}
