//! Upscale technique dispatcher.
//!
//! Brings the internal-resolution image up to the target image with the
//! active technique. Every technique is recorded the same way: the
//! `UpscaleInternal` timer opens, the source images move from attachment
//! to shader-read layout, the compute dispatch runs, the layouts are put
//! back and the timer closes. Only the program, its constants and the
//! dispatch size differ.

pub mod cas;
pub mod checkerboard;

use ash::vk;
use upscale_common::{ActiveExtents, Extent2D, UpscaleTechnique};

use crate::compute::{dispatch_dimensions, record_bracketed, ComputeDispatch, ComputePass};
use crate::error::{RendererError, RendererResult};
use crate::targets::{InternalTargets, RenderTargets};
use crate::vulkan::descriptors::{BindingKind, DescriptorEntry, DescriptorPool, Sampler};
use crate::vulkan::pipeline::spirv;
use crate::vulkan::recorder::{CommandRecorder, ImageTransition};
use crate::vulkan::{ConstantStream, PerFrameTimerData, TimerTag, VulkanContext};

use cas::{cas_setup, CasConstants, CAS_GROUP_SIZE};
use checkerboard::{CheckerboardState, ResolveConstants, ResolveImages, ResolveWork, SampleMode};

/// Source and destination sizes for `scaled_copy.comp`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ScaledCopyConstants {
    pub src_size: [u32; 2],
    pub dst_size: [u32; 2],
}

impl ScaledCopyConstants {
    pub fn new(src: Extent2D, dst: Extent2D) -> Self {
        Self {
            src_size: [src.width, src.height],
            dst_size: [dst.width, dst.height],
        }
    }
}

/// Bindings shared by the scaled copy and CAS programs.
pub const SPATIAL_BINDINGS: [BindingKind; 3] = [
    BindingKind::SampledImage,
    BindingKind::StorageImage,
    BindingKind::DynamicUniform,
];

/// Bindings of the checkerboard resolve program.
pub const RESOLVE_BINDINGS: [BindingKind; 6] = [
    BindingKind::SampledImage,
    BindingKind::SampledImage,
    BindingKind::SampledImage,
    BindingKind::StorageImage,
    BindingKind::StorageImage,
    BindingKind::DynamicUniform,
];

/// A single-source dispatch writing the target image.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialWork {
    pub source: vk::Image,
    pub target: vk::Image,
    pub dispatch: ComputeDispatch,
}

impl SpatialWork {
    pub fn barriers(&self) -> Vec<ImageTransition> {
        use vk::ImageLayout as L;
        vec![
            ImageTransition::color(self.source, L::COLOR_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            ImageTransition::color(self.target, L::GENERAL, L::GENERAL),
        ]
    }

    pub fn record(&self, rec: &mut impl CommandRecorder) {
        record_bracketed(rec, &self.barriers(), &self.dispatch);
    }
}

/// One frame's prepared upscale.
#[derive(Debug, Clone, PartialEq)]
pub enum UpscaleWork {
    ScaledCopy(SpatialWork),
    Cas(SpatialWork),
    Checkerboard(ResolveWork),
}

impl UpscaleWork {
    pub fn technique(&self) -> UpscaleTechnique {
        match self {
            UpscaleWork::ScaledCopy(_) => UpscaleTechnique::None,
            UpscaleWork::Cas(_) => UpscaleTechnique::Cas,
            UpscaleWork::Checkerboard(_) => UpscaleTechnique::Checkerboard,
        }
    }

    pub fn dispatch(&self) -> &ComputeDispatch {
        match self {
            UpscaleWork::ScaledCopy(work) | UpscaleWork::Cas(work) => &work.dispatch,
            UpscaleWork::Checkerboard(work) => &work.dispatch,
        }
    }
}

/// Record `work` inside the `UpscaleInternal` timer.
pub fn record_upscale(
    rec: &mut impl CommandRecorder,
    timers: &mut PerFrameTimerData,
    work: &UpscaleWork,
) {
    timers.issue_gpu_time_start(rec, TimerTag::UpscaleInternal);
    match work {
        UpscaleWork::ScaledCopy(work) | UpscaleWork::Cas(work) => work.record(rec),
        UpscaleWork::Checkerboard(work) => work.record(rec),
    }
    timers.issue_gpu_time_end(rec, TimerTag::UpscaleInternal);
}

/// Owns the upscale programs and the checkerboard state between frames.
pub struct UpscaleDispatcher {
    scaled_copy: ComputePass,
    cas: ComputePass,
    resolve: ComputePass,
    linear: Sampler,
    nearest: Sampler,
    checkerboard: CheckerboardState,
    cas_sharpness: f32,
}

impl UpscaleDispatcher {
    pub unsafe fn new(
        ctx: &VulkanContext,
        pool: &DescriptorPool,
        frame_count: usize,
        cas_sharpness: f32,
    ) -> RendererResult<Self> {
        let scaled_copy = ComputePass::new(
            ctx, pool, "scaled_copy", spirv::SCALED_COPY_COMP, &SPATIAL_BINDINGS, frame_count,
        )?;
        let cas = ComputePass::new(ctx, pool, "cas", spirv::CAS_COMP, &SPATIAL_BINDINGS, frame_count)?;
        let resolve = ComputePass::new(
            ctx, pool, "cb_resolve", spirv::CB_RESOLVE_COMP, &RESOLVE_BINDINGS, frame_count,
        )?;

        Ok(Self {
            scaled_copy,
            cas,
            resolve,
            linear: Sampler::clamped(ctx, vk::Filter::LINEAR)?,
            nearest: Sampler::clamped(ctx, vk::Filter::NEAREST)?,
            checkerboard: CheckerboardState::new(SampleMode::select(&ctx.sample_locations)),
            cas_sharpness: cas_sharpness.clamp(0.0, 1.0),
        })
    }

    pub fn checkerboard(&self) -> &CheckerboardState {
        &self.checkerboard
    }

    pub fn checkerboard_mut(&mut self) -> &mut CheckerboardState {
        &mut self.checkerboard
    }

    /// Upload constants, write descriptors and size the dispatch for the
    /// active technique.
    pub unsafe fn prepare(
        &self,
        device: &ash::Device,
        frame_index: usize,
        constants: &mut ConstantStream,
        targets: &RenderTargets,
        extents: &ActiveExtents,
    ) -> RendererResult<UpscaleWork> {
        let buffer = constants.buffer(frame_index);
        let uniform = |size: usize| DescriptorEntry::DynamicUniform {
            buffer,
            range: size as vk::DeviceSize,
        };
        let mismatch = || {
            RendererError::Unsupported(format!(
                "render targets were not built for {}",
                extents.technique
            ))
        };
        let target = &targets.target;

        match extents.technique {
            UpscaleTechnique::None => {
                let InternalTargets::Single(scene) = &targets.internal else {
                    return Err(mismatch());
                };
                let entries = [
                    DescriptorEntry::Sampled {
                        view: scene.color.view,
                        sampler: self.linear.handle,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                    DescriptorEntry::Storage { view: target.view },
                    uniform(std::mem::size_of::<ScaledCopyConstants>()),
                ];
                let offset = constants.upload(&ScaledCopyConstants::new(extents.internal, extents.target))?;
                let dispatch = self.scaled_copy
                    .prepare(device, frame_index, &entries, &[offset], extents.target)?;
                Ok(UpscaleWork::ScaledCopy(SpatialWork {
                    source: scene.color.handle,
                    target: target.handle,
                    dispatch,
                }))
            }
            UpscaleTechnique::Cas => {
                let InternalTargets::Single(scene) = &targets.internal else {
                    return Err(mismatch());
                };
                let entries = [
                    DescriptorEntry::Sampled {
                        view: scene.color.view,
                        sampler: self.nearest.handle,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                    DescriptorEntry::Storage { view: target.view },
                    uniform(std::mem::size_of::<CasConstants>()),
                ];
                let offset = constants.upload(&cas_setup(self.cas_sharpness, extents.internal, extents.target))?;
                let groups = dispatch_dimensions(extents.target, [CAS_GROUP_SIZE, CAS_GROUP_SIZE]);
                let dispatch = self.cas
                    .prepare_with_groups(device, frame_index, &entries, &[offset], groups)?;
                Ok(UpscaleWork::Cas(SpatialWork {
                    source: scene.color.handle,
                    target: target.handle,
                    dispatch,
                }))
            }
            UpscaleTechnique::Checkerboard => {
                let InternalTargets::Checkerboard(cb) = &targets.internal else {
                    return Err(mismatch());
                };
                let field = &cb.fields[self.checkerboard.field_index() as usize];
                let (previous, current) = self.checkerboard.history_indices();
                let sampled = |view| DescriptorEntry::Sampled {
                    view,
                    sampler: self.nearest.handle,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                };
                let entries = [
                    sampled(field.color.view),
                    sampled(field.velocity.view),
                    sampled(cb.history[previous].view),
                    DescriptorEntry::Storage { view: cb.history[current].view },
                    DescriptorEntry::Storage { view: target.view },
                    uniform(std::mem::size_of::<ResolveConstants>()),
                ];
                let offset = constants.upload(
                    &self.checkerboard.resolve_constants(extents.internal, extents.target),
                )?;
                let dispatch = self.resolve
                    .prepare(device, frame_index, &entries, &[offset], extents.internal)?;
                Ok(UpscaleWork::Checkerboard(ResolveWork {
                    images: ResolveImages {
                        field_color: field.color.handle,
                        field_velocity: field.velocity.handle,
                        previous_history: cb.history[previous].handle,
                        current_history: cb.history[current].handle,
                        target: target.handle,
                    },
                    dispatch,
                }))
            }
        }
    }

    /// Record the active technique's upscale from the internal image into
    /// the target image.
    pub unsafe fn upscale_internal_to_target(
        &mut self,
        device: &ash::Device,
        rec: &mut impl CommandRecorder,
        frame_index: usize,
        timers: &mut PerFrameTimerData,
        constants: &mut ConstantStream,
        targets: &RenderTargets,
        extents: &ActiveExtents,
    ) -> RendererResult<()> {
        let work = self.prepare(device, frame_index, constants, targets, extents)?;
        record_upscale(rec, timers, &work);
        if let UpscaleWork::Checkerboard(_) = work {
            self.checkerboard.swap_history();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::recorder::mock::{MockRecorder, Recorded};
    use ash::vk::Handle;

    const SOURCE: u64 = 10;
    const TARGET: u64 = 20;

    fn dispatch(groups: [u32; 3]) -> ComputeDispatch {
        ComputeDispatch {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set: vk::DescriptorSet::null(),
            dynamic_offsets: vec![0],
            groups,
        }
    }

    fn spatial(groups: [u32; 3]) -> SpatialWork {
        SpatialWork {
            source: vk::Image::from_raw(SOURCE),
            target: vk::Image::from_raw(TARGET),
            dispatch: dispatch(groups),
        }
    }

    fn all_works() -> Vec<UpscaleWork> {
        vec![
            UpscaleWork::ScaledCopy(spatial([240, 135, 1])),
            UpscaleWork::Cas(spatial([120, 68, 1])),
            UpscaleWork::Checkerboard(ResolveWork {
                images: ResolveImages {
                    field_color: vk::Image::from_raw(SOURCE),
                    field_velocity: vk::Image::from_raw(11),
                    previous_history: vk::Image::from_raw(12),
                    current_history: vk::Image::from_raw(13),
                    target: vk::Image::from_raw(TARGET),
                },
                dispatch: dispatch([120, 68, 1]),
            }),
        ]
    }

    #[test]
    fn test_every_technique_brackets_source() {
        for work in all_works() {
            let mut rec = MockRecorder::default();
            let mut timers = PerFrameTimerData::new(vk::QueryPool::null());
            record_upscale(&mut rec, &mut timers, &work);

            let source = vk::Image::from_raw(SOURCE);
            let to_read = rec.position(|c| matches!(c, Recorded::Transition(t)
                if t.iter().any(|t| t.image == source
                    && t.old_layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                    && t.new_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)));
            let dispatched = rec.position(|c| matches!(c, Recorded::Dispatch(_)));
            let back = rec.position(|c| matches!(c, Recorded::Transition(t)
                if t.iter().any(|t| t.image == source
                    && t.old_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                    && t.new_layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)));

            let (to_read, dispatched, back) = (to_read.unwrap(), dispatched.unwrap(), back.unwrap());
            assert!(to_read < dispatched && dispatched < back, "{:?}", work.technique());

            // Paired: every image ends where it started.
            let transitions = rec.transitions();
            let half = transitions.len() / 2;
            for (before, after) in transitions[..half].iter().zip(&transitions[half..]) {
                assert_eq!(*after, before.reversed());
            }
        }
    }

    #[test]
    fn test_upscale_timed_as_one_region() {
        for work in all_works() {
            let mut rec = MockRecorder::default();
            let mut timers = PerFrameTimerData::new(vk::QueryPool::null());
            record_upscale(&mut rec, &mut timers, &work);

            let first = rec.commands.first().cloned();
            let last = rec.commands.last().cloned();
            assert_eq!(first, Some(Recorded::Timestamp(TimerTag::UpscaleInternal.start_slot())));
            assert_eq!(last, Some(Recorded::Timestamp(TimerTag::UpscaleInternal.end_slot())));
            assert!(timers.tag_issued(TimerTag::UpscaleInternal));
            assert!(!timers.tag_issued(TimerTag::TotalInternal));
            assert_eq!(rec.dispatches(), vec![work.dispatch().groups]);
        }
    }

    #[test]
    fn test_scaled_copy_720p_to_1080p() {
        let internal = Extent2D::new(1280, 720);
        let target = Extent2D::new(1920, 1080);
        let constants = ScaledCopyConstants::new(internal, target);
        assert_eq!(constants.src_size, [1280, 720]);
        assert_eq!(constants.dst_size, [1920, 1080]);
        assert_eq!(dispatch_dimensions(target, [8, 8]), [240, 135, 1]);
    }

    #[test]
    fn test_cas_uses_fixed_group_on_target() {
        let target = Extent2D::new(1920, 1080);
        assert_eq!(dispatch_dimensions(target, [CAS_GROUP_SIZE, CAS_GROUP_SIZE]), [120, 68, 1]);
    }

    #[test]
    fn test_work_reports_technique() {
        let techniques: Vec<_> = all_works().iter().map(UpscaleWork::technique).collect();
        assert_eq!(techniques, UpscaleTechnique::ALL.to_vec());
    }
}
