//! Command recording seam used by the upscale and timing code.
//!
//! The passes only need a handful of commands: layout barriers, binding a
//! compute pipeline or a graphics descriptor set with dynamic offsets,
//! dispatches, indexed draws and timestamp writes. Routing them through
//! [`CommandRecorder`] lets the barrier bracketing, descriptor binding and
//! timer slot assignment be checked without a device.

use ash::vk;

/// One image layout change inside a barrier batch.
///
/// `old_layout == new_layout` records a plain execution and memory
/// dependency without changing the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
}

impl ImageTransition {
    pub fn color(image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        Self { image, old_layout, new_layout, aspect: vk::ImageAspectFlags::COLOR }
    }

    pub fn depth(image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        Self { image, old_layout, new_layout, aspect: vk::ImageAspectFlags::DEPTH }
    }

    /// The transition undoing this one.
    pub fn reversed(self) -> Self {
        Self {
            old_layout: self.new_layout,
            new_layout: self.old_layout,
            ..self
        }
    }
}

/// Access masks and pipeline stages for a layout change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Pick access masks and stages for an `(old, new)` layout pair.
///
/// Shader reads and writes are assumed to happen in compute, which is the
/// only shader stage that consumes the render targets.
pub fn barrier_masks(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> BarrierMasks {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, src_stage) = match old_layout {
        L::UNDEFINED => (A::empty(), S::TOP_OF_PIPE),
        L::COLOR_ATTACHMENT_OPTIMAL => (A::COLOR_ATTACHMENT_WRITE, S::COLOR_ATTACHMENT_OUTPUT),
        L::DEPTH_ATTACHMENT_OPTIMAL => (
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
        ),
        L::SHADER_READ_ONLY_OPTIMAL => (A::SHADER_READ, S::COMPUTE_SHADER),
        L::GENERAL => (A::SHADER_WRITE, S::COMPUTE_SHADER),
        L::TRANSFER_DST_OPTIMAL => (A::TRANSFER_WRITE, S::TRANSFER),
        L::TRANSFER_SRC_OPTIMAL => (A::TRANSFER_READ, S::TRANSFER),
        L::PRESENT_SRC_KHR => (A::empty(), S::BOTTOM_OF_PIPE),
        _ => (A::MEMORY_READ | A::MEMORY_WRITE, S::ALL_COMMANDS),
    };

    let (dst_access, dst_stage) = match new_layout {
        L::COLOR_ATTACHMENT_OPTIMAL => (
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        L::DEPTH_ATTACHMENT_OPTIMAL => (
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
        ),
        L::SHADER_READ_ONLY_OPTIMAL => (A::SHADER_READ, S::COMPUTE_SHADER),
        L::GENERAL => (A::SHADER_READ | A::SHADER_WRITE, S::COMPUTE_SHADER),
        L::TRANSFER_DST_OPTIMAL => (A::TRANSFER_WRITE, S::TRANSFER),
        L::TRANSFER_SRC_OPTIMAL => (A::TRANSFER_READ, S::TRANSFER),
        L::PRESENT_SRC_KHR => (A::empty(), S::BOTTOM_OF_PIPE),
        _ => (A::MEMORY_READ | A::MEMORY_WRITE, S::ALL_COMMANDS),
    };

    BarrierMasks { src_access, dst_access, src_stage, dst_stage }
}

/// Minimal command surface for the passes and GPU timers.
pub trait CommandRecorder {
    /// Record one barrier batch covering every transition.
    fn transition_images(&mut self, transitions: &[ImageTransition]);

    /// Bind a compute pipeline and its single descriptor set.
    fn bind_compute(
        &mut self,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    );

    fn dispatch(&mut self, groups: [u32; 3]);

    /// Bind set 0 of a graphics pipeline layout.
    fn bind_graphics_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet, dynamic_offsets: &[u32]);

    fn draw_indexed(&mut self, index_count: u32, first_index: u32);

    fn reset_query_pool(&mut self, pool: vk::QueryPool, first: u32, count: u32);

    fn write_timestamp(&mut self, pool: vk::QueryPool, slot: u32);
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Recorded {
        Transition(Vec<ImageTransition>),
        BindCompute { pipeline: vk::Pipeline, set: vk::DescriptorSet, offsets: Vec<u32> },
        Dispatch([u32; 3]),
        BindGraphicsSet { set: vk::DescriptorSet, offsets: Vec<u32> },
        DrawIndexed { index_count: u32, first_index: u32 },
        ResetQueries { first: u32, count: u32 },
        Timestamp(u32),
    }

    /// Captures recorded commands in order.
    #[derive(Debug, Default)]
    pub struct MockRecorder {
        pub commands: Vec<Recorded>,
    }

    impl MockRecorder {
        pub fn transitions(&self) -> Vec<ImageTransition> {
            self.commands
                .iter()
                .filter_map(|c| match c {
                    Recorded::Transition(t) => Some(t.clone()),
                    _ => None,
                })
                .flatten()
                .collect()
        }

        pub fn dispatches(&self) -> Vec<[u32; 3]> {
            self.commands
                .iter()
                .filter_map(|c| match c {
                    Recorded::Dispatch(d) => Some(*d),
                    _ => None,
                })
                .collect()
        }

        pub fn position(&self, pred: impl Fn(&Recorded) -> bool) -> Option<usize> {
            self.commands.iter().position(pred)
        }
    }

    impl CommandRecorder for MockRecorder {
        fn transition_images(&mut self, transitions: &[ImageTransition]) {
            self.commands.push(Recorded::Transition(transitions.to_vec()));
        }

        fn bind_compute(
            &mut self,
            pipeline: vk::Pipeline,
            _layout: vk::PipelineLayout,
            set: vk::DescriptorSet,
            dynamic_offsets: &[u32],
        ) {
            self.commands.push(Recorded::BindCompute {
                pipeline,
                set,
                offsets: dynamic_offsets.to_vec(),
            });
        }

        fn dispatch(&mut self, groups: [u32; 3]) {
            self.commands.push(Recorded::Dispatch(groups));
        }

        fn bind_graphics_set(
            &mut self,
            _layout: vk::PipelineLayout,
            set: vk::DescriptorSet,
            dynamic_offsets: &[u32],
        ) {
            self.commands.push(Recorded::BindGraphicsSet { set, offsets: dynamic_offsets.to_vec() });
        }

        fn draw_indexed(&mut self, index_count: u32, first_index: u32) {
            self.commands.push(Recorded::DrawIndexed { index_count, first_index });
        }

        fn reset_query_pool(&mut self, _pool: vk::QueryPool, first: u32, count: u32) {
            self.commands.push(Recorded::ResetQueries { first, count });
        }

        fn write_timestamp(&mut self, _pool: vk::QueryPool, slot: u32) {
            self.commands.push(Recorded::Timestamp(slot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_to_shader_read_masks() {
        let masks = barrier_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(masks.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    }

    #[test]
    fn test_general_to_general_is_compute_dependency() {
        let masks = barrier_masks(vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL);
        assert_eq!(masks.src_access, vk::AccessFlags::SHADER_WRITE);
        assert!(masks.dst_access.contains(vk::AccessFlags::SHADER_READ));
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    }

    #[test]
    fn test_reversed_swaps_layouts() {
        let t = ImageTransition::color(
            vk::Image::null(),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        let r = t.reversed();
        assert_eq!(r.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(r.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(r.reversed(), t);
    }
}
