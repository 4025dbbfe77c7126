//! Per-frame command sequence.
//!
//! A frame renders the scene at internal resolution, upscales it to target
//! resolution, renders the same scene natively at target resolution for
//! comparison, then composes the delta view and copies it to the swapchain.
//!
//! ```text
//! TotalInternal [ SceneRenderInternal [ scene ] UpscaleInternal [ upscale ] ]
//! SceneRenderTarget [ reference scene ]
//! delta, present copy, blit
//! ```

use crate::error::RendererResult;
use crate::vulkan::recorder::CommandRecorder;
use crate::vulkan::{PerFrameTimerData, TimerTag};

/// The recorded stages of one frame.
pub trait FrameWork<R: CommandRecorder> {
    /// Scene at internal resolution, or the current checkerboard field.
    fn scene_internal(&mut self, rec: &mut R) -> RendererResult<()>;

    /// Upscale into the target image. Times itself as `UpscaleInternal`.
    fn upscale(&mut self, rec: &mut R, timers: &mut PerFrameTimerData) -> RendererResult<()>;

    /// Scene rendered natively at target resolution.
    fn scene_target(&mut self, rec: &mut R) -> RendererResult<()>;

    /// Delta view, present copy and swapchain blit.
    fn composite(&mut self, rec: &mut R) -> RendererResult<()>;
}

/// Record one frame with its GPU timer regions.
pub fn record_frame<R, W>(rec: &mut R, timers: &mut PerFrameTimerData, work: &mut W) -> RendererResult<()>
where
    R: CommandRecorder,
    W: FrameWork<R>,
{
    timers.begin_frame(rec);

    timers.issue_gpu_time_start(rec, TimerTag::TotalInternal);
    timers.issue_gpu_time_start(rec, TimerTag::SceneRenderInternal);
    work.scene_internal(rec)?;
    timers.issue_gpu_time_end(rec, TimerTag::SceneRenderInternal);
    work.upscale(rec, timers)?;
    timers.issue_gpu_time_end(rec, TimerTag::TotalInternal);

    timers.issue_gpu_time_start(rec, TimerTag::SceneRenderTarget);
    work.scene_target(rec)?;
    timers.issue_gpu_time_end(rec, TimerTag::SceneRenderTarget);

    work.composite(rec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RendererError;
    use crate::vulkan::recorder::mock::{MockRecorder, Recorded};
    use ash::vk;

    const SCENE: [u32; 3] = [1, 1, 1];
    const UPSCALE: [u32; 3] = [2, 1, 1];
    const REFERENCE: [u32; 3] = [3, 1, 1];
    const COMPOSITE: [u32; 3] = [4, 1, 1];

    /// Marks each stage with a distinct dispatch.
    #[derive(Default)]
    struct Stages {
        fail_upscale: bool,
    }

    impl FrameWork<MockRecorder> for Stages {
        fn scene_internal(&mut self, rec: &mut MockRecorder) -> RendererResult<()> {
            rec.dispatch(SCENE);
            Ok(())
        }

        fn upscale(&mut self, rec: &mut MockRecorder, timers: &mut PerFrameTimerData) -> RendererResult<()> {
            if self.fail_upscale {
                return Err(RendererError::Unsupported("upscale".to_string()));
            }
            timers.issue_gpu_time_start(rec, TimerTag::UpscaleInternal);
            rec.dispatch(UPSCALE);
            timers.issue_gpu_time_end(rec, TimerTag::UpscaleInternal);
            Ok(())
        }

        fn scene_target(&mut self, rec: &mut MockRecorder) -> RendererResult<()> {
            rec.dispatch(REFERENCE);
            Ok(())
        }

        fn composite(&mut self, rec: &mut MockRecorder) -> RendererResult<()> {
            rec.dispatch(COMPOSITE);
            Ok(())
        }
    }

    fn at(rec: &MockRecorder, command: Recorded) -> usize {
        rec.position(|c| *c == command).unwrap()
    }

    fn stamp(tag: TimerTag, start: bool) -> Recorded {
        Recorded::Timestamp(if start { tag.start_slot() } else { tag.end_slot() })
    }

    #[test]
    fn test_stage_order() {
        let mut rec = MockRecorder::default();
        let mut timers = PerFrameTimerData::new(vk::QueryPool::null());
        record_frame(&mut rec, &mut timers, &mut Stages::default()).unwrap();
        assert_eq!(rec.dispatches(), vec![SCENE, UPSCALE, REFERENCE, COMPOSITE]);
    }

    #[test]
    fn test_timer_regions_nest() {
        let mut rec = MockRecorder::default();
        let mut timers = PerFrameTimerData::new(vk::QueryPool::null());
        record_frame(&mut rec, &mut timers, &mut Stages::default()).unwrap();

        let total = (at(&rec, stamp(TimerTag::TotalInternal, true)), at(&rec, stamp(TimerTag::TotalInternal, false)));
        let scene = (
            at(&rec, stamp(TimerTag::SceneRenderInternal, true)),
            at(&rec, stamp(TimerTag::SceneRenderInternal, false)),
        );
        let upscale = (
            at(&rec, stamp(TimerTag::UpscaleInternal, true)),
            at(&rec, stamp(TimerTag::UpscaleInternal, false)),
        );
        let target = (
            at(&rec, stamp(TimerTag::SceneRenderTarget, true)),
            at(&rec, stamp(TimerTag::SceneRenderTarget, false)),
        );

        assert!(total.0 < scene.0 && scene.1 < upscale.0 && upscale.1 < total.1);
        assert!(total.1 < target.0);
        let reference = at(&rec, Recorded::Dispatch(REFERENCE));
        assert!(target.0 < reference && reference < target.1);
        assert!(at(&rec, Recorded::Dispatch(COMPOSITE)) > target.1);
        assert!(TimerTag::ALL.iter().all(|tag| timers.tag_issued(*tag)));
    }

    #[test]
    fn test_queries_reset_first() {
        let mut rec = MockRecorder::default();
        let mut timers = PerFrameTimerData::new(vk::QueryPool::null());
        record_frame(&mut rec, &mut timers, &mut Stages::default()).unwrap();
        assert!(matches!(rec.commands.first(), Some(Recorded::ResetQueries { first: 0, .. })));
    }

    #[test]
    fn test_failed_stage_stops_recording() {
        let mut rec = MockRecorder::default();
        let mut timers = PerFrameTimerData::new(vk::QueryPool::null());
        let mut work = Stages { fail_upscale: true };
        assert!(record_frame(&mut rec, &mut timers, &mut work).is_err());
        assert_eq!(rec.dispatches(), vec![SCENE]);
        assert!(!timers.tag_issued(TimerTag::SceneRenderTarget));
    }
}
