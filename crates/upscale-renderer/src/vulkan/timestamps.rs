//! GPU timer accounting.
//!
//! Each timed region owns two query slots, `tag * 2` for the start and
//! `tag * 2 + 1` for the end, so regions may nest or overlap freely. Every
//! frame slot has its own query pool; results are read back when the slot
//! comes around again, after its fence has signalled.

use ash::vk;

use super::recorder::CommandRecorder;
use super::VulkanContext;
use crate::error::{RendererError, RendererResult};

/// Nanoseconds to milliseconds.
pub const NS_TO_MS: f64 = 1.0e-6;

/// Named GPU-timed regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerTag {
    TotalInternal,
    SceneRenderInternal,
    UpscaleInternal,
    SceneRenderTarget,
}

impl TimerTag {
    pub const COUNT: usize = 4;

    pub const ALL: [TimerTag; Self::COUNT] = [
        TimerTag::TotalInternal,
        TimerTag::SceneRenderInternal,
        TimerTag::UpscaleInternal,
        TimerTag::SceneRenderTarget,
    ];

    pub fn start_slot(self) -> u32 {
        self as u32 * 2
    }

    pub fn end_slot(self) -> u32 {
        self as u32 * 2 + 1
    }

    pub fn label(self) -> &'static str {
        match self {
            TimerTag::TotalInternal => "Total (internal)",
            TimerTag::SceneRenderInternal => "Scene (internal)",
            TimerTag::UpscaleInternal => "Upscale",
            TimerTag::SceneRenderTarget => "Scene (target)",
        }
    }
}

/// Query slots needed for every tag.
pub const QUERY_COUNT: u32 = TimerTag::COUNT as u32 * 2;

/// Raw start/end ticks of one region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

/// Timer state owned by one frame slot.
#[derive(Debug)]
pub struct PerFrameTimerData {
    pub pool: vk::QueryPool,
    issued: u32,
    resolved: bool,
    ranges: [TimeRange; TimerTag::COUNT],
}

impl PerFrameTimerData {
    pub fn new(pool: vk::QueryPool) -> Self {
        Self {
            pool,
            issued: 0,
            resolved: false,
            ranges: [TimeRange::default(); TimerTag::COUNT],
        }
    }

    /// Reset the pool at the top of the frame's command buffer.
    pub fn begin_frame(&mut self, rec: &mut impl CommandRecorder) {
        rec.reset_query_pool(self.pool, 0, QUERY_COUNT);
        self.issued = 0;
    }

    pub fn issue_gpu_time_start(&mut self, rec: &mut impl CommandRecorder, tag: TimerTag) {
        rec.write_timestamp(self.pool, tag.start_slot());
    }

    pub fn issue_gpu_time_end(&mut self, rec: &mut impl CommandRecorder, tag: TimerTag) {
        rec.write_timestamp(self.pool, tag.end_slot());
        self.issued |= 1 << tag as u32;
    }

    /// Whether any region completed this cycle.
    pub fn issued(&self) -> bool {
        self.issued != 0
    }

    pub fn tag_issued(&self, tag: TimerTag) -> bool {
        self.issued & (1 << tag as u32) != 0
    }

    pub fn resolved(&self) -> bool {
        self.resolved
    }

    pub fn range(&self, tag: TimerTag) -> TimeRange {
        self.ranges[tag as usize]
    }

    /// Pull results through `read(first_slot, out)`.
    ///
    /// Does nothing and returns `false` when no region was issued. When
    /// every tag was issued the whole pool is read in one batch; otherwise
    /// only the issued pairs are read, since waiting on an unwritten query
    /// never completes.
    pub fn readback_with<F>(&mut self, mut read: F) -> RendererResult<bool>
    where
        F: FnMut(u32, &mut [u64]) -> RendererResult<()>,
    {
        if !self.issued() {
            return Ok(false);
        }

        let all = (1u32 << TimerTag::COUNT) - 1;
        if self.issued == all {
            let mut ticks = [0u64; QUERY_COUNT as usize];
            read(0, &mut ticks)?;
            for tag in TimerTag::ALL {
                self.ranges[tag as usize] = TimeRange {
                    start: ticks[tag.start_slot() as usize],
                    end: ticks[tag.end_slot() as usize],
                };
            }
        } else {
            let issued: Vec<TimerTag> =
                TimerTag::ALL.into_iter().filter(|t| self.tag_issued(*t)).collect();
            for tag in issued {
                let mut pair = [0u64; 2];
                read(tag.start_slot(), &mut pair)?;
                self.ranges[tag as usize] = TimeRange { start: pair[0], end: pair[1] };
            }
        }

        self.resolved = true;
        Ok(true)
    }
}

/// Timestamp counter of the graphics queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampClock {
    /// Nanoseconds per tick.
    pub period_ns: f32,
    /// Meaningful low bits of each timestamp; the counter wraps above them.
    pub valid_bits: u32,
}

impl TimestampClock {
    fn mask(&self) -> u64 {
        if self.valid_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.valid_bits) - 1
        }
    }

    /// Ticks from `start` to `end`, across at most one counter wrap.
    pub fn ticks_between(&self, start: u64, end: u64) -> u64 {
        let mask = self.mask();
        (end & mask).wrapping_sub(start & mask) & mask
    }
}

/// Convert a region's ticks to a duration on `clock`, scaled by
/// `scale_to_unit` (for example [`NS_TO_MS`]).
///
/// Not clamped; check [`PerFrameTimerData::resolved`] first.
pub fn calculate_gpu_time_range(
    data: &PerFrameTimerData,
    tag: TimerTag,
    clock: TimestampClock,
    scale_to_unit: f64,
) -> f64 {
    let range = data.range(tag);
    clock.ticks_between(range.start, range.end) as f64 * clock.period_ns as f64 * scale_to_unit
}

/// Resolved region durations in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimerSummary {
    pub ms: [f64; TimerTag::COUNT],
}

impl TimerSummary {
    pub fn get(&self, tag: TimerTag) -> f64 {
        self.ms[tag as usize]
    }
}

impl std::fmt::Display for TimerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, tag) in TimerTag::ALL.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {:.3} ms", tag.label(), self.get(*tag))?;
        }
        Ok(())
    }
}

/// Per-frame-slot query pools and timer data.
pub struct GpuTimers {
    frames: Vec<PerFrameTimerData>,
    clock: TimestampClock,
    latest: Option<TimerSummary>,
    device: ash::Device,
}

impl GpuTimers {
    pub unsafe fn new(ctx: &VulkanContext, frame_count: usize) -> RendererResult<Self> {
        if ctx.timestamp_valid_bits == 0 {
            return Err(RendererError::Unsupported(
                "graphics queue does not support timestamps".to_string(),
            ));
        }

        let mut timers = Self {
            frames: Vec::with_capacity(frame_count),
            clock: TimestampClock {
                period_ns: ctx.timestamp_period(),
                valid_bits: ctx.timestamp_valid_bits,
            },
            latest: None,
            device: ctx.device.clone(),
        };

        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(QUERY_COUNT);
        for _ in 0..frame_count {
            let pool = ctx.device.create_query_pool(&create_info, None)
                .map_err(RendererError::vk("vkCreateQueryPool"))?;
            timers.frames.push(PerFrameTimerData::new(pool));
        }

        Ok(timers)
    }

    pub fn frame_mut(&mut self, frame_index: usize) -> &mut PerFrameTimerData {
        &mut self.frames[frame_index]
    }

    /// Read back the slot's results if it issued any, blocking until they
    /// are available.
    pub unsafe fn readback_gpu_timestamps(&mut self, frame_index: usize) -> RendererResult<()> {
        let device = &self.device;
        let frame = &mut self.frames[frame_index];
        let pool = frame.pool;
        let read = frame.readback_with(|first, out| {
            device.get_query_pool_results(
                pool,
                first,
                out,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
            .map_err(RendererError::vk("vkGetQueryPoolResults"))
        })?;

        if read {
            let mut summary = TimerSummary::default();
            for tag in TimerTag::ALL {
                if frame.tag_issued(tag) {
                    summary.ms[tag as usize] =
                        calculate_gpu_time_range(frame, tag, self.clock, NS_TO_MS);
                }
            }
            self.latest = Some(summary);
        }
        Ok(())
    }

    /// Most recently resolved durations.
    pub fn latest(&self) -> Option<TimerSummary> {
        self.latest
    }
}

impl Drop for GpuTimers {
    fn drop(&mut self) {
        unsafe {
            for frame in &self.frames {
                self.device.destroy_query_pool(frame.pool, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::recorder::mock::{MockRecorder, Recorded};

    fn fake_ticks(first: u32, out: &mut [u64]) -> RendererResult<()> {
        for (i, tick) in out.iter_mut().enumerate() {
            *tick = 1000 + (first as u64 + i as u64) * 250;
        }
        Ok(())
    }

    fn issue_all(data: &mut PerFrameTimerData, rec: &mut MockRecorder) {
        data.begin_frame(rec);
        data.issue_gpu_time_start(rec, TimerTag::TotalInternal);
        data.issue_gpu_time_start(rec, TimerTag::SceneRenderInternal);
        data.issue_gpu_time_end(rec, TimerTag::SceneRenderInternal);
        data.issue_gpu_time_start(rec, TimerTag::UpscaleInternal);
        data.issue_gpu_time_end(rec, TimerTag::UpscaleInternal);
        data.issue_gpu_time_end(rec, TimerTag::TotalInternal);
        data.issue_gpu_time_start(rec, TimerTag::SceneRenderTarget);
        data.issue_gpu_time_end(rec, TimerTag::SceneRenderTarget);
    }

    #[test]
    fn test_slots_are_disjoint_pairs() {
        let mut seen = Vec::new();
        for tag in TimerTag::ALL {
            assert_eq!(tag.end_slot(), tag.start_slot() + 1);
            seen.push(tag.start_slot());
            seen.push(tag.end_slot());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..QUERY_COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn test_nested_regions_write_own_slots() {
        let mut rec = MockRecorder::default();
        let mut data = PerFrameTimerData::new(vk::QueryPool::null());
        issue_all(&mut data, &mut rec);

        assert_eq!(rec.commands[0], Recorded::ResetQueries { first: 0, count: QUERY_COUNT });
        let slots: Vec<u32> = rec.commands.iter()
            .filter_map(|c| match c {
                Recorded::Timestamp(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 2, 3, 4, 5, 1, 6, 7]);
    }

    #[test]
    fn test_readback_without_issue_is_noop() {
        let mut rec = MockRecorder::default();
        let mut data = PerFrameTimerData::new(vk::QueryPool::null());
        data.begin_frame(&mut rec);

        let mut called = false;
        let read = data.readback_with(|_, _| {
            called = true;
            Ok(())
        }).unwrap();

        assert!(!read);
        assert!(!called);
        assert!(!data.resolved());
        for tag in TimerTag::ALL {
            assert_eq!(data.range(tag), TimeRange::default());
        }
    }

    #[test]
    fn test_readback_populates_issued_tags() {
        let mut rec = MockRecorder::default();
        let mut data = PerFrameTimerData::new(vk::QueryPool::null());
        issue_all(&mut data, &mut rec);

        let mut batches = 0;
        let read = data.readback_with(|first, out| {
            batches += 1;
            assert_eq!(first, 0);
            assert_eq!(out.len(), QUERY_COUNT as usize);
            fake_ticks(first, out)
        }).unwrap();

        assert!(read);
        assert_eq!(batches, 1);
        assert!(data.resolved());
        for tag in TimerTag::ALL {
            let range = data.range(tag);
            assert!(range.start > 0);
            assert!(range.end >= range.start);
        }
    }

    #[test]
    fn test_partial_issue_reads_pairs() {
        let mut rec = MockRecorder::default();
        let mut data = PerFrameTimerData::new(vk::QueryPool::null());
        data.begin_frame(&mut rec);
        data.issue_gpu_time_start(&mut rec, TimerTag::UpscaleInternal);
        data.issue_gpu_time_end(&mut rec, TimerTag::UpscaleInternal);

        let mut firsts = Vec::new();
        data.readback_with(|first, out| {
            firsts.push(first);
            fake_ticks(first, out)
        }).unwrap();

        assert_eq!(firsts, vec![TimerTag::UpscaleInternal.start_slot()]);
        assert_eq!(data.range(TimerTag::TotalInternal), TimeRange::default());
        let upscale = data.range(TimerTag::UpscaleInternal);
        assert_eq!(upscale.end - upscale.start, 250);
    }

    #[test]
    fn test_begin_frame_clears_issued_keeps_values() {
        let mut rec = MockRecorder::default();
        let mut data = PerFrameTimerData::new(vk::QueryPool::null());
        issue_all(&mut data, &mut rec);
        data.readback_with(fake_ticks).unwrap();
        let before = data.range(TimerTag::SceneRenderTarget);

        data.begin_frame(&mut rec);
        assert!(!data.issued());
        assert!(!data.readback_with(fake_ticks).unwrap());
        assert_eq!(data.range(TimerTag::SceneRenderTarget), before);
        assert!(data.resolved());
    }

    #[test]
    fn test_time_range_conversion() {
        let mut rec = MockRecorder::default();
        let mut data = PerFrameTimerData::new(vk::QueryPool::null());
        issue_all(&mut data, &mut rec);
        data.readback_with(|_, out| {
            out.fill(0);
            out[TimerTag::UpscaleInternal.start_slot() as usize] = 1_000;
            out[TimerTag::UpscaleInternal.end_slot() as usize] = 3_000_000;
            Ok(())
        }).unwrap();

        // 2,999,000 ticks at 0.5 ns per tick is 1.4995 ms.
        let half_ns = TimestampClock { period_ns: 0.5, valid_bits: 64 };
        let ms = calculate_gpu_time_range(&data, TimerTag::UpscaleInternal, half_ns, NS_TO_MS);
        assert!((ms - 1.4995).abs() < 1e-9);
        let one_ns = TimestampClock { period_ns: 1.0, valid_bits: 64 };
        let ns = calculate_gpu_time_range(&data, TimerTag::UpscaleInternal, one_ns, 1.0);
        assert_eq!(ns, 2_999_000.0);
    }

    #[test]
    fn test_time_range_across_counter_wrap() {
        let mut rec = MockRecorder::default();
        let mut data = PerFrameTimerData::new(vk::QueryPool::null());
        issue_all(&mut data, &mut rec);
        // A 36-bit counter wraps between the two stamps.
        data.readback_with(|_, out| {
            out.fill(0);
            out[TimerTag::TotalInternal.start_slot() as usize] = (1 << 36) - 100;
            out[TimerTag::TotalInternal.end_slot() as usize] = 400;
            Ok(())
        }).unwrap();

        let clock = TimestampClock { period_ns: 1.0, valid_bits: 36 };
        let ns = calculate_gpu_time_range(&data, TimerTag::TotalInternal, clock, 1.0);
        assert_eq!(ns, 500.0);
    }

    #[test]
    fn test_ticks_ignore_invalid_high_bits() {
        let clock = TimestampClock { period_ns: 1.0, valid_bits: 32 };
        assert_eq!(clock.ticks_between(0xdead_0000_0000_0010, 0xbeef_0000_0000_0030), 0x20);
        let full = TimestampClock { period_ns: 1.0, valid_bits: 64 };
        assert_eq!(full.ticks_between(5, 12), 7);
    }
}
