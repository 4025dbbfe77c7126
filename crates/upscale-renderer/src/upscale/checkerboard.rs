//! Checkerboard temporal resolve.
//!
//! Each frame renders one of two interleaved fields at half the target
//! resolution with 2 samples per pixel. Every low resolution pixel covers a
//! 2x2 quad of target pixels and each field lands its two samples on one
//! diagonal of that quad, so two consecutive fields cover the whole quad.
//! The resolve shader writes the samples of the current field into the
//! target, fills the other diagonal from the reprojected previous history,
//! and stores the result as the new history.
//!
//! Field sample layout inside a low resolution pixel (x right, y down):
//!
//! ```text
//!   field 0      field 1
//!   . . . .      . . . .
//!   . o . .      . . . o      o sample 1
//!   . . . .      . . . .      x sample 0
//!   . . . x      . x . .
//! ```

use ash::vk;
use upscale_common::Extent2D;

use crate::compute::{record_bracketed, ComputeDispatch};
use crate::vulkan::context::SampleLocationCapabilities;
use crate::vulkan::recorder::{CommandRecorder, ImageTransition};

/// Sub-pixel sample offsets per field, in low resolution pixel units.
///
/// Field 0 matches the standard 2x MSAA pattern. Field 1 mirrors the
/// horizontal components and keeps the vertical ones.
pub const FIELD_SAMPLE_OFFSETS: [[(f32, f32); 2]; 2] = [
    [(0.75, 0.75), (0.25, 0.25)],
    [(0.25, 0.75), (0.75, 0.25)],
];

/// Horizontal viewport shift applied to odd fields in jitter mode, in low
/// resolution pixels. Half a low resolution pixel is one target pixel.
pub const JITTER_VIEWPORT_OFFSET: f32 = 0.5;

/// How the two fields get their complementary sample positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Program the sample positions per field.
    CustomLocations,
    /// Keep the standard positions and shift the viewport on odd fields.
    ViewportJitter,
}

impl SampleMode {
    /// Pick the mode once from the device capabilities.
    pub fn select(caps: &SampleLocationCapabilities) -> Self {
        if caps.supported {
            SampleMode::CustomLocations
        } else {
            SampleMode::ViewportJitter
        }
    }
}

/// Raster setup for one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSetup {
    pub field: u32,
    /// Explicit sample positions, `None` to keep the standard pattern.
    pub sample_locations: Option<[(f32, f32); 2]>,
    /// Horizontal viewport offset in low resolution pixels.
    pub viewport_offset_x: f32,
}

impl FieldSetup {
    /// Viewport covering `extent`, shifted by this field's jitter.
    pub fn viewport(&self, extent: Extent2D) -> vk::Viewport {
        vk::Viewport {
            x: self.viewport_offset_x,
            ..crate::scene::full_viewport(extent)
        }
    }
}

/// Field parity and history ping-pong, carried across frames.
#[derive(Debug, Clone)]
pub struct CheckerboardState {
    field_index: u32,
    mode: SampleMode,
    current_history: usize,
    history_valid: bool,
}

impl CheckerboardState {
    /// Starts on field 1 so the first [`advance_field`](Self::advance_field)
    /// renders field 0.
    pub fn new(mode: SampleMode) -> Self {
        log::info!("Checkerboard sample mode {:?}", mode);
        Self {
            field_index: 1,
            mode,
            current_history: 0,
            history_valid: false,
        }
    }

    pub fn mode(&self) -> SampleMode {
        self.mode
    }

    pub fn field_index(&self) -> u32 {
        self.field_index
    }

    /// Toggle to the next field and return it.
    pub fn advance_field(&mut self) -> u32 {
        self.field_index ^= 1;
        self.field_index
    }

    /// Raster setup for the current field.
    pub fn field_setup(&self) -> FieldSetup {
        let field = self.field_index;
        match self.mode {
            SampleMode::CustomLocations => FieldSetup {
                field,
                sample_locations: Some(FIELD_SAMPLE_OFFSETS[field as usize]),
                viewport_offset_x: 0.0,
            },
            SampleMode::ViewportJitter => FieldSetup {
                field,
                sample_locations: None,
                viewport_offset_x: if field == 1 { JITTER_VIEWPORT_OFFSET } else { 0.0 },
            },
        }
    }

    /// `(previous, current)` history image indices.
    pub fn history_indices(&self) -> (usize, usize) {
        (self.current_history ^ 1, self.current_history)
    }

    /// Whether the previous history holds a resolved frame.
    pub fn history_valid(&self) -> bool {
        self.history_valid
    }

    /// Flip current and previous history after a resolve.
    pub fn swap_history(&mut self) {
        self.current_history ^= 1;
        self.history_valid = true;
    }

    /// Forget the history, for example after the images were reallocated.
    pub fn invalidate_history(&mut self) {
        self.history_valid = false;
    }

    /// Constants for this frame's resolve dispatch.
    pub fn resolve_constants(&self, internal: Extent2D, target: Extent2D) -> ResolveConstants {
        ResolveConstants {
            field: self.field_index,
            viewport_jitter: (self.mode == SampleMode::ViewportJitter) as u32,
            history_valid: self.history_valid as u32,
            _pad: 0,
            internal_size: [internal.width, internal.height],
            target_size: [target.width, target.height],
        }
    }
}

/// Constants consumed by `cb_resolve.comp`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ResolveConstants {
    pub field: u32,
    pub viewport_jitter: u32,
    pub history_valid: u32,
    pub _pad: u32,
    pub internal_size: [u32; 2],
    pub target_size: [u32; 2],
}

/// Images touched by one resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveImages {
    pub field_color: vk::Image,
    pub field_velocity: vk::Image,
    pub previous_history: vk::Image,
    pub current_history: vk::Image,
    pub target: vk::Image,
}

/// A prepared resolve dispatch and the images it brackets.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveWork {
    pub images: ResolveImages,
    pub dispatch: ComputeDispatch,
}

impl ResolveWork {
    /// Barriers before the dispatch; the same list reversed follows it.
    pub fn barriers(&self) -> Vec<ImageTransition> {
        use vk::ImageLayout as L;
        let images = &self.images;
        vec![
            ImageTransition::color(images.field_color, L::COLOR_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            ImageTransition::color(images.field_velocity, L::COLOR_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            ImageTransition::color(images.previous_history, L::GENERAL, L::SHADER_READ_ONLY_OPTIMAL),
            ImageTransition::color(images.current_history, L::GENERAL, L::GENERAL),
            ImageTransition::color(images.target, L::GENERAL, L::GENERAL),
        ]
    }

    pub fn record(&self, rec: &mut impl CommandRecorder) {
        record_bracketed(rec, &self.barriers(), &self.dispatch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::recorder::mock::{MockRecorder, Recorded};
    use ash::vk::Handle;

    fn caps(supported: bool) -> SampleLocationCapabilities {
        SampleLocationCapabilities {
            supported,
            sample_counts: vk::SampleCountFlags::TYPE_2,
            ..Default::default()
        }
    }

    fn work() -> ResolveWork {
        ResolveWork {
            images: ResolveImages {
                field_color: vk::Image::from_raw(1),
                field_velocity: vk::Image::from_raw(2),
                previous_history: vk::Image::from_raw(3),
                current_history: vk::Image::from_raw(4),
                target: vk::Image::from_raw(5),
            },
            dispatch: ComputeDispatch {
                pipeline: vk::Pipeline::null(),
                layout: vk::PipelineLayout::null(),
                set: vk::DescriptorSet::null(),
                dynamic_offsets: vec![0],
                groups: [120, 68, 1],
            },
        }
    }

    #[test]
    fn test_field_index_alternates() {
        let mut state = CheckerboardState::new(SampleMode::CustomLocations);
        let fields: Vec<u32> = (0..6).map(|_| state.advance_field()).collect();
        assert_eq!(fields, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_field_offsets_mirror_horizontally() {
        let [field0, field1] = FIELD_SAMPLE_OFFSETS;
        for (a, b) in field0.iter().zip(field1.iter()) {
            assert_eq!(a.0, 1.0 - b.0);
            assert_eq!(a.1, b.1);
        }
    }

    #[test]
    fn test_custom_locations_field_sequence() {
        let mut state = CheckerboardState::new(SampleMode::select(&caps(true)));
        state.advance_field();
        let first = state.field_setup();
        state.advance_field();
        let second = state.field_setup();

        assert_eq!(first.field, 0);
        assert_eq!(first.sample_locations, Some([(0.75, 0.75), (0.25, 0.25)]));
        assert_eq!(second.field, 1);
        assert_eq!(second.sample_locations, Some([(0.25, 0.75), (0.75, 0.25)]));
        assert_eq!(first.viewport_offset_x, 0.0);
        assert_eq!(second.viewport_offset_x, 0.0);
    }

    #[test]
    fn test_jitter_fallback_shifts_odd_fields_only() {
        let mut state = CheckerboardState::new(SampleMode::select(&caps(false)));
        assert_eq!(state.mode(), SampleMode::ViewportJitter);

        for _ in 0..4 {
            let field = state.advance_field();
            let setup = state.field_setup();
            assert_eq!(setup.sample_locations, None);
            let expected = if field == 1 { 0.5 } else { 0.0 };
            assert_eq!(setup.viewport_offset_x, expected);
            assert_eq!(setup.viewport(Extent2D::new(960, 540)).x, expected);
        }
    }

    #[test]
    fn test_exactly_one_mode_active() {
        let mut custom = CheckerboardState::new(SampleMode::CustomLocations);
        let mut jitter = CheckerboardState::new(SampleMode::ViewportJitter);
        for _ in 0..4 {
            custom.advance_field();
            jitter.advance_field();
            let c = custom.field_setup();
            let j = jitter.field_setup();
            assert!(c.sample_locations.is_some() && c.viewport_offset_x == 0.0);
            assert!(j.sample_locations.is_none());
            assert_eq!(custom.mode(), SampleMode::CustomLocations);
            assert_eq!(jitter.mode(), SampleMode::ViewportJitter);
        }
    }

    #[test]
    fn test_history_ping_pong() {
        let mut state = CheckerboardState::new(SampleMode::CustomLocations);
        assert!(!state.history_valid());
        assert_eq!(state.history_indices(), (1, 0));

        state.swap_history();
        assert!(state.history_valid());
        assert_eq!(state.history_indices(), (0, 1));

        state.swap_history();
        assert_eq!(state.history_indices(), (1, 0));

        state.invalidate_history();
        assert!(!state.history_valid());
        assert_eq!(state.history_indices(), (1, 0));
    }

    #[test]
    fn test_resolve_constants() {
        let mut state = CheckerboardState::new(SampleMode::ViewportJitter);
        state.advance_field();
        state.advance_field();
        let c = state.resolve_constants(Extent2D::new(960, 540), Extent2D::new(1920, 1080));
        assert_eq!(c.field, 1);
        assert_eq!(c.viewport_jitter, 1);
        assert_eq!(c.history_valid, 0);
        assert_eq!(c.internal_size, [960, 540]);
        assert_eq!(c.target_size, [1920, 1080]);
        assert_eq!(std::mem::size_of::<ResolveConstants>(), 32);
    }

    #[test]
    fn test_resolve_barrier_sequencing() {
        use vk::ImageLayout as L;
        let work = work();
        let mut rec = MockRecorder::default();
        work.record(&mut rec);

        assert_eq!(rec.commands.len(), 4);
        let Recorded::Transition(before) = &rec.commands[0] else {
            panic!("expected barriers first");
        };
        let Recorded::Transition(after) = &rec.commands[3] else {
            panic!("expected barriers last");
        };
        assert!(matches!(rec.commands[1], Recorded::BindCompute { .. }));
        assert_eq!(rec.commands[2], Recorded::Dispatch([120, 68, 1]));

        let field_color = before.iter().find(|t| t.image == work.images.field_color).unwrap();
        assert_eq!(field_color.old_layout, L::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(field_color.new_layout, L::SHADER_READ_ONLY_OPTIMAL);

        let previous = before.iter().find(|t| t.image == work.images.previous_history).unwrap();
        assert_eq!(previous.old_layout, L::GENERAL);
        assert_eq!(previous.new_layout, L::SHADER_READ_ONLY_OPTIMAL);

        // Every image ends in the layout it started in.
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.image, a.image);
            assert_eq!(b.old_layout, a.new_layout);
            assert_eq!(b.new_layout, a.old_layout);
        }
    }
}
