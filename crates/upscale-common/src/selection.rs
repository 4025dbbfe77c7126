//! Resolution selection state machine.
//!
//! Present, target and internal resolutions form a chain. Changes only ever
//! cascade downstream: a present change resets the target selection, a target
//! change resets the internal selection, and an internal change touches nothing
//! else. UI input only moves the selection ordinals; the keys are recomputed by
//! `update_target_resolution` followed by `update_internal_resolution`, once per
//! frame before any GPU work is recorded.

use crate::error::SelectionError;
use crate::resolution::{
    CheckerboardResolutionKey, Extent2D, PresentResolutionKey, ResolutionKey, TargetResolutionKey,
};
use crate::technique::UpscaleTechnique;

/// Extents and technique in effect for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveExtents {
    pub internal: Extent2D,
    pub target: Extent2D,
    pub present: Extent2D,
    pub technique: UpscaleTechnique,
}

/// Currently selected present/target/internal resolutions.
#[derive(Debug, Clone)]
pub struct ResolutionSelection {
    present: PresentResolutionKey,
    target: TargetResolutionKey,
    internal: ResolutionKey,
    checkerboard_internal: CheckerboardResolutionKey,
    technique: UpscaleTechnique,
    target_index: usize,
    internal_index: usize,
}

impl ResolutionSelection {
    /// Create a selection with every downstream choice at its default.
    pub fn new(present: PresentResolutionKey, technique: UpscaleTechnique) -> Self {
        let target = present.chain().targets[0];
        let target_chain = target.chain();
        let mut selection = Self {
            present,
            target,
            internal: target_chain.internals[0],
            checkerboard_internal: target_chain.checkerboard,
            technique,
            target_index: 0,
            internal_index: 0,
        };
        selection.set_present_resolution(present);
        selection
    }

    /// Set the present resolution and reset everything downstream of it.
    pub fn set_present_resolution(&mut self, key: PresentResolutionKey) {
        self.present = key;
        self.target_index = 0;
        self.target = key.chain().targets[0];
        self.reset_internal();
        log::info!(
            "Present resolution {} (target {}, internal {})",
            key.text(),
            self.target.text(),
            self.internal_text()
        );
    }

    /// Recompute the target key from the target ordinal.
    ///
    /// Returns `true` if the target changed, in which case the internal
    /// selection has been reset to its default.
    pub fn update_target_resolution(&mut self) -> bool {
        let target = self.present.chain().targets[self.target_index];
        if target == self.target {
            return false;
        }
        self.target = target;
        self.reset_internal();
        log::info!("Target resolution {} (internal {})", target.text(), self.internal_text());
        true
    }

    /// Recompute the internal key from the internal ordinal.
    pub fn update_internal_resolution(&mut self) {
        let chain = self.target.chain();
        self.checkerboard_internal = chain.checkerboard;
        let internal = chain.internals[self.internal_index];
        if internal != self.internal {
            self.internal = internal;
            log::info!("Internal resolution {}", internal.text());
        }
    }

    fn reset_internal(&mut self) {
        self.internal_index = 0;
        let chain = self.target.chain();
        self.internal = chain.internals[0];
        self.checkerboard_internal = chain.checkerboard;
    }

    /// Choose a target candidate by UI ordinal. Takes effect on the next update.
    pub fn select_target_index(&mut self, index: usize) -> Result<(), SelectionError> {
        let len = self.present.chain().targets.len();
        if index >= len {
            return Err(SelectionError::IndexOutOfRange { index, len });
        }
        self.target_index = index;
        Ok(())
    }

    /// Choose an internal candidate by UI ordinal. Takes effect on the next update.
    ///
    /// The ordinal indexes the normal internal list of the current target. The
    /// checkerboard technique has a single fixed internal resolution, so while
    /// it is active the stored ordinal is kept but not used.
    pub fn select_internal_index(&mut self, index: usize) -> Result<(), SelectionError> {
        let len = self.target.chain().internals.len();
        if index >= len {
            return Err(SelectionError::IndexOutOfRange { index, len });
        }
        self.internal_index = index;
        Ok(())
    }

    /// Select a technique by its position in the technique combo.
    pub fn select_technique_index(&mut self, index: usize) -> Result<(), SelectionError> {
        self.select_technique(UpscaleTechnique::from_index(index)?);
        Ok(())
    }

    pub fn select_technique(&mut self, technique: UpscaleTechnique) {
        if technique != self.technique {
            log::info!("Upscale technique {}", technique);
            self.technique = technique;
        }
    }

    pub fn present(&self) -> PresentResolutionKey {
        self.present
    }

    pub fn target(&self) -> TargetResolutionKey {
        self.target
    }

    pub fn internal(&self) -> ResolutionKey {
        self.internal
    }

    pub fn checkerboard_internal(&self) -> CheckerboardResolutionKey {
        self.checkerboard_internal
    }

    pub fn technique(&self) -> UpscaleTechnique {
        self.technique
    }

    pub fn target_index(&self) -> usize {
        self.target_index
    }

    pub fn internal_index(&self) -> usize {
        self.internal_index
    }

    /// Ordinal of the internal combo entry shown for the active technique.
    pub fn internal_display_index(&self) -> usize {
        if self.technique.is_checkerboard() { 0 } else { self.internal_index }
    }

    /// Internal render extent; checkerboard renders at its half-resolution extent.
    pub fn internal_extent(&self) -> Extent2D {
        match self.technique {
            UpscaleTechnique::Checkerboard => self.checkerboard_internal.extent(),
            UpscaleTechnique::None | UpscaleTechnique::Cas => self.internal.extent(),
        }
    }

    pub fn internal_text(&self) -> &'static str {
        match self.technique {
            UpscaleTechnique::Checkerboard => self.checkerboard_internal.text(),
            UpscaleTechnique::None | UpscaleTechnique::Cas => self.internal.text(),
        }
    }

    pub fn target_extent(&self) -> Extent2D {
        self.target.extent()
    }

    pub fn target_text(&self) -> &'static str {
        self.target.text()
    }

    pub fn present_extent(&self) -> Extent2D {
        self.present.extent()
    }

    pub fn present_text(&self) -> &'static str {
        self.present.text()
    }

    pub fn active_extents(&self) -> ActiveExtents {
        ActiveExtents {
            internal: self.internal_extent(),
            target: self.target_extent(),
            present: self.present_extent(),
            technique: self.technique,
        }
    }

    /// Target combo entries valid for the current present resolution.
    pub fn target_resolution_texts(&self) -> Vec<&'static str> {
        self.present.chain().targets.iter().map(|t| t.text()).collect()
    }

    /// Internal combo entries valid for the current target and technique.
    pub fn internal_resolution_texts(&self) -> Vec<&'static str> {
        let chain = self.target.chain();
        match self.technique {
            UpscaleTechnique::Checkerboard => vec![chain.checkerboard.text()],
            UpscaleTechnique::None | UpscaleTechnique::Cas => {
                chain.internals.iter().map(|r| r.text()).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::find_present_resolution_key;

    fn update(selection: &mut ResolutionSelection) {
        selection.update_target_resolution();
        selection.update_internal_resolution();
    }

    #[test]
    fn test_startup_1080p() {
        let present = find_present_resolution_key(1920).unwrap();
        let mut selection = ResolutionSelection::new(present, UpscaleTechnique::None);
        update(&mut selection);

        assert_eq!(selection.present(), PresentResolutionKey::P1080p);
        assert_eq!(selection.target(), TargetResolutionKey::T1080p);
        assert_eq!(selection.internal(), ResolutionKey::R1080p);
        assert_eq!(selection.present_extent(), Extent2D::new(1920, 1080));
        assert_eq!(selection.target_extent(), Extent2D::new(1920, 1080));
        assert_eq!(selection.internal_extent(), Extent2D::new(1920, 1080));
    }

    #[test]
    fn test_switch_to_2160p_present() {
        let mut selection =
            ResolutionSelection::new(PresentResolutionKey::P1080p, UpscaleTechnique::None);
        selection.select_internal_index(2).unwrap();
        update(&mut selection);
        assert_eq!(selection.internal(), ResolutionKey::R720p);

        selection.set_present_resolution(find_present_resolution_key(3840).unwrap());
        assert_eq!(selection.target(), TargetResolutionKey::T2160p);
        assert_eq!(selection.internal(), ResolutionKey::R2160p);
        assert_eq!(selection.target_resolution_texts(), vec!["3840x2160", "1920x1080"]);
        assert_eq!(
            selection.internal_resolution_texts(),
            vec!["3840x2160", "2560x1440", "1920x1080"]
        );
    }

    #[test]
    fn test_present_change_resets_downstream() {
        for present in PresentResolutionKey::ALL {
            let mut selection =
                ResolutionSelection::new(PresentResolutionKey::P2160p, UpscaleTechnique::Cas);
            selection.select_target_index(1).unwrap();
            update(&mut selection);
            selection.select_internal_index(1).unwrap();
            update(&mut selection);

            selection.set_present_resolution(present);
            for _ in 0..3 {
                update(&mut selection);
                let target = present.chain().targets[0];
                assert_eq!(selection.target(), target);
                assert_eq!(selection.internal(), target.chain().internals[0]);
                assert_eq!(selection.target_index(), 0);
                assert_eq!(selection.internal_index(), 0);
            }
        }
    }

    #[test]
    fn test_target_change_resets_internal() {
        let mut selection =
            ResolutionSelection::new(PresentResolutionKey::P2160p, UpscaleTechnique::None);
        selection.select_internal_index(2).unwrap();
        update(&mut selection);
        assert_eq!(selection.internal(), ResolutionKey::R1080p);

        selection.select_target_index(1).unwrap();
        assert!(selection.update_target_resolution());
        selection.update_internal_resolution();
        assert_eq!(selection.target(), TargetResolutionKey::T1080p);
        assert_eq!(selection.internal(), ResolutionKey::R1080p);
        assert_eq!(selection.internal_index(), 0);
        assert!(!selection.update_target_resolution());
    }

    #[test]
    fn test_internal_change_is_downstream_only() {
        let mut selection =
            ResolutionSelection::new(PresentResolutionKey::P2160p, UpscaleTechnique::None);
        selection.select_target_index(1).unwrap();
        update(&mut selection);
        let (present, target) = (selection.present(), selection.target());

        for index in 0..selection.internal_resolution_texts().len() {
            selection.select_internal_index(index).unwrap();
            update(&mut selection);
            assert_eq!(selection.present(), present);
            assert_eq!(selection.target(), target);
            assert_eq!(selection.internal(), target.chain().internals[index]);
        }
    }

    #[test]
    fn test_target_change_keeps_present() {
        let mut selection =
            ResolutionSelection::new(PresentResolutionKey::P2160p, UpscaleTechnique::None);
        for index in [1, 0, 1] {
            selection.select_target_index(index).unwrap();
            update(&mut selection);
            assert_eq!(selection.present(), PresentResolutionKey::P2160p);
        }
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let mut selection =
            ResolutionSelection::new(PresentResolutionKey::P1080p, UpscaleTechnique::None);
        assert_eq!(
            selection.select_target_index(1),
            Err(SelectionError::IndexOutOfRange { index: 1, len: 1 })
        );
        assert_eq!(
            selection.select_internal_index(4),
            Err(SelectionError::IndexOutOfRange { index: 4, len: 4 })
        );
        assert_eq!(selection.internal_index(), 0);
    }

    #[test]
    fn test_checkerboard_uses_half_resolution() {
        let mut selection =
            ResolutionSelection::new(PresentResolutionKey::P1080p, UpscaleTechnique::None);
        selection.select_internal_index(3).unwrap();
        update(&mut selection);
        assert_eq!(selection.internal_extent(), Extent2D::new(960, 540));

        selection.select_technique(UpscaleTechnique::Checkerboard);
        update(&mut selection);
        assert_eq!(selection.internal_extent(), CheckerboardResolutionKey::Cb1080p.extent());
        assert_eq!(selection.internal_resolution_texts(), vec!["960x540 (CB 1920x1080)"]);
        assert_eq!(selection.internal_display_index(), 0);

        selection.select_technique(UpscaleTechnique::Cas);
        update(&mut selection);
        assert_eq!(selection.internal(), ResolutionKey::R540p);
    }

    #[test]
    fn test_technique_index_selection() {
        let mut selection =
            ResolutionSelection::new(PresentResolutionKey::P1080p, UpscaleTechnique::None);
        selection.select_technique_index(2).unwrap();
        assert_eq!(selection.technique(), UpscaleTechnique::Checkerboard);
        assert_eq!(
            selection.select_technique_index(3),
            Err(SelectionError::UnknownTechnique(3))
        );
        assert_eq!(selection.technique(), UpscaleTechnique::Checkerboard);
    }
}
