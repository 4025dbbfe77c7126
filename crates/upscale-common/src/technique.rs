//! Upscale technique selection.

use crate::error::SelectionError;

/// Technique used to bring the internal-resolution image up to target resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpscaleTechnique {
    /// Straight scaled copy.
    #[default]
    None,
    /// Contrast-adaptive sharpening spatial upscale.
    Cas,
    /// Temporal half-resolution interleaved upscale.
    Checkerboard,
}

impl UpscaleTechnique {
    /// All techniques in UI order.
    pub const ALL: [UpscaleTechnique; 3] = [
        UpscaleTechnique::None,
        UpscaleTechnique::Cas,
        UpscaleTechnique::Checkerboard,
    ];

    /// Display name for the technique combo box.
    pub fn name(self) -> &'static str {
        match self {
            UpscaleTechnique::None => "None",
            UpscaleTechnique::Cas => "CAS",
            UpscaleTechnique::Checkerboard => "Checkerboard",
        }
    }

    /// UI ordinal of this technique.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Map a UI ordinal back to a technique.
    pub fn from_index(index: usize) -> Result<Self, SelectionError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(SelectionError::UnknownTechnique(index))
    }

    pub fn is_checkerboard(self) -> bool {
        self == UpscaleTechnique::Checkerboard
    }

    /// Names of every technique, for populating the combo box.
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.name()).collect()
    }
}

impl std::fmt::Display for UpscaleTechnique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
