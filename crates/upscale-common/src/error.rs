//! Error types for resolution lookup and UI-driven selection.

use thiserror::Error;

/// Lookup failures against the static resolution tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No present chain has a canonical resolution with this width.
    #[error("no present resolution matches a window width of {0} pixels")]
    UnknownPresentWidth(u32),
}

/// A UI ordinal did not name a currently valid candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("selection index {index} is outside the {len} valid candidates")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("no upscale technique has ordinal {0}")]
    UnknownTechnique(usize),
}
