//! Static resolution catalog.
//!
//! Three chained tables:
//! - present chains map a display resolution to the target resolutions it allows,
//! - target chains map a target resolution to its internal-resolution candidates
//!   and to the half-resolution extent used by checkerboard rendering,
//! - the resolution infos themselves.
//!
//! The first entry of every candidate list is the default selection.

use crate::error::ResolutionError;

/// Pixel extent, independent of any graphics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions halved.
    pub const fn halved(self) -> Self {
        Self::new(self.width / 2, self.height / 2)
    }
}

impl std::fmt::Display for Extent2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A named resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionInfo<K> {
    pub key: K,
    pub extent: Extent2D,
    pub text: &'static str,
}

/// Full-coverage resolutions usable as internal, target or present extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionKey {
    R540p,
    R720p,
    R900p,
    R1080p,
    R1440p,
    R2160p,
}

static RESOLUTIONS: [ResolutionInfo<ResolutionKey>; 6] = [
    ResolutionInfo { key: ResolutionKey::R540p, extent: Extent2D::new(960, 540), text: "960x540" },
    ResolutionInfo { key: ResolutionKey::R720p, extent: Extent2D::new(1280, 720), text: "1280x720" },
    ResolutionInfo { key: ResolutionKey::R900p, extent: Extent2D::new(1600, 900), text: "1600x900" },
    ResolutionInfo { key: ResolutionKey::R1080p, extent: Extent2D::new(1920, 1080), text: "1920x1080" },
    ResolutionInfo { key: ResolutionKey::R1440p, extent: Extent2D::new(2560, 1440), text: "2560x1440" },
    ResolutionInfo { key: ResolutionKey::R2160p, extent: Extent2D::new(3840, 2160), text: "3840x2160" },
];

impl ResolutionKey {
    pub const ALL: [ResolutionKey; 6] = [
        ResolutionKey::R540p,
        ResolutionKey::R720p,
        ResolutionKey::R900p,
        ResolutionKey::R1080p,
        ResolutionKey::R1440p,
        ResolutionKey::R2160p,
    ];

    pub fn info(self) -> &'static ResolutionInfo<ResolutionKey> {
        &RESOLUTIONS[self as usize]
    }

    pub fn extent(self) -> Extent2D {
        self.info().extent
    }

    pub fn text(self) -> &'static str {
        self.info().text
    }
}

/// Half-resolution field extents rendered by the checkerboard technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckerboardResolutionKey {
    Cb1080p,
    Cb2160p,
}

static CHECKERBOARD_RESOLUTIONS: [ResolutionInfo<CheckerboardResolutionKey>; 2] = [
    ResolutionInfo {
        key: CheckerboardResolutionKey::Cb1080p,
        extent: Extent2D::new(960, 540),
        text: "960x540 (CB 1920x1080)",
    },
    ResolutionInfo {
        key: CheckerboardResolutionKey::Cb2160p,
        extent: Extent2D::new(1920, 1080),
        text: "1920x1080 (CB 3840x2160)",
    },
];

impl CheckerboardResolutionKey {
    pub const ALL: [CheckerboardResolutionKey; 2] =
        [CheckerboardResolutionKey::Cb1080p, CheckerboardResolutionKey::Cb2160p];

    pub fn info(self) -> &'static ResolutionInfo<CheckerboardResolutionKey> {
        &CHECKERBOARD_RESOLUTIONS[self as usize]
    }

    pub fn extent(self) -> Extent2D {
        self.info().extent
    }

    pub fn text(self) -> &'static str {
        self.info().text
    }
}

/// Resolutions the upscaler may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetResolutionKey {
    T1080p,
    T2160p,
}

/// Allowed internal resolutions for one target resolution.
#[derive(Debug)]
pub struct TargetResolutionChain {
    pub key: TargetResolutionKey,
    /// Destination size of the upscale.
    pub resolution: ResolutionKey,
    /// Candidates offered to the user, default first.
    pub internals: &'static [ResolutionKey],
    pub checkerboard: CheckerboardResolutionKey,
}

static TARGET_CHAINS: [TargetResolutionChain; 2] = [
    TargetResolutionChain {
        key: TargetResolutionKey::T1080p,
        resolution: ResolutionKey::R1080p,
        internals: &[
            ResolutionKey::R1080p,
            ResolutionKey::R900p,
            ResolutionKey::R720p,
            ResolutionKey::R540p,
        ],
        checkerboard: CheckerboardResolutionKey::Cb1080p,
    },
    TargetResolutionChain {
        key: TargetResolutionKey::T2160p,
        resolution: ResolutionKey::R2160p,
        internals: &[ResolutionKey::R2160p, ResolutionKey::R1440p, ResolutionKey::R1080p],
        checkerboard: CheckerboardResolutionKey::Cb2160p,
    },
];

impl TargetResolutionKey {
    pub const ALL: [TargetResolutionKey; 2] =
        [TargetResolutionKey::T1080p, TargetResolutionKey::T2160p];

    pub fn chain(self) -> &'static TargetResolutionChain {
        &TARGET_CHAINS[self as usize]
    }

    pub fn extent(self) -> Extent2D {
        self.chain().resolution.extent()
    }

    pub fn text(self) -> &'static str {
        self.chain().resolution.text()
    }
}

/// Display resolutions the swapchain can run at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentResolutionKey {
    P1080p,
    P2160p,
}

/// Allowed target resolutions for one present resolution.
#[derive(Debug)]
pub struct PresentResolutionChain {
    pub key: PresentResolutionKey,
    pub resolution: ResolutionKey,
    /// Candidates offered to the user, default first.
    pub targets: &'static [TargetResolutionKey],
}

static PRESENT_CHAINS: [PresentResolutionChain; 2] = [
    PresentResolutionChain {
        key: PresentResolutionKey::P1080p,
        resolution: ResolutionKey::R1080p,
        targets: &[TargetResolutionKey::T1080p],
    },
    PresentResolutionChain {
        key: PresentResolutionKey::P2160p,
        resolution: ResolutionKey::R2160p,
        targets: &[TargetResolutionKey::T2160p, TargetResolutionKey::T1080p],
    },
];

impl PresentResolutionKey {
    pub const ALL: [PresentResolutionKey; 2] =
        [PresentResolutionKey::P1080p, PresentResolutionKey::P2160p];

    pub fn chain(self) -> &'static PresentResolutionChain {
        &PRESENT_CHAINS[self as usize]
    }

    pub fn extent(self) -> Extent2D {
        self.chain().resolution.extent()
    }

    pub fn text(self) -> &'static str {
        self.chain().resolution.text()
    }
}

/// Find the present chain whose canonical resolution is `width` pixels wide.
pub fn find_present_resolution_key(width: u32) -> Result<PresentResolutionKey, ResolutionError> {
    PRESENT_CHAINS
        .iter()
        .find(|chain| chain.resolution.extent().width == width)
        .map(|chain| chain.key)
        .ok_or(ResolutionError::UnknownPresentWidth(width))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_indexed_by_key() {
        for key in ResolutionKey::ALL {
            assert_eq!(key.info().key, key);
        }
        for key in CheckerboardResolutionKey::ALL {
            assert_eq!(key.info().key, key);
        }
        for key in TargetResolutionKey::ALL {
            assert_eq!(key.chain().key, key);
        }
        for key in PresentResolutionKey::ALL {
            assert_eq!(key.chain().key, key);
        }
    }

    #[test]
    fn test_extents_positive_and_unique() {
        for (i, a) in ResolutionKey::ALL.iter().enumerate() {
            let extent = a.extent();
            assert!(extent.width > 0 && extent.height > 0);
            for b in &ResolutionKey::ALL[i + 1..] {
                assert_ne!(extent, b.extent(), "{:?} and {:?} share an extent", a, b);
            }
        }
    }

    #[test]
    fn test_checkerboard_extent_is_half_target() {
        for key in TargetResolutionKey::ALL {
            let chain = key.chain();
            assert_eq!(chain.checkerboard.extent(), key.extent().halved());
        }
    }

    #[test]
    fn test_candidate_lists_non_empty() {
        for key in TargetResolutionKey::ALL {
            assert!(!key.chain().internals.is_empty());
        }
        for key in PresentResolutionKey::ALL {
            assert!(!key.chain().targets.is_empty());
        }
    }

    #[test]
    fn test_find_present_round_trip() {
        for key in PresentResolutionKey::ALL {
            assert_eq!(find_present_resolution_key(key.extent().width), Ok(key));
        }
    }

    #[test]
    fn test_find_present_unknown_width() {
        assert_eq!(
            find_present_resolution_key(1366),
            Err(ResolutionError::UnknownPresentWidth(1366))
        );
    }
}
