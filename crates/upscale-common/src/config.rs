//! Startup configuration for the demo.

use crate::resolution::{Extent2D, PresentResolutionKey};
use crate::technique::UpscaleTechnique;

/// Default per-frame capacity of the constant streaming buffer.
pub const DEFAULT_CONSTANT_BUFFER_BYTES: u64 = 1024 * 1024;

/// Default number of frames the CPU may record ahead of the GPU.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound on frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

pub const MIN_DELTA_AMPLIFIER: f32 = 1.0;
pub const MAX_DELTA_AMPLIFIER: f32 = 32.0;

/// Settings fixed at startup.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Window/swapchain size requested at startup.
    pub present_extent: Extent2D,
    pub frames_in_flight: usize,
    pub constant_buffer_bytes: u64,
    pub technique: UpscaleTechnique,
    /// CAS sharpness, 0 = least ringing, 1 = strongest sharpening.
    pub cas_sharpness: f32,
    /// Scale applied to the upscaled/reference difference in the delta view.
    pub delta_amplifier: f32,
    pub enable_validation: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            present_extent: PresentResolutionKey::P1080p.extent(),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            constant_buffer_bytes: DEFAULT_CONSTANT_BUFFER_BYTES,
            technique: UpscaleTechnique::None,
            cas_sharpness: 0.5,
            delta_amplifier: 4.0,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl DemoConfig {
    /// Build the configuration for a requested present height.
    ///
    /// Only 1080 and 2160 are supported; anything else falls back to the
    /// 1920x1080 defaults with a warning.
    pub fn for_present_height(height: u32) -> Self {
        let present = match height {
            1080 => PresentResolutionKey::P1080p,
            2160 => PresentResolutionKey::P2160p,
            other => {
                log::warn!("Unsupported present height {}, using 1920x1080", other);
                PresentResolutionKey::P1080p
            }
        };
        Self {
            present_extent: present.extent(),
            ..Self::default()
        }
    }

    /// Set frames in flight, clamped to the supported range.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        let clamped = frames.clamp(1, MAX_FRAMES_IN_FLIGHT);
        if clamped != frames {
            log::warn!("Frames in flight {} out of range, using {}", frames, clamped);
        }
        self.frames_in_flight = clamped;
        self
    }

    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }
}

/// Clamp a delta amplifier value to its slider range.
pub fn clamp_delta_amplifier(value: f32) -> f32 {
    value.clamp(MIN_DELTA_AMPLIFIER, MAX_DELTA_AMPLIFIER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_heights() {
        assert_eq!(DemoConfig::for_present_height(1080).present_extent, Extent2D::new(1920, 1080));
        assert_eq!(DemoConfig::for_present_height(2160).present_extent, Extent2D::new(3840, 2160));
    }

    #[test]
    fn test_unsupported_height_falls_back() {
        let config = DemoConfig::for_present_height(1440);
        assert_eq!(config.present_extent, Extent2D::new(1920, 1080));
        assert_eq!(config.frames_in_flight, DEFAULT_FRAMES_IN_FLIGHT);
        assert_eq!(config.constant_buffer_bytes, 1_048_576);
    }

    #[test]
    fn test_frames_in_flight_clamped() {
        assert_eq!(DemoConfig::default().with_frames_in_flight(0).frames_in_flight, 1);
        assert_eq!(DemoConfig::default().with_frames_in_flight(8).frames_in_flight, 3);
        assert_eq!(DemoConfig::default().with_frames_in_flight(2).frames_in_flight, 2);
    }

    #[test]
    fn test_delta_amplifier_clamp() {
        assert_eq!(clamp_delta_amplifier(0.0), 1.0);
        assert_eq!(clamp_delta_amplifier(64.0), 32.0);
        assert_eq!(clamp_delta_amplifier(8.0), 8.0);
    }
}
