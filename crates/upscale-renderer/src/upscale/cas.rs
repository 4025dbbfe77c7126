//! Contrast-adaptive sharpening setup.
//!
//! Produces the two constant vectors the CAS shader expects, following the
//! FidelityFX `CasSetup` packing: floats are passed as raw bits so the
//! shader can reinterpret them, and the half-precision path reads the
//! sharpness as a packed f16 pair.

use half::f16;
use upscale_common::Extent2D;

/// Workgroup edge the CAS dispatch assumes, independent of the shader.
pub const CAS_GROUP_SIZE: u32 = 16;

/// Constants consumed by `cas.comp`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CasConstants {
    pub const0: [u32; 4],
    pub const1: [u32; 4],
}

/// Build CAS constants for scaling `input` to `output`.
///
/// `sharpness` is saturated to `0..=1`; 0 gives the least ringing, 1 the
/// strongest sharpening.
pub fn cas_setup(sharpness: f32, input: Extent2D, output: Extent2D) -> CasConstants {
    let in_x = input.width as f32;
    let in_y = input.height as f32;
    let scale_x = in_x * (1.0 / output.width as f32);
    let scale_y = in_y * (1.0 / output.height as f32);

    let const0 = [
        scale_x.to_bits(),
        scale_y.to_bits(),
        (0.5 * scale_x - 0.5).to_bits(),
        (0.5 * scale_y - 0.5).to_bits(),
    ];

    let sharp = -1.0 / lerp(8.0, 5.0, sharpness.clamp(0.0, 1.0));
    let const1 = [
        sharp.to_bits(),
        pack_half_2x16(sharp, 0.0),
        (8.0 * scale_x).to_bits(),
        0,
    ];

    CasConstants { const0, const1 }
}

fn lerp(x: f32, y: f32, a: f32) -> f32 {
    x + (y - x) * a
}

/// Pack two floats as IEEE half precision, `lo` in the low 16 bits.
pub fn pack_half_2x16(lo: f32, hi: f32) -> u32 {
    f16::from_f32(lo).to_bits() as u32 | (f16::from_f32(hi).to_bits() as u32) << 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_half_low_word_first() {
        assert_eq!(pack_half_2x16(-0.125, 0.0), 0x0000_b000);
        assert_eq!(pack_half_2x16(0.0, 1.0), 0x3c00_0000);
    }

    #[test]
    fn test_cas_identity_scale() {
        let extent = Extent2D::new(1920, 1080);
        let c = cas_setup(0.0, extent, extent);
        assert_eq!(f32::from_bits(c.const0[0]), 1.0);
        assert_eq!(f32::from_bits(c.const0[1]), 1.0);
        assert_eq!(f32::from_bits(c.const0[2]), 0.0);
        assert_eq!(f32::from_bits(c.const0[3]), 0.0);
        assert_eq!(f32::from_bits(c.const1[0]), -0.125);
        assert_eq!(c.const1[1], 0x0000_b000);
        assert_eq!(f32::from_bits(c.const1[2]), 8.0);
        assert_eq!(c.const1[3], 0);
    }

    #[test]
    fn test_cas_upscale_constants() {
        let c = cas_setup(1.0, Extent2D::new(1280, 720), Extent2D::new(1920, 1080));
        let scale = f32::from_bits(c.const0[0]);
        assert!((scale - 2.0 / 3.0).abs() < 1e-6);
        assert!((f32::from_bits(c.const0[2]) - (scale * 0.5 - 0.5)).abs() < 1e-6);
        assert!((f32::from_bits(c.const1[0]) + 0.2).abs() < 1e-6);
        assert_eq!(c.const1[1] & 0xffff, 0xb266);
        assert!((f32::from_bits(c.const1[2]) - 8.0 * scale).abs() < 1e-5);
    }

    #[test]
    fn test_cas_sharpness_saturated() {
        let e = Extent2D::new(960, 540);
        assert_eq!(cas_setup(-3.0, e, e), cas_setup(0.0, e, e));
        assert_eq!(cas_setup(7.0, e, e), cas_setup(1.0, e, e));
    }
}
