//! Dab rasterization into the scratch surface.

use tracing::debug;

use super::TiledSurface;
use crate::types::{BlendMode, DabPlacement, DirtyRect, MaskKind};

impl TiledSurface {
    /// Rasterize one dab into the scratch.
    ///
    /// The footprint is a rotated ellipse with hardness-controlled edge
    /// falloff. Returns the affected region, or None when the dab lies
    /// entirely outside the surface.
    pub fn stamp(&mut self, dab: &DabPlacement, mode: BlendMode) -> Option<DirtyRect> {
        let (radius_major, radius_minor) = dab.radii();
        let alpha = dab.stamp_alpha();
        if radius_major <= 0.0 || alpha <= 0.0 {
            debug!("stamp skipped: degenerate radius or alpha");
            return None;
        }

        // Flips mirror the tip about its own axes, which for an ellipse
        // mask reduces to negating the effective rotation.
        let angle = match (dab.flip_x, dab.flip_y) {
            (true, false) | (false, true) => -dab.angle,
            _ => dab.angle,
        };
        let cos_a = angle.cos();
        let sin_a = angle.sin();
        let cos_sq = cos_a * cos_a;
        let sin_sq = sin_a * sin_a;

        // Bounding box of the rotated ellipse: half-extents
        //   half_w = sqrt(a^2 cos^2 + b^2 sin^2)
        //   half_h = sqrt(a^2 sin^2 + b^2 cos^2)
        let a_sq = radius_major * radius_major;
        let b_sq = radius_minor * radius_minor;
        let half_w = (a_sq * cos_sq + b_sq * sin_sq).sqrt();
        let half_h = (a_sq * sin_sq + b_sq * cos_sq).sqrt();

        let bounds = DirtyRect::new(
            (dab.x - half_w).floor() as i32,
            (dab.y - half_h).floor() as i32,
            (dab.x + half_w).ceil() as i32,
            (dab.y + half_h).ceil() as i32,
        )
        .clamped(self.surface.width, self.surface.height);
        if bounds.is_empty() {
            return None;
        }

        let wet_cap = dab.wet_edge.then_some(alpha);
        let grain_seed = dab.texture.unwrap_or(0);

        for py in bounds.min_y as u32..bounds.max_y as u32 {
            for px in bounds.min_x as u32..bounds.max_x as u32 {
                // Sample at the pixel center, rotated into tip space.
                let dx = (px as f32 + 0.5) - dab.x;
                let dy = (py as f32 + 0.5) - dab.y;
                let local_x = dx * cos_a + dy * sin_a;
                let local_y = -dx * sin_a + dy * cos_a;

                let nx = local_x / radius_major;
                let ny = local_y / radius_minor;
                let dist_sq = nx * nx + ny * ny;
                if dist_sq > 1.0 {
                    continue;
                }

                let mut coverage = mask_coverage(dist_sq.sqrt(), dab.hardness, dab.mask);
                if coverage <= 0.0 {
                    continue;
                }
                if dab.mask == MaskKind::Grain {
                    coverage *= grain_value(px, py, grain_seed);
                }

                let pixel_alpha = alpha * coverage;
                match mode {
                    BlendMode::Normal => {
                        self.surface.blend_pixel(px, py, dab.color, pixel_alpha, wet_cap);
                    }
                    BlendMode::Erase => {
                        self.surface.erase_pixel(px, py, pixel_alpha);
                    }
                }
            }
        }

        self.mark_rect_dirty(bounds);
        Some(bounds)
    }
}

/// Edge coverage at a normalized distance (0 center, 1 edge) for a mask.
///
/// Hardness interpolates between a linear falloff and a hard disc.
#[inline]
pub fn mask_coverage(distance_norm: f32, hardness: f32, mask: MaskKind) -> f32 {
    match mask {
        MaskKind::Flat => {
            if distance_norm <= 1.0 {
                1.0
            } else {
                0.0
            }
        }
        MaskKind::SoftRound | MaskKind::Grain => {
            if hardness >= 1.0 {
                if distance_norm <= 1.0 { 1.0 } else { 0.0 }
            } else {
                let t = distance_norm.clamp(0.0, 1.0);
                let soft = 1.0 - t;
                soft * (1.0 - hardness) + hardness
            }
        }
    }
}

/// One round of the 32-bit PCG output permutation. This exact function is
/// duplicated in the GPU backend's shader so both backends grain alike.
#[inline]
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Procedural grain in [0.25, 1.0], stable per pixel and texture id.
#[inline]
pub fn grain_value(px: u32, py: u32, seed: u32) -> f32 {
    let h = pcg_hash(px ^ pcg_hash(py ^ pcg_hash(seed)));
    0.25 + 0.75 * ((h >> 8) as f32 / (1u32 << 24) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage_hard_disc() {
        assert_eq!(mask_coverage(0.0, 1.0, MaskKind::SoftRound), 1.0);
        assert_eq!(mask_coverage(0.99, 1.0, MaskKind::SoftRound), 1.0);
        assert_eq!(mask_coverage(1.01, 1.0, MaskKind::SoftRound), 0.0);
    }

    #[test]
    fn test_coverage_soft_falloff() {
        assert_eq!(mask_coverage(0.0, 0.0, MaskKind::SoftRound), 1.0);
        assert!((mask_coverage(0.5, 0.0, MaskKind::SoftRound) - 0.5).abs() < 1e-6);
        assert!(mask_coverage(1.0, 0.0, MaskKind::SoftRound) < 1e-6);

        // Mid hardness sits between soft and hard.
        let mid = mask_coverage(0.5, 0.5, MaskKind::SoftRound);
        assert!(mid > 0.5 && mid < 1.0);
    }

    #[test]
    fn test_flat_mask_full_inside() {
        assert_eq!(mask_coverage(0.9, 0.0, MaskKind::Flat), 1.0);
        assert_eq!(mask_coverage(1.1, 0.0, MaskKind::Flat), 0.0);
    }

    #[test]
    fn test_grain_stable_and_bounded() {
        let a = grain_value(10, 20, 7);
        let b = grain_value(10, 20, 7);
        assert_eq!(a, b);
        assert!((0.25..=1.0).contains(&a));
        // Different texture ids decorrelate.
        assert_ne!(grain_value(10, 20, 7), grain_value(10, 20, 8));
    }
}
