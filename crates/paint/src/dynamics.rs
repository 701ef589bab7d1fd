//! Deterministic per-dab dynamics.
//!
//! Jitter, scatter, and color variation are pure functions of the dab
//! context: the same stroke seed and dab index always produce the same
//! placement, so a replayed stroke is pixel-identical. Randomness comes
//! from a splitmix-style integer hash, not a stateful RNG.

use crate::types::DabPlacement;

/// One round of splitmix64.
#[inline]
pub fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Hash a (seed, index, salt) triple.
#[inline]
pub fn dab_hash(stroke_seed: u64, dab_index: u64, salt: u64) -> u64 {
    splitmix64(stroke_seed ^ splitmix64(dab_index.wrapping_add(salt.wrapping_mul(0x51_7C_C1_B7))))
}

/// Map a hash to [0, 1).
#[inline]
pub fn unit_f32(hash: u64) -> f32 {
    (hash >> 40) as f32 / (1u64 << 24) as f32
}

/// Map a hash to [-1, 1).
#[inline]
pub fn signed_unit_f32(hash: u64) -> f32 {
    unit_f32(hash) * 2.0 - 1.0
}

/// Identity of a dab within its stroke, for dynamics hashing.
#[derive(Debug, Clone, Copy)]
pub struct DabContext {
    pub stroke_seed: u64,
    pub dab_index: u64,
}

/// Angle jitter in radians: up to +/- pi for full amount.
pub fn jitter_angle(ctx: DabContext, amount: f32) -> f32 {
    if amount <= 0.0 {
        return 0.0;
    }
    signed_unit_f32(dab_hash(ctx.stroke_seed, ctx.dab_index, 1))
        * amount.clamp(0.0, 1.0)
        * std::f32::consts::PI
}

/// Placement scatter offset, as a fraction of `size` per axis.
pub fn scatter_offset(ctx: DabContext, amount: f32, size: f32) -> (f32, f32) {
    if amount <= 0.0 {
        return (0.0, 0.0);
    }
    let amount = amount.clamp(0.0, 4.0) * size;
    (
        signed_unit_f32(dab_hash(ctx.stroke_seed, ctx.dab_index, 2)) * amount,
        signed_unit_f32(dab_hash(ctx.stroke_seed, ctx.dab_index, 3)) * amount,
    )
}

/// Per-dab value jitter on the RGB channels; alpha is untouched.
pub fn jitter_color(ctx: DabContext, color: [f32; 4], amount: f32) -> [f32; 4] {
    if amount <= 0.0 {
        return color;
    }
    let shift = signed_unit_f32(dab_hash(ctx.stroke_seed, ctx.dab_index, 4)) * amount.clamp(0.0, 1.0);
    [
        (color[0] + shift).clamp(0.0, 1.0),
        (color[1] + shift).clamp(0.0, 1.0),
        (color[2] + shift).clamp(0.0, 1.0),
        color[3],
    ]
}

/// Derive the secondary stamp of a dual-tip brush from the primary dab.
///
/// The secondary sits perpendicular to the travel direction and inherits
/// every field that does not depend on its own footprint.
pub fn dual_tip_placement(
    primary: &DabPlacement,
    direction: f32,
    size_ratio: f32,
    offset: f32,
    flow_ratio: f32,
) -> DabPlacement {
    let normal = direction + std::f32::consts::FRAC_PI_2;
    let distance = offset * primary.size;
    DabPlacement {
        x: primary.x + normal.cos() * distance,
        y: primary.y + normal.sin() * distance,
        size: (primary.size * size_ratio.clamp(0.05, 1.0)).max(crate::constants::MIN_DAB_FOOTPRINT),
        flow: (primary.flow * flow_ratio).clamp(0.0, 1.0),
        ..*primary
    }
}
