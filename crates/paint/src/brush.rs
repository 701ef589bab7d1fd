//! Brush configuration snapshot.
//!
//! The stroke pipeline receives a read-only [`BrushConfig`] per processed
//! sample and must not cache it across samples: configuration may change
//! mid-stroke (size slider drag, color pick) and later dabs must follow.

use crate::constants::MIN_DAB_FOOTPRINT;
use crate::types::{BlendMode, MaskKind, TextureId};
use serde::{Deserialize, Serialize};

/// Optional per-dab dynamics. All effects are pure functions of the dab
/// context and never alter spacing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DynamicsConfig {
    /// Scale dab size by curved pressure.
    pub size_by_pressure: bool,
    /// Scale dab opacity by curved pressure.
    pub opacity_by_pressure: bool,
    /// Amount [0, 1] by which high speed thins the dab.
    pub size_by_speed: f32,
    /// Align the tip angle to the travel direction.
    pub angle_by_direction: bool,
    /// Flatten and orient the tip along stylus tilt.
    pub shape_by_tilt: bool,
    /// Random tip-angle jitter amount [0, 1].
    pub shape_jitter: f32,
    /// Random placement scatter, as a multiple of dab size.
    pub scatter: f32,
    /// Random per-dab color value jitter amount [0, 1].
    pub color_jitter: f32,
    /// Secondary stamp: (size ratio, offset as multiple of dab size).
    pub dual_tip: Option<DualTipConfig>,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            size_by_pressure: true,
            opacity_by_pressure: true,
            size_by_speed: 0.0,
            angle_by_direction: false,
            shape_by_tilt: false,
            shape_jitter: 0.0,
            scatter: 0.0,
            color_jitter: 0.0,
            dual_tip: None,
        }
    }
}

/// Secondary-tip stamping configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DualTipConfig {
    /// Secondary size as a fraction of the primary size.
    pub size_ratio: f32,
    /// Offset from the primary center, as a multiple of primary size,
    /// perpendicular to the travel direction.
    pub offset: f32,
    /// Flow multiplier for the secondary stamp.
    pub flow_ratio: f32,
}

/// Read-only brush snapshot consulted once per processed sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrushConfig {
    /// Base diameter in canvas units
    pub size: f32,
    /// Fraction of `size` at zero pressure when size follows pressure
    pub min_size_fraction: f32,
    /// Edge hardness: 0.0 = soft, 1.0 = hard
    pub hardness: f32,
    /// Base opacity 0.0-1.0 (stroke-level, applied at commit)
    pub opacity: f32,
    /// Per-dab paint amount 0.0-1.0
    pub flow: f32,
    /// Spacing as a fraction of the smaller tip extent
    pub spacing_fraction: f32,
    /// Tip minor/major axis ratio in (0, 1]
    pub roundness: f32,
    /// Tip rotation in degrees
    pub angle_deg: f32,
    pub flip_x: bool,
    pub flip_y: bool,
    /// Straight-alpha RGBA color
    pub color: [f32; 4],
    pub blend_mode: BlendMode,
    pub mask: MaskKind,
    /// Optional tip texture: id plus its height/width aspect ratio
    pub texture: Option<BrushTexture>,
    pub wet_edge: bool,
    pub dynamics: DynamicsConfig,
}

/// Tip texture reference. The aspect ratio participates in the spacing
/// policy so stamp density stays visually constant for non-square tips.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BrushTexture {
    pub id: TextureId,
    pub aspect: f32,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            size: 20.0,
            min_size_fraction: 0.1,
            hardness: 0.8,
            opacity: 1.0,
            flow: 1.0,
            spacing_fraction: 0.25,
            roundness: 1.0,
            angle_deg: 0.0,
            flip_x: false,
            flip_y: false,
            color: [0.0, 0.0, 0.0, 1.0],
            blend_mode: BlendMode::Normal,
            mask: MaskKind::SoftRound,
            texture: None,
            wet_edge: false,
            dynamics: DynamicsConfig::default(),
        }
    }
}

impl BrushConfig {
    /// Tip extents (width, height) in canvas units, before pressure.
    ///
    /// Height follows roundness; a textured tip additionally carries its
    /// own aspect ratio. Both extents respect the minimum footprint.
    pub fn tip_extents(&self) -> (f32, f32) {
        let width = self.size.max(MIN_DAB_FOOTPRINT);
        let mut height = width * self.roundness.clamp(0.01, 1.0);
        if let Some(texture) = self.texture {
            height *= texture.aspect.clamp(0.05, 1.0);
        }
        (width, height.max(MIN_DAB_FOOTPRINT * 0.05))
    }

    /// Spacing distance: fraction of the smaller tip extent, keeping stamp
    /// density visually constant independent of brush shape.
    pub fn spacing_distance(&self) -> f32 {
        let (w, h) = self.tip_extents();
        (self.spacing_fraction.max(0.01) * w.min(h)).max(crate::constants::MIN_SPACING_DISTANCE)
    }
}
