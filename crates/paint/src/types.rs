use serde::{Deserialize, Serialize};

/// Blend modes for stroke compositing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum BlendMode {
    #[default]
    Normal = 0,
    Erase = 1,
}

/// Which mask shapes a dab's footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum MaskKind {
    /// Soft round mask with hardness-controlled falloff.
    #[default]
    SoftRound = 0,
    /// Hard-edged mask, full coverage inside the footprint.
    Flat = 1,
    /// Soft round mask modulated by procedural grain.
    Grain = 2,
}

/// Identifier for a brush tip texture. Grain masks hash this into their
/// noise so two textures produce different (but stable) patterns.
pub type TextureId = u32;

/// Which accumulator backend is rasterizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    Cpu,
    Gpu,
}

/// One brush stamp, derived deterministically from input samples.
///
/// Immutable once emitted by the dab generator; consumed exactly once by
/// the stroke accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DabPlacement {
    /// Center in canvas space
    pub x: f32,
    pub y: f32,
    /// Diameter along the major axis, in canvas units
    pub size: f32,
    /// Minor/major axis ratio in (0, 1]
    pub roundness: f32,
    /// Rotation in radians, counter-clockwise
    pub angle: f32,
    pub flip_x: bool,
    pub flip_y: bool,
    /// Per-stamp paint amount in [0, 1]
    pub flow: f32,
    /// Pressure-derived stamp opacity in [0, 1]
    pub opacity: f32,
    /// Straight-alpha RGBA color
    pub color: [f32; 4],
    /// Edge hardness in [0, 1]
    pub hardness: f32,
    pub mask: MaskKind,
    pub texture: Option<TextureId>,
    /// Cap accumulated scratch alpha at the stamp alpha (watercolor edge)
    pub wet_edge: bool,
    /// Host time of the driving sample
    pub timestamp_us: u64,
    /// Smoothed normalized speed of the driving sample in [0, 1]
    pub speed_norm: f32,
}

impl DabPlacement {
    /// Effective alpha this stamp contributes before masking.
    #[inline]
    pub fn stamp_alpha(&self) -> f32 {
        (self.flow * self.opacity).clamp(0.0, 1.0)
    }

    /// Major and minor radii of the footprint.
    #[inline]
    pub fn radii(&self) -> (f32, f32) {
        let major = (self.size * 0.5).max(0.0);
        (major, major * self.roundness.clamp(0.01, 1.0))
    }
}

/// GPU-compatible dab record for buffer upload.
///
/// Field order is arranged for std430-friendly 16-byte alignment.
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct GpuDab {
    /// Center (x, y) in canvas space
    pub center: [f32; 2],
    /// Major and minor radii
    pub radii: [f32; 2],
    /// Straight-alpha RGBA color
    pub color: [f32; 4],
    /// (cos, sin) of the rotation angle
    pub rotation: [f32; 2],
    /// Edge hardness 0..1
    pub hardness: f32,
    /// flow * opacity, premultiplied on the CPU side
    pub alpha: f32,
    /// Mask discriminant (`MaskKind` as u32)
    pub mask: u32,
    /// Grain seed (texture id), 0 when unused
    pub grain_seed: u32,
    /// Wet-edge alpha ceiling; <= 0 disables the cap
    pub wet_cap: f32,
    pub _padding: u32,
}

impl GpuDab {
    pub fn from_placement(dab: &DabPlacement) -> Self {
        let (major, minor) = dab.radii();
        // Flips fold into the rotation basis: mirroring an ellipse about
        // its own axes negates the corresponding sine component.
        let sign = if dab.flip_x != dab.flip_y { -1.0 } else { 1.0 };
        Self {
            center: [dab.x, dab.y],
            radii: [major, minor],
            color: dab.color,
            rotation: [dab.angle.cos(), dab.angle.sin() * sign],
            hardness: dab.hardness.clamp(0.0, 1.0),
            alpha: dab.stamp_alpha(),
            mask: dab.mask as u32,
            grain_seed: dab.texture.unwrap_or(0),
            wet_cap: if dab.wet_edge { dab.stamp_alpha() } else { -1.0 },
            _padding: 0,
        }
    }
}

/// Integer dirty rectangle, exclusive max.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl DirtyRect {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        (self.max_x - self.min_x).max(0) as u32
    }

    #[inline]
    pub fn height(&self) -> u32 {
        (self.max_y - self.min_y).max(0) as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }

    /// Smallest rect covering both.
    pub fn union(&self, other: &DirtyRect) -> DirtyRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        DirtyRect {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Clamp to a surface of the given dimensions.
    pub fn clamped(&self, width: u32, height: u32) -> DirtyRect {
        DirtyRect {
            min_x: self.min_x.clamp(0, width as i32),
            min_y: self.min_y.clamp(0, height as i32),
            max_x: self.max_x.clamp(0, width as i32),
            max_y: self.max_y.clamp(0, height as i32),
        }
    }
}
