//! Tiled access to the scratch surface with dirty tracking.

mod data_access;
mod dirty_tracking;
mod stamp;

use crate::constants::DEFAULT_TILE_SIZE;
use crate::surface::PixelSurface;
use crate::types::DirtyRect;
use std::collections::HashSet;

pub use stamp::{grain_value, mask_coverage, pcg_hash};

/// Tile coordinates within the tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
}

/// A scratch surface with per-tile dirty flags for display upload and a
/// precise dirty rect for layer commit.
pub struct TiledSurface {
    pub(crate) surface: PixelSurface,
    pub(crate) tile_size: u32,
    tiles_x: u32,
    tiles_y: u32,
    pub(crate) dirty_tiles: HashSet<TileCoord>,
    pub(crate) dirty_rect: Option<DirtyRect>,
}

impl TiledSurface {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        let tile_size = tile_size.max(1);
        let tiles_x = width.div_ceil(tile_size);
        let tiles_y = height.div_ceil(tile_size);

        Self {
            surface: PixelSurface::new(width, height),
            tile_size,
            tiles_x,
            tiles_y,
            dirty_tiles: HashSet::new(),
            dirty_rect: None,
        }
    }

    pub fn with_default_tile_size(width: u32, height: u32) -> Self {
        Self::new(width, height, DEFAULT_TILE_SIZE)
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[inline]
    pub fn tiles_x(&self) -> u32 {
        self.tiles_x
    }

    #[inline]
    pub fn tiles_y(&self) -> u32 {
        self.tiles_y
    }

    #[inline]
    pub fn surface(&self) -> &PixelSurface {
        &self.surface
    }

    #[inline]
    pub fn surface_mut(&mut self) -> &mut PixelSurface {
        &mut self.surface
    }

    /// Clear pixels and all dirty state.
    pub fn clear(&mut self) {
        self.surface.clear();
        self.dirty_tiles.clear();
        self.dirty_rect = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlendMode, DabPlacement, MaskKind};

    fn dab(x: f32, y: f32, size: f32) -> DabPlacement {
        DabPlacement {
            x,
            y,
            size,
            roundness: 1.0,
            angle: 0.0,
            flip_x: false,
            flip_y: false,
            flow: 1.0,
            opacity: 1.0,
            color: [1.0, 0.0, 0.0, 1.0],
            hardness: 1.0,
            mask: MaskKind::SoftRound,
            texture: None,
            wet_edge: false,
            timestamp_us: 0,
            speed_norm: 0.0,
        }
    }

    #[test]
    fn test_tile_grid_dimensions() {
        let surface = TiledSurface::new(256, 256, 128);
        assert_eq!(surface.tiles_x(), 2);
        assert_eq!(surface.tiles_y(), 2);

        let surface = TiledSurface::new(300, 300, 128);
        assert_eq!(surface.tiles_x(), 3);
        assert_eq!(surface.tiles_y(), 3);
    }

    #[test]
    fn test_stamp_marks_dirty() {
        let mut surface = TiledSurface::new(256, 256, 128);
        let rect = surface.stamp(&dab(128.0, 128.0, 20.0), BlendMode::Normal);

        assert!(rect.is_some());
        assert!(surface.has_dirty_tiles());
        assert!(surface.dirty_rect().is_some());

        // Center pixel painted.
        let center = surface.surface().get_pixel(128, 128).unwrap();
        assert!(center[0] > 0.9);
    }

    #[test]
    fn test_stamp_outside_bounds_is_none() {
        let mut surface = TiledSurface::new(64, 64, 32);
        let rect = surface.stamp(&dab(-100.0, -100.0, 10.0), BlendMode::Normal);
        assert!(rect.is_none());
        assert!(!surface.has_dirty_tiles());
    }

    #[test]
    fn test_stamp_spanning_tiles() {
        let mut surface = TiledSurface::new(256, 256, 128);
        // Centered on the tile seam: all four tiles touched.
        surface.stamp(&dab(128.0, 128.0, 40.0), BlendMode::Normal);
        assert_eq!(surface.dirty_tile_count(), 4);
    }

    #[test]
    fn test_erase_stamp_reduces_alpha() {
        let mut surface = TiledSurface::new(64, 64, 32);
        surface.surface_mut().fill([0.0, 1.0, 0.0, 1.0]);

        surface.stamp(&dab(32.0, 32.0, 16.0), BlendMode::Erase);
        let center = surface.surface().get_pixel(32, 32).unwrap();
        assert!(center[3] < 0.5);
    }

    #[test]
    fn test_elliptical_stamp_respects_roundness() {
        let mut surface = TiledSurface::new(64, 64, 32);
        let mut d = dab(32.0, 32.0, 24.0);
        d.roundness = 0.4;
        d.hardness = 1.0;
        surface.stamp(&d, BlendMode::Normal);

        // Along the major (x) axis: painted.
        assert!(surface.surface().get_pixel(42, 32).unwrap()[0] > 0.9);
        // Same distance along the minor axis: outside the ellipse.
        assert!(surface.surface().get_pixel(32, 42).unwrap()[3] < 0.05);
    }

    #[test]
    fn test_rotated_stamp() {
        let mut surface = TiledSurface::new(64, 64, 32);
        let mut d = dab(32.0, 32.0, 24.0);
        d.roundness = 0.3;
        d.angle = std::f32::consts::FRAC_PI_2;
        d.hardness = 1.0;
        surface.stamp(&d, BlendMode::Normal);

        // Major axis now vertical.
        assert!(surface.surface().get_pixel(32, 42).unwrap()[0] > 0.9);
        assert!(surface.surface().get_pixel(42, 32).unwrap()[3] < 0.05);
    }

    #[test]
    fn test_clear_resets_dirty_state() {
        let mut surface = TiledSurface::new(64, 64, 32);
        surface.stamp(&dab(32.0, 32.0, 10.0), BlendMode::Normal);
        surface.clear();

        assert!(!surface.has_dirty_tiles());
        assert!(surface.dirty_rect().is_none());
        assert_eq!(surface.surface().get_pixel(32, 32), Some([0.0; 4]));
    }

    #[test]
    fn test_take_dirty_tiles_drains() {
        let mut surface = TiledSurface::new(256, 256, 128);
        surface.stamp(&dab(10.0, 10.0, 8.0), BlendMode::Normal);

        let tiles = surface.take_dirty_tiles();
        assert_eq!(tiles, vec![TileCoord { x: 0, y: 0 }]);
        assert!(!surface.has_dirty_tiles());
    }

    #[test]
    fn test_grain_mask_modulates_coverage() {
        let mut a = TiledSurface::new(64, 64, 32);
        let mut b = TiledSurface::new(64, 64, 32);
        let mut grained = dab(32.0, 32.0, 24.0);
        grained.mask = MaskKind::Grain;
        grained.texture = Some(7);

        a.stamp(&dab(32.0, 32.0, 24.0), BlendMode::Normal);
        b.stamp(&grained, BlendMode::Normal);

        // Grain strictly weakens coverage somewhere inside the footprint.
        let plain: f32 = a.surface().pixels().iter().map(|p| p[3]).sum();
        let textured: f32 = b.surface().pixels().iter().map(|p| p[3]).sum();
        assert!(textured < plain);
        assert!(textured > 0.0);
    }

    #[test]
    fn test_tile_data_roundtrip() {
        let mut surface = TiledSurface::new(150, 150, 128);
        surface.surface_mut().set_pixel(0, 0, [1.0, 0.0, 0.0, 1.0]);

        let data = surface.tile_data(TileCoord { x: 0, y: 0 });
        assert_eq!(data.len(), 128 * 128);
        assert_eq!(data[0], [1.0, 0.0, 0.0, 1.0]);

        // Edge tiles are partial.
        let edge = surface.tile_data(TileCoord { x: 1, y: 1 });
        assert_eq!(edge.len(), 22 * 22);
        let (x, y, w, h) = surface.tile_bounds(TileCoord { x: 1, y: 1 });
        assert_eq!((x, y, w, h), (128, 128, 22, 22));
    }
}
