//! Dirty tile and dirty rect tracking for incremental updates.

use super::{TileCoord, TiledSurface};
use crate::types::DirtyRect;

impl TiledSurface {
    /// Union a (pre-clamped) rect into the dirty state.
    pub(crate) fn mark_rect_dirty(&mut self, rect: DirtyRect) {
        if rect.is_empty() {
            return;
        }

        self.dirty_rect = Some(match self.dirty_rect {
            Some(existing) => existing.union(&rect),
            None => rect,
        });

        let tile_x_start = rect.min_x as u32 / self.tile_size;
        let tile_y_start = rect.min_y as u32 / self.tile_size;
        let tile_x_end = (rect.max_x as u32).saturating_sub(1) / self.tile_size;
        let tile_y_end = (rect.max_y as u32).saturating_sub(1) / self.tile_size;

        for ty in tile_y_start..=tile_y_end {
            for tx in tile_x_start..=tile_x_end {
                self.dirty_tiles.insert(TileCoord { x: tx, y: ty });
            }
        }
    }

    /// Mark the entire surface dirty.
    pub fn mark_all_dirty(&mut self) {
        self.mark_rect_dirty(DirtyRect::new(
            0,
            0,
            self.surface.width as i32,
            self.surface.height as i32,
        ));
    }

    /// Minimal rect covering every change since the last clear.
    #[inline]
    pub fn dirty_rect(&self) -> Option<DirtyRect> {
        self.dirty_rect
    }

    /// Drain the dirty tile set for display upload. The precise dirty rect
    /// is left untouched; it belongs to the commit path.
    pub fn take_dirty_tiles(&mut self) -> Vec<TileCoord> {
        let mut tiles: Vec<TileCoord> = self.dirty_tiles.drain().collect();
        tiles.sort_by_key(|t| (t.y, t.x));
        tiles
    }

    #[inline]
    pub fn has_dirty_tiles(&self) -> bool {
        !self.dirty_tiles.is_empty()
    }

    #[inline]
    pub fn dirty_tile_count(&self) -> usize {
        self.dirty_tiles.len()
    }
}
