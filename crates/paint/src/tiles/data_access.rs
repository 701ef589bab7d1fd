//! Tile data extraction for display upload.

use super::{TileCoord, TiledSurface};

impl TiledSurface {
    /// Pixel bounds of a tile: (x, y, width, height). Edge tiles are
    /// clipped to the surface.
    pub fn tile_bounds(&self, coord: TileCoord) -> (u32, u32, u32, u32) {
        let x = coord.x * self.tile_size;
        let y = coord.y * self.tile_size;
        let w = self.tile_size.min(self.surface.width.saturating_sub(x));
        let h = self.tile_size.min(self.surface.height.saturating_sub(y));
        (x, y, w, h)
    }

    /// Copy out a tile's pixels, row-major, sized to the clipped bounds.
    pub fn tile_data(&self, coord: TileCoord) -> Vec<[f32; 4]> {
        let (x0, y0, w, h) = self.tile_bounds(coord);
        let mut data = Vec::with_capacity((w as usize) * (h as usize));
        for dy in 0..h {
            for dx in 0..w {
                if let Some(pixel) = self.surface.get_pixel(x0 + dx, y0 + dy) {
                    data.push(pixel);
                }
            }
        }
        data
    }
}
