//! Layer store boundary.
//!
//! Document and layer storage is an external collaborator. The stroke
//! pipeline touches it at exactly two points: reading a snapshot at stroke
//! begin (for the undo record) and writing the committed result. The
//! in-memory implementation here backs tests and demos.

use std::collections::HashMap;
use thiserror::Error;

pub type LayerId = u64;

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("unknown layer {0}")]
    Unknown(LayerId),
    #[error("layer {0} is locked")]
    Locked(LayerId),
}

/// A layer's pixel content: straight-alpha RGBA f32, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerImage {
    pub width: u32,
    pub height: u32,
    pixels: Vec<[f32; 4]>,
}

impl LayerImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; (width as usize) * (height as usize)],
        }
    }

    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[(y as usize) * (self.width as usize) + (x as usize)])
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [f32; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        self.pixels[(y as usize) * (self.width as usize) + (x as usize)] = color;
    }

    #[inline]
    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [[f32; 4]] {
        &mut self.pixels
    }
}

/// External layer storage contract.
pub trait LayerStore {
    /// Read a full copy of the layer's image.
    fn image_snapshot(&self, layer: LayerId) -> Result<LayerImage, LayerError>;
    /// Replace the layer's image. Fails on locked layers.
    fn set_image_snapshot(&mut self, layer: LayerId, image: LayerImage) -> Result<(), LayerError>;
    fn is_visible(&self, layer: LayerId) -> bool;
    fn is_locked(&self, layer: LayerId) -> bool;
}

struct MemoryLayer {
    image: LayerImage,
    visible: bool,
    locked: bool,
}

/// In-memory layer store for tests and demos.
#[derive(Default)]
pub struct MemoryLayerStore {
    layers: HashMap<LayerId, MemoryLayer>,
}

impl MemoryLayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, id: LayerId, width: u32, height: u32) {
        self.layers.insert(
            id,
            MemoryLayer {
                image: LayerImage::new(width, height),
                visible: true,
                locked: false,
            },
        );
    }

    pub fn set_locked(&mut self, id: LayerId, locked: bool) {
        if let Some(layer) = self.layers.get_mut(&id) {
            layer.locked = locked;
        }
    }

    pub fn set_visible(&mut self, id: LayerId, visible: bool) {
        if let Some(layer) = self.layers.get_mut(&id) {
            layer.visible = visible;
        }
    }
}

impl LayerStore for MemoryLayerStore {
    fn image_snapshot(&self, layer: LayerId) -> Result<LayerImage, LayerError> {
        self.layers
            .get(&layer)
            .map(|l| l.image.clone())
            .ok_or(LayerError::Unknown(layer))
    }

    fn set_image_snapshot(&mut self, layer: LayerId, image: LayerImage) -> Result<(), LayerError> {
        let entry = self.layers.get_mut(&layer).ok_or(LayerError::Unknown(layer))?;
        if entry.locked {
            return Err(LayerError::Locked(layer));
        }
        entry.image = image;
        Ok(())
    }

    fn is_visible(&self, layer: LayerId) -> bool {
        self.layers.get(&layer).is_some_and(|l| l.visible)
    }

    fn is_locked(&self, layer: LayerId) -> bool {
        self.layers.get(&layer).is_some_and(|l| l.locked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryLayerStore::new();
        store.add_layer(1, 32, 32);

        let mut image = store.image_snapshot(1).unwrap();
        image.set_pixel(3, 4, [1.0, 0.0, 0.0, 1.0]);
        store.set_image_snapshot(1, image).unwrap();

        let back = store.image_snapshot(1).unwrap();
        assert_eq!(back.get_pixel(3, 4), Some([1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_unknown_layer() {
        let store = MemoryLayerStore::new();
        assert!(matches!(
            store.image_snapshot(9),
            Err(LayerError::Unknown(9))
        ));
        assert!(!store.is_visible(9));
    }

    #[test]
    fn test_locked_layer_rejects_write() {
        let mut store = MemoryLayerStore::new();
        store.add_layer(1, 8, 8);
        store.set_locked(1, true);

        let image = store.image_snapshot(1).unwrap();
        assert!(matches!(
            store.set_image_snapshot(1, image),
            Err(LayerError::Locked(1))
        ));
        assert!(store.is_locked(1));
    }
}
