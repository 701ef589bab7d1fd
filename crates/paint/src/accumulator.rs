//! The stroke accumulator contract and its CPU backend.
//!
//! An accumulator stamps dabs into an off-screen scratch buffer sized to
//! the canvas and, at stroke end, composites the scratch onto the
//! destination layer in one uninterruptible step. `commit_and_clear` is
//! deliberately synchronous: no await point can interleave between the
//! composite and the clear, which is what makes commit atomic with respect
//! to a concurrently starting stroke.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layer::LayerImage;
use crate::surface::PixelSurface;
use crate::tiles::{TileCoord, TiledSurface};
use crate::types::{BackendKind, BlendMode, DabPlacement, DirtyRect};

#[derive(Debug, Error)]
pub enum AccumulatorError {
    #[error("a stroke is already active")]
    AlreadyActive,
    #[error("no active stroke")]
    NotActive,
    #[error("accelerated backend unavailable: {0}")]
    Unavailable(String),
    #[error("accelerated backend fault: {0}")]
    DeviceFault(String),
}

/// Stroke-level parameters fixed at `begin_stroke`.
#[derive(Debug, Clone, Copy)]
pub struct StrokeParams {
    /// Default edge hardness for the stroke.
    pub hardness: f32,
    /// Whether scratch alpha pools at the stamp alpha (watercolor edge).
    pub wet_edge: bool,
}

impl Default for StrokeParams {
    fn default() -> Self {
        Self {
            hardness: 0.8,
            wet_edge: false,
        }
    }
}

/// Result of `prepare_end_stroke`: the minimal changed region. The scratch
/// itself stays inside the accumulator until `commit_and_clear`.
#[derive(Debug, Clone, Copy)]
pub struct PreparedCommit {
    pub dirty_rect: Option<DirtyRect>,
}

/// Dual-backend stroke accumulation contract.
///
/// Call order per stroke: `begin_stroke` (may suspend for backend warm-up),
/// any number of `stamp_dab`, `prepare_end_stroke` (may suspend for flush
/// and readback), then `commit_and_clear` immediately after - or `abort` at
/// any point, which discards the scratch without touching the layer.
#[allow(async_fn_in_trait)]
pub trait StrokeAccumulator {
    fn kind(&self) -> BackendKind;

    fn is_active(&self) -> bool;

    /// Clear the scratch and open a stroke. The caller must hold the
    /// finishing lock of any prior stroke before calling.
    async fn begin_stroke(&mut self, params: StrokeParams) -> Result<(), AccumulatorError>;

    /// Blend one dab into the scratch. Invalid-state calls are programming
    /// errors: loud in debug builds, safe no-ops in release.
    fn stamp_dab(&mut self, dab: &DabPlacement) -> Result<(), AccumulatorError>;

    /// Flush backend-batched work and return the minimal changed region,
    /// without touching the destination layer.
    async fn prepare_end_stroke(&mut self) -> Result<PreparedCommit, AccumulatorError>;

    /// Composite the scratch onto `destination` and clear it, as one
    /// synchronous unit. Returns the committed region.
    fn commit_and_clear(
        &mut self,
        destination: &mut LayerImage,
        opacity: f32,
        mode: BlendMode,
    ) -> Result<Option<DirtyRect>, AccumulatorError>;

    /// Discard the scratch and any in-flight work. Never fails.
    fn abort(&mut self);
}

/// Composite a scratch surface region onto a layer image.
///
/// Shared by both backends: the GPU backend reads its scratch back into the
/// same pixel layout and commits through this exact path.
pub fn composite_scratch(
    scratch: &PixelSurface,
    destination: &mut LayerImage,
    rect: DirtyRect,
    opacity: f32,
    mode: BlendMode,
) {
    let opacity = opacity.clamp(0.0, 1.0);
    let rect = rect.clamped(destination.width, destination.height);
    for y in rect.min_y as u32..rect.max_y as u32 {
        for x in rect.min_x as u32..rect.max_x as u32 {
            let Some(src) = scratch.get_pixel(x, y) else {
                continue;
            };
            let src_alpha = src[3] * opacity;
            if src_alpha <= 0.0 {
                continue;
            }
            let Some(dst) = destination.get_pixel(x, y) else {
                continue;
            };
            let out = match mode {
                BlendMode::Normal => {
                    let inv = 1.0 - src_alpha;
                    [
                        src[0] * src_alpha + dst[0] * inv,
                        src[1] * src_alpha + dst[1] * inv,
                        src[2] * src_alpha + dst[2] * inv,
                        src_alpha + dst[3] * inv,
                    ]
                }
                BlendMode::Erase => {
                    let keep = 1.0 - src_alpha;
                    [dst[0] * keep, dst[1] * keep, dst[2] * keep, dst[3] * keep]
                }
            };
            destination.set_pixel(x, y, out);
        }
    }
}

/// CPU raster backend: a tiled scratch surface stamped directly.
pub struct CpuAccumulator {
    scratch: TiledSurface,
    params: Option<StrokeParams>,
    prepared: bool,
}

impl CpuAccumulator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            scratch: TiledSurface::with_default_tile_size(width, height),
            params: None,
            prepared: false,
        }
    }

    /// Stroke parameters of the active stroke, if any.
    pub fn stroke_params(&self) -> Option<&StrokeParams> {
        self.params.as_ref()
    }

    /// Scratch access for display compositing.
    pub fn scratch(&self) -> &TiledSurface {
        &self.scratch
    }

    /// Drain dirty tiles for display upload.
    pub fn take_dirty_tiles(&mut self) -> Vec<TileCoord> {
        self.scratch.take_dirty_tiles()
    }
}

impl StrokeAccumulator for CpuAccumulator {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn is_active(&self) -> bool {
        self.params.is_some()
    }

    async fn begin_stroke(&mut self, params: StrokeParams) -> Result<(), AccumulatorError> {
        if self.params.is_some() {
            return Err(AccumulatorError::AlreadyActive);
        }
        self.scratch.clear();
        self.params = Some(params);
        self.prepared = false;
        debug!("cpu stroke begun");
        Ok(())
    }

    fn stamp_dab(&mut self, dab: &DabPlacement) -> Result<(), AccumulatorError> {
        if self.params.is_none() {
            debug_assert!(false, "stamp_dab with no active stroke");
            warn!("stamp_dab ignored: no active stroke");
            return Ok(());
        }
        // The scratch always accumulates source-over; the stroke's blend
        // mode applies against the layer at commit.
        self.scratch.stamp(dab, BlendMode::Normal);
        Ok(())
    }

    async fn prepare_end_stroke(&mut self) -> Result<PreparedCommit, AccumulatorError> {
        if self.params.is_none() {
            return Err(AccumulatorError::NotActive);
        }
        self.prepared = true;
        Ok(PreparedCommit {
            dirty_rect: self.scratch.dirty_rect(),
        })
    }

    fn commit_and_clear(
        &mut self,
        destination: &mut LayerImage,
        opacity: f32,
        mode: BlendMode,
    ) -> Result<Option<DirtyRect>, AccumulatorError> {
        if self.params.is_none() {
            debug_assert!(false, "commit with no active stroke");
            warn!("commit_and_clear ignored: no active stroke");
            return Ok(None);
        }
        debug_assert!(self.prepared, "commit without prepare_end_stroke");

        let rect = self.scratch.dirty_rect();
        if let Some(rect) = rect {
            composite_scratch(self.scratch.surface(), destination, rect, opacity, mode);
        }

        self.scratch.clear();
        self.params = None;
        self.prepared = false;
        info!(?rect, "cpu stroke committed");
        Ok(rect)
    }

    fn abort(&mut self) {
        if self.params.take().is_some() {
            info!("cpu stroke aborted, scratch discarded");
        }
        self.scratch.clear();
        self.prepared = false;
    }
}
