//! The stroke engine: sample ingestion and lifecycle driving.
//!
//! Ingestion (`handle_sample`) is synchronous and never suspends; all
//! asynchronous work - backend warm-up in `begin_stroke`, flush/readback in
//! `prepare_end_stroke` - is driven by `pump`/`step_frame`. This makes the
//! suspension points of the cooperative drawing thread explicit: samples
//! that arrive while a begin is in flight land in the pending buffer and
//! replay in arrival order once the backend is ready, so no sample is ever
//! lost, duplicated, or reordered across the async boundary.

use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use impasto_config::InputTuning;
use impasto_input::{AnomalyKind, DiagnosticsSink, InputSample, LogDiagnostics, SamplePhase};
use impasto_paint::{
    AccumulatorError, BrushConfig, DabGenerator, DabPlacement, DirtyRect, LayerError, LayerId,
    LayerStore, PressureCurve, StrokeAccumulator, StrokeParams, splitmix64,
};

use crate::history::{HistorySink, StrokeRecord};
use crate::state::StrokePhase;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("layer store error: {0}")]
    Layer(#[from] LayerError),
    #[error("accumulator error: {0}")]
    Accumulator(AccumulatorError),
    #[error("accelerated backend fault: {0}")]
    BackendFault(String),
}

impl From<AccumulatorError> for EngineError {
    fn from(error: AccumulatorError) -> Self {
        match error {
            AccumulatorError::DeviceFault(message) => EngineError::BackendFault(message),
            other => EngineError::Accumulator(other),
        }
    }
}

/// Bookkeeping for the stroke currently owning the scratch buffer.
struct CurrentStroke {
    stroke_id: u64,
    layer: LayerId,
    snapshot: impasto_paint::LayerImage,
    started_at_us: u64,
    dab_count: u64,
    /// `begin_stroke` has not run yet; `pump` owes it.
    begin_pending: bool,
}

/// The stroke engine, generic over the accumulator backend, layer store,
/// and history sink so tests can substitute any of the three seams.
pub struct StrokeEngine<A, S, H> {
    accumulator: A,
    store: S,
    history: H,
    diagnostics: Arc<dyn DiagnosticsSink>,
    generator: DabGenerator,
    brush: BrushConfig,
    active_layer: LayerId,
    phase: StrokePhase,
    current: Option<CurrentStroke>,
    /// Live per-frame queue: written by input handlers, drained by the
    /// frame driver. Single writer, single reader.
    frame_queue: VecDeque<InputSample>,
    /// Held from the start of `Finishing` until the commit completes; a
    /// new stroke's begin must acquire it before clearing the scratch.
    finishing_lock: Arc<Mutex<()>>,
    next_stroke_id: u64,
    /// Union of regions stamped since the last frame composite.
    frame_damage: Option<DirtyRect>,
}

impl<A, S, H> StrokeEngine<A, S, H>
where
    A: StrokeAccumulator,
    S: LayerStore,
    H: HistorySink,
{
    pub fn new(accumulator: A, store: S, history: H, tuning: &InputTuning) -> Self {
        Self {
            accumulator,
            store,
            history,
            diagnostics: Arc::new(LogDiagnostics),
            generator: DabGenerator::new(tuning, PressureCurve::identity()),
            brush: BrushConfig::default(),
            active_layer: 0,
            phase: StrokePhase::Idle,
            current: None,
            frame_queue: VecDeque::new(),
            finishing_lock: Arc::new(Mutex::new(())),
            next_stroke_id: 1,
            frame_damage: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn set_active_layer(&mut self, layer: LayerId) {
        self.active_layer = layer;
    }

    pub fn set_brush(&mut self, brush: BrushConfig) {
        self.brush = brush;
    }

    pub fn brush(&self) -> &BrushConfig {
        &self.brush
    }

    pub fn set_pressure_curve(&mut self, curve: PressureCurve) {
        self.generator.set_curve(curve);
    }

    pub fn phase(&self) -> &StrokePhase {
        &self.phase
    }

    /// Stroke id of the stroke currently owning the scratch, if any.
    pub fn current_stroke_id(&self) -> Option<u64> {
        self.current.as_ref().map(|c| c.stroke_id)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn accumulator(&self) -> &A {
        &self.accumulator
    }

    /// Backend replacement hook for the one-way downgrade. Any in-flight
    /// stroke must be aborted first.
    pub fn replace_accumulator(&mut self, accumulator: A) {
        debug_assert!(self.phase.is_idle(), "backend swapped mid-stroke");
        self.accumulator = accumulator;
    }

    /// The finishing lock, shared with anything that needs to serialize
    /// against an in-flight commit.
    pub fn finishing_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.finishing_lock)
    }

    /// Synchronous sample ingestion. Routing depends on the phase:
    /// - `Idle` + `Down` on a paintable layer opens a stroke (the async
    ///   begin runs at the next `pump`)
    /// - `Starting`: buffered, `Up` additionally flags `pending_end`
    /// - `Active`: pushed to the live per-frame queue
    /// - `Finishing`: dropped with a tail-drop count (the contact raced
    ///   the commit)
    pub fn handle_sample(&mut self, sample: InputSample) {
        if sample.phase == SamplePhase::Hover {
            return;
        }

        match &mut self.phase {
            StrokePhase::Idle => {
                if sample.phase != SamplePhase::Down {
                    debug!(phase = ?sample.phase, "non-down sample while idle, ignored");
                    return;
                }
                self.open_stroke(sample);
            }
            StrokePhase::Starting {
                pending,
                pending_end,
            } => {
                if sample.phase == SamplePhase::Up {
                    *pending_end = true;
                }
                pending.push(sample);
            }
            StrokePhase::Active => {
                self.frame_queue.push_back(sample);
            }
            StrokePhase::Finishing => {
                self.diagnostics.record(AnomalyKind::StrokeTailDrop);
            }
        }
    }

    fn open_stroke(&mut self, down: InputSample) {
        if !self.store.is_visible(self.active_layer) || self.store.is_locked(self.active_layer) {
            debug!(layer = self.active_layer, "down on unpaintable layer ignored");
            return;
        }
        let snapshot = match self.store.image_snapshot(self.active_layer) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%error, "could not snapshot layer, stroke not started");
                return;
            }
        };

        let stroke_id = self.next_stroke_id;
        self.next_stroke_id += 1;

        info!(stroke_id, layer = self.active_layer, "stroke opened");
        self.current = Some(CurrentStroke {
            stroke_id,
            layer: self.active_layer,
            snapshot,
            started_at_us: down.host_time_us,
            dab_count: 0,
            begin_pending: true,
        });
        self.phase = StrokePhase::Starting {
            pending: vec![down],
            pending_end: false,
        };
    }

    /// Drive any suspended lifecycle work: a pending `begin_stroke`, the
    /// pending-buffer replay, and an end request that raced the begin.
    pub async fn pump(&mut self) -> Result<(), EngineError> {
        let begin_pending = self
            .current
            .as_ref()
            .is_some_and(|current| current.begin_pending);
        if !begin_pending {
            return Ok(());
        }

        // Tailgating guard: a prior stroke's finish may still hold the
        // lock; the scratch clear must wait for its commit.
        let guard = self.finishing_lock.clone().lock_owned().await;
        let params = StrokeParams {
            hardness: self.brush.hardness,
            wet_edge: self.brush.wet_edge,
        };
        let begin_result = self.accumulator.begin_stroke(params).await;
        drop(guard);

        match begin_result {
            Ok(()) => self.activate().await,
            Err(error) => {
                // A failed begin never leaves a partial stroke: pending
                // samples are discarded and the layer is untouched.
                warn!(%error, "begin_stroke failed, stroke discarded");
                self.phase = StrokePhase::Idle;
                self.current = None;
                self.generator.cancel_stroke();
                Err(error.into())
            }
        }
    }

    /// Starting -> Active: replay the pending buffer in arrival order,
    /// then honor a pending end request.
    async fn activate(&mut self) -> Result<(), EngineError> {
        let StrokePhase::Starting {
            pending,
            pending_end,
        } = std::mem::replace(&mut self.phase, StrokePhase::Active)
        else {
            debug_assert!(false, "activate outside Starting");
            return Ok(());
        };

        let current = self
            .current
            .as_mut()
            .expect("starting phase without current stroke");
        current.begin_pending = false;
        self.generator.begin_stroke(splitmix64(current.stroke_id));

        debug!(count = pending.len(), "replaying pending buffer");
        for sample in pending {
            self.process_stroke_sample(&sample)?;
        }

        if pending_end {
            self.finish_current().await?;
        }
        Ok(())
    }

    /// Run one sample through the dab generator and stamp the output.
    fn process_stroke_sample(&mut self, sample: &InputSample) -> Result<(), EngineError> {
        let dabs = self.generator.process_sample(&self.brush, sample);
        self.stamp_all(&dabs)
    }

    fn stamp_all(&mut self, dabs: &[DabPlacement]) -> Result<(), EngineError> {
        for dab in dabs {
            self.accumulator.stamp_dab(dab).map_err(EngineError::from)?;
            if let Some(current) = self.current.as_mut() {
                current.dab_count += 1;
            }
            self.union_damage(dab);
        }
        Ok(())
    }

    fn union_damage(&mut self, dab: &DabPlacement) {
        let (major, _) = dab.radii();
        let rect = DirtyRect::new(
            (dab.x - major).floor() as i32,
            (dab.y - major).floor() as i32,
            (dab.x + major).ceil() as i32,
            (dab.y + major).ceil() as i32,
        );
        self.frame_damage = Some(match self.frame_damage {
            Some(existing) => existing.union(&rect),
            None => rect,
        });
    }

    /// One frame: drive pending lifecycle work, then drain the live queue
    /// into the dab generator. Returns the display damage for this frame.
    pub async fn step_frame(&mut self) -> Result<Option<DirtyRect>, EngineError> {
        self.pump().await?;

        let mut finish_after = false;
        while let Some(sample) = self.frame_queue.pop_front() {
            if !self.phase.is_active() {
                // The stroke ended earlier this frame; late samples are
                // tail of a finished contact.
                self.diagnostics.record(AnomalyKind::StrokeTailDrop);
                continue;
            }
            let is_up = sample.phase == SamplePhase::Up;
            self.process_stroke_sample(&sample)?;
            if is_up {
                finish_after = true;
                break;
            }
        }

        if finish_after {
            // Anything still queued after the Up belongs to a dead contact.
            for _ in self.frame_queue.drain(..) {
                self.diagnostics.record(AnomalyKind::StrokeTailDrop);
            }
            self.finish_current().await?;
        }

        Ok(self.take_frame_damage())
    }

    /// Damage accumulated since the last call (one display composite per
    /// frame consumes this).
    pub fn take_frame_damage(&mut self) -> Option<DirtyRect> {
        self.frame_damage.take()
    }

    /// Finish the active stroke: final taper dab, async flush, then the
    /// atomic commit. Holds the finishing lock across the whole sequence.
    async fn finish_current(&mut self) -> Result<(), EngineError> {
        let Some(stroke_id) = self.current_stroke_id() else {
            return Ok(());
        };
        self.finalize(stroke_id).await.map(|_| ())
    }

    /// Idempotent finalize: commits the stroke with this id if - and only
    /// if - it is still the one owning the scratch. Returns whether a
    /// commit happened. Calling it again (e.g. from a cleanup path) is a
    /// no-op, so a stroke can never double-commit.
    pub async fn finalize(&mut self, stroke_id: u64) -> Result<bool, EngineError> {
        let matches_current = self
            .current
            .as_ref()
            .is_some_and(|current| current.stroke_id == stroke_id && !current.begin_pending);
        if !matches_current || !self.phase.is_active() {
            debug!(stroke_id, "finalize skipped: stroke already finished");
            return Ok(false);
        }

        self.phase = StrokePhase::Finishing;
        let guard: OwnedMutexGuard<()> = self.finishing_lock.clone().lock_owned().await;

        let result = self.finish_locked(stroke_id).await;
        drop(guard);

        match result {
            Ok(()) => Ok(true),
            Err(error) => {
                // Abort semantics: scratch and queues discarded, the lock
                // released above, the layer untouched.
                self.abort_stroke();
                Err(error)
            }
        }
    }

    async fn finish_locked(&mut self, stroke_id: u64) -> Result<(), EngineError> {
        // Residual travel below the spacing threshold becomes the final
        // taper dab.
        if let Some(dab) = self.generator.end_stroke(&self.brush) {
            self.stamp_all(&[dab])?;
        }

        let prepared = self.accumulator.prepare_end_stroke().await?;

        let current = self
            .current
            .as_ref()
            .expect("finishing without current stroke");
        let layer = current.layer;
        let finished_at_us = self
            .frame_queue
            .back()
            .map(|s| s.host_time_us)
            .unwrap_or(current.started_at_us);

        // Commit: composite into a working copy, then a single store
        // write. commit_and_clear is synchronous - nothing can interleave
        // between the composite and the scratch clear.
        let mut image = self.store.image_snapshot(layer)?;
        let rect = self
            .accumulator
            .commit_and_clear(&mut image, self.brush.opacity, self.brush.blend_mode)?;
        self.store.set_image_snapshot(layer, image)?;

        let current = self.current.take().expect("current stroke vanished");
        self.history.record_stroke(StrokeRecord {
            stroke_id,
            layer,
            snapshot: current.snapshot,
            dirty_rect: rect.or(prepared.dirty_rect),
            dab_count: current.dab_count,
            started_at_us: current.started_at_us,
            finished_at_us,
        });

        info!(stroke_id, ?rect, "stroke committed");
        self.phase = StrokePhase::Idle;
        Ok(())
    }

    /// Abort at any state: discards the scratch buffer and all pending and
    /// queued samples, leaves the layer untouched, and releases every
    /// stroke resource so the next stroke is not starved.
    pub fn abort_stroke(&mut self) {
        if !self.phase.is_idle() {
            info!(phase = self.phase.name(), "stroke aborted");
        }
        self.accumulator.abort();
        self.generator.cancel_stroke();
        self.frame_queue.clear();
        self.frame_damage = None;
        self.current = None;
        self.phase = StrokePhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impasto_input::{CountingDiagnostics, SampleSource};
    use impasto_paint::{
        BlendMode, CpuAccumulator, LayerImage, MemoryLayerStore, PreparedCommit,
    };

    use crate::history::MemoryHistory;

    fn sample(x: f64, y: f64, pressure: f32, time_us: u64, phase: SamplePhase) -> InputSample {
        InputSample {
            x,
            y,
            pressure,
            tilt_x: 0.0,
            tilt_y: 0.0,
            rotation: 0.0,
            host_time_us: time_us,
            device_time_us: time_us,
            source: SampleSource::WindowedPointer,
            phase,
        }
    }

    fn store_with_layer(size: u32) -> MemoryLayerStore {
        let mut store = MemoryLayerStore::new();
        store.add_layer(1, size, size);
        store
    }

    fn engine(size: u32) -> StrokeEngine<CpuAccumulator, MemoryLayerStore, MemoryHistory> {
        let mut engine = StrokeEngine::new(
            CpuAccumulator::new(size, size),
            store_with_layer(size),
            MemoryHistory::new(),
            &InputTuning::default(),
        );
        engine.set_active_layer(1);
        engine
    }

    /// Accumulator double whose begin always fails.
    struct RejectingAccumulator;

    impl StrokeAccumulator for RejectingAccumulator {
        fn kind(&self) -> impasto_paint::BackendKind {
            impasto_paint::BackendKind::Cpu
        }
        fn is_active(&self) -> bool {
            false
        }
        async fn begin_stroke(&mut self, _params: StrokeParams) -> Result<(), AccumulatorError> {
            Err(AccumulatorError::Unavailable("backend offline".into()))
        }
        fn stamp_dab(&mut self, _dab: &DabPlacement) -> Result<(), AccumulatorError> {
            panic!("stamp on rejected stroke");
        }
        async fn prepare_end_stroke(&mut self) -> Result<PreparedCommit, AccumulatorError> {
            Err(AccumulatorError::NotActive)
        }
        fn commit_and_clear(
            &mut self,
            _destination: &mut LayerImage,
            _opacity: f32,
            _mode: BlendMode,
        ) -> Result<Option<DirtyRect>, AccumulatorError> {
            Err(AccumulatorError::NotActive)
        }
        fn abort(&mut self) {}
    }

    /// Accumulator double that faults at end-of-stroke flush.
    struct FaultingAccumulator {
        inner: CpuAccumulator,
    }

    impl StrokeAccumulator for FaultingAccumulator {
        fn kind(&self) -> impasto_paint::BackendKind {
            impasto_paint::BackendKind::Gpu
        }
        fn is_active(&self) -> bool {
            self.inner.is_active()
        }
        async fn begin_stroke(&mut self, params: StrokeParams) -> Result<(), AccumulatorError> {
            self.inner.begin_stroke(params).await
        }
        fn stamp_dab(&mut self, dab: &DabPlacement) -> Result<(), AccumulatorError> {
            self.inner.stamp_dab(dab)
        }
        async fn prepare_end_stroke(&mut self) -> Result<PreparedCommit, AccumulatorError> {
            Err(AccumulatorError::DeviceFault("simulated device loss".into()))
        }
        fn commit_and_clear(
            &mut self,
            _destination: &mut LayerImage,
            _opacity: f32,
            _mode: BlendMode,
        ) -> Result<Option<DirtyRect>, AccumulatorError> {
            panic!("commit after fault");
        }
        fn abort(&mut self) {
            self.inner.abort();
        }
    }

    async fn run_simple_stroke(
        engine: &mut StrokeEngine<CpuAccumulator, MemoryLayerStore, MemoryHistory>,
    ) {
        engine.handle_sample(sample(10.0, 10.0, 0.8, 0, SamplePhase::Down));
        engine.step_frame().await.unwrap();
        engine.handle_sample(sample(30.0, 10.0, 0.8, 10_000, SamplePhase::Move));
        engine.handle_sample(sample(30.0, 10.0, 0.0, 20_000, SamplePhase::Up));
        engine.step_frame().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_stroke_commits_to_layer() {
        let mut engine = engine(64);
        run_simple_stroke(&mut engine).await;

        assert!(engine.phase().is_idle());
        let image = engine.store().image_snapshot(1).unwrap();
        assert!(image.get_pixel(10, 10).unwrap()[3] > 0.0);

        // One history record, carrying the pre-stroke snapshot.
        assert_eq!(engine.history().records().len(), 1);
        let record = &engine.history().records()[0];
        assert_eq!(record.layer, 1);
        assert!(record.dab_count > 0);
        assert_eq!(record.snapshot.get_pixel(10, 10), Some([0.0; 4]));
    }

    #[tokio::test]
    async fn test_no_sample_loss_across_async_begin() {
        let mut engine = engine(128);

        // Down plus a burst of moves, all before the first pump: every one
        // lands in the pending buffer.
        engine.handle_sample(sample(0.0, 64.0, 0.5, 0, SamplePhase::Down));
        for i in 1..=10 {
            engine.handle_sample(sample(
                i as f64 * 10.0,
                64.0,
                0.5,
                i * 1_000,
                SamplePhase::Move,
            ));
        }
        assert!(engine.phase().is_starting());

        // After the pump the whole 100-unit path is stamped: with the
        // default brush (spacing 5) that is the contact dab plus one per
        // spacing increment, each exactly once, in order.
        engine.step_frame().await.unwrap();
        assert!(engine.phase().is_active());

        engine.handle_sample(sample(100.0, 64.0, 0.0, 11_000, SamplePhase::Up));
        engine.step_frame().await.unwrap();

        let record = &engine.history().records()[0];
        // 1 contact + 19 spacing dabs along 100 units at spacing 5 + taper.
        assert_eq!(record.dab_count, 21);
    }

    #[tokio::test]
    async fn test_up_during_starting_defers_finish() {
        let mut engine = engine(64);

        // The entire contact happens before the async begin resolves.
        engine.handle_sample(sample(10.0, 10.0, 0.6, 0, SamplePhase::Down));
        engine.handle_sample(sample(20.0, 10.0, 0.6, 1_000, SamplePhase::Move));
        engine.handle_sample(sample(20.0, 10.0, 0.0, 2_000, SamplePhase::Up));
        assert!(engine.phase().is_starting());

        // One pump both activates and finishes: the end cannot race ahead
        // of the begin.
        engine.step_frame().await.unwrap();
        assert!(engine.phase().is_idle());
        assert_eq!(engine.history().records().len(), 1);
        assert!(engine.store().image_snapshot(1).unwrap().get_pixel(10, 10).unwrap()[3] > 0.0);
    }

    #[tokio::test]
    async fn test_begin_rejection_discards_and_leaves_layer_untouched() {
        let mut engine = StrokeEngine::new(
            RejectingAccumulator,
            store_with_layer(64),
            MemoryHistory::new(),
            &InputTuning::default(),
        );
        engine.set_active_layer(1);
        let before = engine.store().image_snapshot(1).unwrap();

        engine.handle_sample(sample(10.0, 10.0, 0.5, 0, SamplePhase::Down));
        engine.handle_sample(sample(20.0, 10.0, 0.5, 1_000, SamplePhase::Move));
        engine.handle_sample(sample(30.0, 10.0, 0.5, 2_000, SamplePhase::Move));

        let result = engine.pump().await;
        assert!(matches!(result, Err(EngineError::Accumulator(_))));
        assert!(engine.phase().is_idle());
        assert!(engine.current_stroke_id().is_none());

        // Byte-identical layer, no history entry, no partial commit.
        assert_eq!(engine.store().image_snapshot(1).unwrap(), before);
        assert!(engine.history().records().is_empty());

        // The engine is not wedged: a later stroke works.
        // (swap in a working accumulator through the same seam the
        // downgrade path uses)
        let mut engine = StrokeEngine::new(
            CpuAccumulator::new(64, 64),
            store_with_layer(64),
            MemoryHistory::new(),
            &InputTuning::default(),
        );
        engine.set_active_layer(1);
        run_simple_stroke(&mut engine).await;
        assert_eq!(engine.history().records().len(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_finalize() {
        let mut engine = engine(64);
        engine.handle_sample(sample(10.0, 10.0, 0.8, 0, SamplePhase::Down));
        engine.step_frame().await.unwrap();
        let stroke_id = engine.current_stroke_id().unwrap();

        engine.handle_sample(sample(30.0, 10.0, 0.0, 1_000, SamplePhase::Up));
        engine.step_frame().await.unwrap();

        // Normal end already finalized; the cleanup-path call is a no-op.
        let again = engine.finalize(stroke_id).await.unwrap();
        assert!(!again);
        assert_eq!(engine.history().records().len(), 1);

        // Layer pixels unchanged by the second call.
        let image = engine.store().image_snapshot(1).unwrap();
        let alpha_sum: f32 = image.pixels().iter().map(|p| p[3]).sum();
        let _ = engine.finalize(stroke_id).await.unwrap();
        let image2 = engine.store().image_snapshot(1).unwrap();
        let alpha_sum2: f32 = image2.pixels().iter().map(|p| p[3]).sum();
        assert_eq!(alpha_sum, alpha_sum2);
    }

    #[tokio::test]
    async fn test_two_strokes_no_bleed_through() {
        let mut engine = engine(64);

        // Stroke A, committed.
        run_simple_stroke(&mut engine).await;
        let after_a = engine.store().image_snapshot(1).unwrap();
        assert!(after_a.get_pixel(10, 10).unwrap()[3] > 0.0);

        // Stroke B elsewhere: begin clears only the scratch, never A's
        // committed pixels.
        engine.handle_sample(sample(50.0, 50.0, 0.8, 30_000, SamplePhase::Down));
        engine.step_frame().await.unwrap();
        engine.handle_sample(sample(50.0, 50.0, 0.0, 40_000, SamplePhase::Up));
        engine.step_frame().await.unwrap();

        let after_b = engine.store().image_snapshot(1).unwrap();
        assert_eq!(
            after_b.get_pixel(10, 10),
            after_a.get_pixel(10, 10),
            "stroke B's scratch clear overwrote stroke A's committed pixels"
        );
        assert!(after_b.get_pixel(50, 50).unwrap()[3] > 0.0);
    }

    #[tokio::test]
    async fn test_backend_fault_aborts_without_partial_commit() {
        let mut engine = StrokeEngine::new(
            FaultingAccumulator {
                inner: CpuAccumulator::new(64, 64),
            },
            store_with_layer(64),
            MemoryHistory::new(),
            &InputTuning::default(),
        );
        engine.set_active_layer(1);
        let before = engine.store().image_snapshot(1).unwrap();

        engine.handle_sample(sample(10.0, 10.0, 0.8, 0, SamplePhase::Down));
        engine.step_frame().await.unwrap();
        engine.handle_sample(sample(30.0, 10.0, 0.0, 1_000, SamplePhase::Up));

        let result = engine.step_frame().await;
        assert!(matches!(result, Err(EngineError::BackendFault(_))));

        // Aborted: idle, scratch discarded, layer untouched, lock free.
        assert!(engine.phase().is_idle());
        assert_eq!(engine.store().image_snapshot(1).unwrap(), before);
        assert!(engine.finishing_lock().try_lock().is_ok());

        // Subsequent strokes are not starved (facade swaps the backend).
        engine.replace_accumulator(FaultingAccumulator {
            inner: CpuAccumulator::new(64, 64),
        });
        engine.handle_sample(sample(5.0, 5.0, 0.5, 2_000, SamplePhase::Down));
        engine.step_frame().await.unwrap();
        assert!(engine.phase().is_active());
    }

    #[tokio::test]
    async fn test_down_on_locked_layer_ignored() {
        let mut engine = engine(64);
        engine.store_mut().set_locked(1, true);

        engine.handle_sample(sample(10.0, 10.0, 0.5, 0, SamplePhase::Down));
        assert!(engine.phase().is_idle());
        assert!(engine.current_stroke_id().is_none());
    }

    #[tokio::test]
    async fn test_abort_clears_everything_and_releases_lock() {
        let mut engine = engine(64);
        engine.handle_sample(sample(10.0, 10.0, 0.5, 0, SamplePhase::Down));
        engine.step_frame().await.unwrap();
        engine.handle_sample(sample(20.0, 10.0, 0.5, 1_000, SamplePhase::Move));

        engine.abort_stroke();
        assert!(engine.phase().is_idle());
        assert!(engine.finishing_lock().try_lock().is_ok());
        assert!(engine.history().records().is_empty());

        // Layer untouched by the aborted stroke.
        let image = engine.store().image_snapshot(1).unwrap();
        assert!(image.pixels().iter().all(|p| p[3] == 0.0));
    }

    #[tokio::test]
    async fn test_mid_stroke_opacity_change_applies_at_commit() {
        let mut engine = engine(64);
        let mut brush = BrushConfig::default();
        brush.opacity = 1.0;
        engine.set_brush(brush.clone());

        engine.handle_sample(sample(10.0, 10.0, 1.0, 0, SamplePhase::Down));
        engine.step_frame().await.unwrap();

        // Config is re-read per sample and at commit.
        brush.opacity = 0.25;
        engine.set_brush(brush);
        engine.handle_sample(sample(10.0, 10.0, 0.0, 1_000, SamplePhase::Up));
        engine.step_frame().await.unwrap();

        let image = engine.store().image_snapshot(1).unwrap();
        let alpha = image.get_pixel(10, 10).unwrap()[3];
        assert!(alpha <= 0.3, "commit ignored the updated opacity: {alpha}");
    }

    #[tokio::test]
    async fn test_samples_while_finishing_counted_as_tail() {
        let diagnostics = Arc::new(CountingDiagnostics::new());
        let mut engine = StrokeEngine::new(
            CpuAccumulator::new(64, 64),
            store_with_layer(64),
            MemoryHistory::new(),
            &InputTuning::default(),
        )
        .with_diagnostics(diagnostics.clone());
        engine.set_active_layer(1);

        engine.handle_sample(sample(10.0, 10.0, 0.8, 0, SamplePhase::Down));
        engine.step_frame().await.unwrap();
        engine.handle_sample(sample(20.0, 10.0, 0.0, 1_000, SamplePhase::Up));
        // A move queued behind the Up: dead contact tail.
        engine.handle_sample(sample(25.0, 10.0, 0.5, 1_100, SamplePhase::Move));
        engine.step_frame().await.unwrap();

        assert_eq!(diagnostics.count(AnomalyKind::StrokeTailDrop), 1);
        assert_eq!(engine.history().records().len(), 1);
    }
}
