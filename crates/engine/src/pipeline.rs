//! The full input-to-pixel facade.
//!
//! `StrokePipeline` wires the whole flow together: raw events enter through
//! the three input channels, pass the normalizer and (for native sources)
//! the session router, feed the stroke state machine, and end as committed
//! pixels on a layer. Backend selection and the one-way GPU-to-CPU
//! downgrade live here, at the single point that owns the accumulator.

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

use impasto_config::PipelineConfig;
use impasto_input::{
    AnomalyKind, DiagnosticsSink, DownDecision, LogDiagnostics, NativeSample, NativeSampleRing,
    RawPointerEvent, RingCursor, RingError, SampleNormalizer, SamplePhase, SampleSource,
    SessionRouter, SessionTracker,
};
use impasto_paint::{BackendKind, BrushConfig, DirtyRect, LayerId, LayerStore, StrokeAccumulator};

use crate::backend::{Accumulator, create_accumulator};
use crate::engine::{EngineError, StrokeEngine};
use crate::history::HistorySink;

/// User-visible, non-blocking notifications surfaced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineNotice {
    /// The accelerated backend faulted; the session now runs on the CPU
    /// backend until explicit reinitialization.
    BackendDowngraded { reason: String },
}

/// The assembled stroke pipeline.
pub struct StrokePipeline<S, H> {
    config: PipelineConfig,
    ring: NativeSampleRing,
    cursor: RingCursor,
    router: SessionRouter,
    normalizer: SampleNormalizer,
    sessions: SessionTracker,
    engine: StrokeEngine<Accumulator, S, H>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    /// Latched by the one-way downgrade; never cleared within a session.
    downgraded: bool,
    notices: VecDeque<PipelineNotice>,
}

impl<S, H> StrokePipeline<S, H>
where
    S: LayerStore,
    H: HistorySink,
{
    /// Build the pipeline, probing backend availability once.
    pub async fn new(config: PipelineConfig, store: S, history: H) -> Self {
        Self::with_diagnostics(config, store, history, Arc::new(LogDiagnostics)).await
    }

    pub async fn with_diagnostics(
        config: PipelineConfig,
        store: S,
        history: H,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let accumulator = create_accumulator(&config.canvas, config.backend).await;
        Self::assemble(config, store, history, diagnostics, accumulator)
    }

    /// Assemble around an explicit accumulator (skips the probe; used by
    /// tests and by hosts that pre-create the device).
    pub fn assemble(
        config: PipelineConfig,
        store: S,
        history: H,
        diagnostics: Arc<dyn DiagnosticsSink>,
        accumulator: Accumulator,
    ) -> Self {
        let ring = NativeSampleRing::new(config.input.ring_capacity);
        let cursor = ring.head_cursor();
        let mut normalizer = SampleNormalizer::new(config.input, diagnostics.clone());
        normalizer.set_scale(config.canvas.scale as f64);
        let engine = StrokeEngine::new(accumulator, store, history, &config.input)
            .with_diagnostics(diagnostics.clone());

        Self {
            config,
            ring,
            cursor,
            router: SessionRouter::new(diagnostics.clone()),
            normalizer,
            sessions: SessionTracker::new(config.input),
            engine,
            diagnostics,
            downgraded: false,
            notices: VecDeque::new(),
        }
    }

    pub fn engine(&self) -> &StrokeEngine<Accumulator, S, H> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut StrokeEngine<Accumulator, S, H> {
        &mut self.engine
    }

    pub fn set_brush(&mut self, brush: BrushConfig) {
        self.engine.set_brush(brush);
    }

    pub fn set_active_layer(&mut self, layer: LayerId) {
        self.engine.set_active_layer(layer);
    }

    /// Declare which native backend is connected (or None).
    pub fn set_active_native(&mut self, source: Option<SampleSource>) {
        self.normalizer.set_active_native(source);
        if source.is_none() {
            self.sessions.end();
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.engine.accumulator().kind()
    }

    pub fn is_downgraded(&self) -> bool {
        self.downgraded
    }

    /// Drain pending user-visible notices.
    pub fn take_notices(&mut self) -> Vec<PipelineNotice> {
        self.notices.drain(..).collect()
    }

    /// Native streaming callback: records push into the ring buffer; the
    /// pipeline pulls them through its cursor on the next windowed event.
    pub fn push_native(&mut self, sample: NativeSample) -> u64 {
        self.ring.push(sample)
    }

    /// Native backend restart: invalidates every outstanding cursor.
    pub fn reset_native_ring(&mut self) {
        self.ring.clear();
    }

    /// One windowed (or raw-channel) pointer event, with coalesced
    /// sub-events. This is the single entry point into the stroke state
    /// machine.
    pub fn handle_pointer_event(&mut self, event: &RawPointerEvent) {
        // Session bookkeeping runs on the primary event first, so duplicate
        // downs never open a second stroke and the router sees the seed a
        // Down establishes.
        let backend = self
            .normalizer
            .active_native()
            .unwrap_or(SampleSource::WindowedPointer);
        match event.primary.phase {
            SamplePhase::Down => {
                match self.sessions.on_down(
                    event.primary.pointer_id,
                    backend,
                    event.primary.time_us,
                ) {
                    DownDecision::IgnoreDuplicate => return,
                    DownDecision::Restart => {
                        // Backend switched or an Up was lost: the old
                        // stroke can never complete.
                        self.engine.abort_stroke();
                    }
                    DownDecision::Start => {}
                }
            }
            SamplePhase::Up => {}
            SamplePhase::Move | SamplePhase::Hover => {
                if event.primary.phase == SamplePhase::Move && !self.sessions.has_seed() {
                    // Contact move with no session: the down was lost.
                    return;
                }
            }
        }

        self.drain_native_into_normalizer();

        for sample in self.normalizer.normalize(event) {
            self.engine.handle_sample(sample);
        }

        if event.primary.phase == SamplePhase::Up {
            self.sessions.end();
        }
    }

    /// Pull everything new from the native ring, route it into discrete
    /// strokes, and queue it for enrichment.
    fn drain_native_into_normalizer(&mut self) {
        let read = match self.ring.read_from(&mut self.cursor) {
            Ok(read) => read,
            Err(RingError::CursorInvalidated { .. }) => {
                // Epoch mismatch is a hard reset-and-resync.
                self.diagnostics.record(AnomalyKind::BufferEpochReset);
                self.cursor = self.ring.tail_cursor();
                match self.ring.read_from(&mut self.cursor) {
                    Ok(read) => read,
                    Err(error) => {
                        warn!(%error, "native ring resync failed");
                        return;
                    }
                }
            }
        };
        if read.dropped > 0 {
            warn!(dropped = read.dropped, "reader lagged native ring wraparound");
        }
        if read.samples.is_empty() {
            return;
        }

        let routed = self
            .router
            .route(read.samples, self.ring.epoch(), self.sessions.has_seed());
        self.normalizer.enqueue_native(routed);
    }

    /// Window blur / focus loss / explicit reset: the contact can never
    /// complete, so the stroke aborts and the layer keeps its last
    /// committed content.
    pub fn cancel_all(&mut self) {
        self.sessions.end();
        self.engine.abort_stroke();
    }

    /// Drive one frame. Backend faults are absorbed here: the stroke is
    /// already aborted by the engine, and the session downgrades to the
    /// CPU backend one-way.
    pub async fn step_frame(&mut self) -> Result<Option<DirtyRect>, EngineError> {
        match self.engine.step_frame().await {
            Ok(damage) => Ok(damage),
            Err(EngineError::BackendFault(reason)) => {
                self.downgrade(reason);
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    /// The one-way downgrade: swap in a fresh CPU accumulator and latch.
    /// Never upgraded back without explicit reinitialization.
    fn downgrade(&mut self, reason: String) {
        if self.downgraded && self.backend_kind() == BackendKind::Cpu {
            return;
        }
        warn!(%reason, "downgrading to cpu backend for the rest of the session");
        self.diagnostics.record(AnomalyKind::BackendFault);
        self.engine
            .replace_accumulator(Accumulator::cpu_fallback(&self.config.canvas));
        self.downgraded = true;
        self.notices
            .push_back(PipelineNotice::BackendDowngraded { reason });
        info!("backend downgraded");
    }
}
