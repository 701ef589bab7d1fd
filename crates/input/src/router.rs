//! Session routing for the native sample stream.
//!
//! Native backends deliver samples grouped by an explicit `stroke_id`, but
//! delivery is neither clean nor exclusive: the tail of a previous stroke can
//! interleave with the head of the next one, samples can arrive before their
//! `Down`, and a second source can contaminate a session. The router resolves
//! all of that into a single ordered per-stroke stream. Anomalies are counted
//! through the diagnostics sink, never raised as hard failures.

use crate::diagnostics::{AnomalyKind, DiagnosticsSink};
use crate::sample::{NativeSample, SamplePhase, SampleSource};
use std::sync::Arc;
use tracing::debug;

/// Routes raw native samples into discrete stroke sessions.
///
/// Only samples belonging to the most recent stroke that has seen an
/// explicit `Down` are forwarded. Stale in-flight samples from a previous
/// stroke are dropped; stray samples with no `Down` yet are withheld until
/// their `Down` arrives (or a newer stroke supersedes them).
pub struct SessionRouter {
    diagnostics: Arc<dyn DiagnosticsSink>,
    /// Ring epoch the router last saw; a change resets all state.
    epoch: u64,
    /// Highest sequence number forwarded or inspected.
    last_seq: Option<u64>,
    /// Most recent stroke that has seen a `Down`.
    current_stroke: Option<u64>,
    /// Source locked in for the current stroke.
    current_source: Option<SampleSource>,
    /// Whether the current stroke already saw its `Up`.
    current_ended: bool,
    /// Samples withheld because their stroke has no `Down` yet.
    pending_stroke: Option<u64>,
    pending: Vec<NativeSample>,
}

impl SessionRouter {
    pub fn new(diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            diagnostics,
            epoch: 0,
            last_seq: None,
            current_stroke: None,
            current_source: None,
            current_ended: false,
            pending_stroke: None,
            pending: Vec::new(),
        }
    }

    /// Stroke id currently being forwarded, if any.
    pub fn current_stroke(&self) -> Option<u64> {
        self.current_stroke
    }

    /// Route a drained batch of native samples.
    ///
    /// `epoch` is the ring epoch the batch was read under; a mismatch with
    /// the previous call resets routing state. `host_seed` reports whether a
    /// host-side session seed exists (a native `Down` without one is
    /// anomalous but still routed).
    pub fn route(
        &mut self,
        samples: Vec<NativeSample>,
        epoch: u64,
        host_seed: bool,
    ) -> Vec<NativeSample> {
        if epoch != self.epoch {
            debug!(old = self.epoch, new = epoch, "ring epoch changed, router reset");
            self.diagnostics.record(AnomalyKind::BufferEpochReset);
            self.reset();
            self.epoch = epoch;
        }

        let mut out = Vec::with_capacity(samples.len());
        for sample in samples {
            if let Some(last) = self.last_seq {
                if sample.seq <= last {
                    self.diagnostics.record(AnomalyKind::SequenceRewind);
                    continue;
                }
            }
            self.last_seq = Some(sample.seq);
            self.route_one(sample, host_seed, &mut out);
        }
        out
    }

    fn route_one(&mut self, sample: NativeSample, host_seed: bool, out: &mut Vec<NativeSample>) {
        match self.current_stroke {
            Some(current) if sample.stroke_id == current => {
                if self.current_ended {
                    // Contact already lifted; anything after the Up is tail.
                    self.diagnostics.record(AnomalyKind::StrokeTailDrop);
                    return;
                }
                if Some(sample.source) != self.current_source {
                    self.diagnostics.record(AnomalyKind::MixedSourceReject);
                    return;
                }
                if sample.phase == SamplePhase::Up {
                    self.current_ended = true;
                }
                out.push(sample);
            }
            Some(current) if sample.stroke_id < current => {
                // In-flight tail of an older stroke.
                self.diagnostics.record(AnomalyKind::StrokeTailDrop);
            }
            _ => {
                // A newer stroke than the current one (or no current at all).
                if sample.phase == SamplePhase::Down {
                    self.begin_stroke(sample, host_seed, out);
                } else {
                    self.withhold(sample);
                }
            }
        }
    }

    fn begin_stroke(&mut self, down: NativeSample, host_seed: bool, out: &mut Vec<NativeSample>) {
        if !host_seed {
            self.diagnostics.record(AnomalyKind::MissingNativeSeed);
        }

        let stroke_id = down.stroke_id;
        self.current_stroke = Some(stroke_id);
        self.current_source = Some(down.source);
        self.current_ended = false;
        out.push(down);

        // Flush samples for this stroke that arrived ahead of their Down.
        if self.pending_stroke == Some(stroke_id) {
            let mut withheld = std::mem::take(&mut self.pending);
            withheld.sort_by_key(|s| s.seq);
            for sample in withheld {
                self.route_one(sample, host_seed, out);
            }
        } else if !self.pending.is_empty() {
            // Withheld samples belonged to some other stroke; superseded now.
            for _ in &self.pending {
                self.diagnostics.record(AnomalyKind::StrokeTailDrop);
            }
            self.pending.clear();
        }
        self.pending_stroke = None;
    }

    fn withhold(&mut self, sample: NativeSample) {
        if self.pending_stroke != Some(sample.stroke_id) {
            // Only the newest strayed stroke is worth waiting for.
            for _ in &self.pending {
                self.diagnostics.record(AnomalyKind::StrokeTailDrop);
            }
            self.pending.clear();
            self.pending_stroke = Some(sample.stroke_id);
        }
        debug!(
            stroke_id = sample.stroke_id,
            seq = sample.seq,
            "withholding sample with no down yet"
        );
        self.pending.push(sample);
    }

    fn reset(&mut self) {
        self.last_seq = None;
        self.current_stroke = None;
        self.current_source = None;
        self.current_ended = false;
        self.pending_stroke = None;
        self.pending.clear();
    }
}
