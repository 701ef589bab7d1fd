//! Fire-and-forget anomaly reporting.
//!
//! Every pipeline component receives an explicit [`DiagnosticsSink`] instead
//! of writing to an ambient global registry. Events are consumed by
//! observability tooling, never by control flow.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Anomaly classes recorded by the input and stroke layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// Samples from a second source arrived inside one native session.
    MixedSourceReject,
    /// A native `Down` arrived with no host-side session seed.
    MissingNativeSeed,
    /// A stale in-flight sample from a previous stroke was dropped.
    StrokeTailDrop,
    /// Native sequence numbers went backwards.
    SequenceRewind,
    /// The native ring buffer was cleared or wrapped; cursors resynced.
    BufferEpochReset,
    /// The accelerated backend reported an unrecoverable fault.
    BackendFault,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 6] = [
        AnomalyKind::MixedSourceReject,
        AnomalyKind::MissingNativeSeed,
        AnomalyKind::StrokeTailDrop,
        AnomalyKind::SequenceRewind,
        AnomalyKind::BufferEpochReset,
        AnomalyKind::BackendFault,
    ];

    #[inline]
    fn index(self) -> usize {
        match self {
            AnomalyKind::MixedSourceReject => 0,
            AnomalyKind::MissingNativeSeed => 1,
            AnomalyKind::StrokeTailDrop => 2,
            AnomalyKind::SequenceRewind => 3,
            AnomalyKind::BufferEpochReset => 4,
            AnomalyKind::BackendFault => 5,
        }
    }
}

/// Sink for anomaly events. Implementations must be cheap and must never
/// fail; callers do not observe the result.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, kind: AnomalyKind);
}

/// Default sink: forwards anomalies to `tracing`.
#[derive(Debug, Default)]
pub struct LogDiagnostics;

impl DiagnosticsSink for LogDiagnostics {
    fn record(&self, kind: AnomalyKind) {
        warn!(?kind, "input anomaly");
    }
}

/// Counting sink for tests and health reporting.
#[derive(Debug, Default)]
pub struct CountingDiagnostics {
    counters: [AtomicU64; 6],
}

impl CountingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `kind` was recorded.
    pub fn count(&self, kind: AnomalyKind) -> u64 {
        self.counters[kind.index()].load(Ordering::Relaxed)
    }

    /// Total across all anomaly classes.
    pub fn total(&self) -> u64 {
        self.counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

impl DiagnosticsSink for CountingDiagnostics {
    fn record(&self, kind: AnomalyKind) {
        self.counters[kind.index()].fetch_add(1, Ordering::Relaxed);
    }
}
