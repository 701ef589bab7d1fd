//! Committed-stroke records for the external undo/history system.
//!
//! Undo itself is an external collaborator; the engine only delivers one
//! record per committed stroke, carrying the pre-stroke snapshot taken at
//! `Down` and the committed region.

use impasto_paint::{DirtyRect, LayerId, LayerImage};

/// One committed stroke, as handed to the history sink.
#[derive(Debug, Clone)]
pub struct StrokeRecord {
    pub stroke_id: u64,
    pub layer: LayerId,
    /// Layer content captured before the first dab.
    pub snapshot: LayerImage,
    /// Region the commit touched; None for an empty stroke.
    pub dirty_rect: Option<DirtyRect>,
    pub dab_count: u64,
    pub started_at_us: u64,
    pub finished_at_us: u64,
}

/// Receiver for committed-stroke records.
pub trait HistorySink {
    fn record_stroke(&mut self, record: StrokeRecord);
}

/// Discards records; for callers without undo.
#[derive(Debug, Default)]
pub struct NoopHistory;

impl HistorySink for NoopHistory {
    fn record_stroke(&mut self, _record: StrokeRecord) {}
}

/// Keeps records in memory; used by tests and simple hosts.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Vec<StrokeRecord>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[StrokeRecord] {
        &self.records
    }
}

impl HistorySink for MemoryHistory {
    fn record_stroke(&mut self, record: StrokeRecord) {
        self.records.push(record);
    }
}
