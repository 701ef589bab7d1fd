//! The stroke lifecycle state machine, as an explicit tagged enum.

use impasto_input::InputSample;

/// Lifecycle of one logical stroke.
///
/// `Idle -> Starting -> Active -> Finishing -> Idle`. At most one stroke is
/// in a non-idle phase at a time. `Starting` buffers every sample that
/// arrives while the asynchronous `begin_stroke` is in flight; the buffer
/// is replayed in arrival order on the transition to `Active`, before any
/// live-queue processing.
#[derive(Debug)]
pub enum StrokePhase {
    Idle,
    Starting {
        /// Samples buffered while `begin_stroke` is in flight. Never
        /// dropped, never processed before the transition.
        pending: Vec<InputSample>,
        /// An end request arrived during `Starting`; the stroke finishes
        /// immediately after the pending buffer replays.
        pending_end: bool,
    },
    Active,
    Finishing,
}

impl StrokePhase {
    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self, StrokePhase::Idle)
    }

    #[inline]
    pub fn is_starting(&self) -> bool {
        matches!(self, StrokePhase::Starting { .. })
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, StrokePhase::Active)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            StrokePhase::Idle => "idle",
            StrokePhase::Starting { .. } => "starting",
            StrokePhase::Active => "active",
            StrokePhase::Finishing => "finishing",
        }
    }
}
