//! Pointer-contact session lifecycle.
//!
//! A session is one continuous physical pointer contact, identified by
//! pointer id and the active input backend. Exactly one session may be
//! active per pointer id. Duplicate `Down`s inside the suppression window
//! are ignored; a `Down` from a different backend forces a session reset.

use crate::sample::SampleSource;
use impasto_config::InputTuning;
use tracing::{debug, info};

/// One continuous pointer contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeSession {
    pub pointer_id: u32,
    pub backend: SampleSource,
    pub started_at_us: u64,
}

/// Decision for an incoming `Down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownDecision {
    /// No session was active; start one.
    Start,
    /// A duplicate `Down` arrived inside the suppression window; ignore it.
    IgnoreDuplicate,
    /// A session was active but must be torn down and restarted
    /// (backend switch, or a lost `Up`).
    Restart,
}

/// Tracks the at-most-one active session per pointer.
pub struct SessionTracker {
    tuning: InputTuning,
    active: Option<StrokeSession>,
}

impl SessionTracker {
    pub fn new(tuning: InputTuning) -> Self {
        Self {
            tuning,
            active: None,
        }
    }

    #[inline]
    pub fn active(&self) -> Option<&StrokeSession> {
        self.active.as_ref()
    }

    /// Whether a host-side session seed exists for the native router.
    #[inline]
    pub fn has_seed(&self) -> bool {
        self.active.is_some()
    }

    /// Handle a `Down` event. On `Start` and `Restart` the new session is
    /// recorded as active.
    pub fn on_down(&mut self, pointer_id: u32, backend: SampleSource, time_us: u64) -> DownDecision {
        let decision = match self.active {
            None => DownDecision::Start,
            Some(session) => {
                if session.backend == backend
                    && session.pointer_id == pointer_id
                    && time_us.saturating_sub(session.started_at_us)
                        <= self.tuning.down_suppression_us
                {
                    DownDecision::IgnoreDuplicate
                } else {
                    // Backend switched mid-contact, or an Up was lost.
                    DownDecision::Restart
                }
            }
        };

        match decision {
            DownDecision::IgnoreDuplicate => {
                debug!(pointer_id, ?backend, "duplicate down suppressed");
            }
            DownDecision::Start | DownDecision::Restart => {
                if decision == DownDecision::Restart {
                    info!(pointer_id, ?backend, "session reset by new down");
                }
                self.active = Some(StrokeSession {
                    pointer_id,
                    backend,
                    started_at_us: time_us,
                });
            }
        }

        decision
    }

    /// Handle `Up`, `Cancel`, window blur, or a backend switch: ends the
    /// active session if any.
    pub fn end(&mut self) -> Option<StrokeSession> {
        self.active.take()
    }
}
