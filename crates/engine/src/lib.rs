//! Impasto stroke engine - lifecycle, pacing, and wiring
//!
//! This crate owns the stroke lifecycle:
//! - [`state::StrokePhase`] - the explicit stroke state machine
//! - [`engine::StrokeEngine`] - sample ingestion, async begin/finish,
//!   the finishing lock, and the per-frame queue
//! - [`backend`] - accumulator backend selection with one-way downgrade
//! - [`frame::FrameDriver`] - fixed-cadence frame loop
//! - [`pipeline::StrokePipeline`] - the full input-to-pixel facade
//! - [`history`] - committed-stroke records for the external undo system

pub mod backend;
pub mod engine;
pub mod frame;
pub mod history;
pub mod pipeline;
pub mod state;

pub use backend::*;
pub use engine::*;
pub use frame::*;
pub use history::*;
pub use pipeline::*;
pub use state::*;
