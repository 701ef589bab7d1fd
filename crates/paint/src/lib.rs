//! Impasto painting core - dab generation and stroke accumulation
//!
//! This crate provides the pixel-facing half of the stroke pipeline:
//! - [`types::DabPlacement`] - one brush stamp, plus its GPU-compatible form
//! - [`brush::BrushConfig`] - read-only brush snapshot consulted per sample
//! - [`pressure`] - pressure curve LUT and speed sensor
//! - [`stamper::DabGenerator`] - samples to dab placements at a spacing policy
//! - [`dynamics`] - deterministic optional per-dab dynamics
//! - [`surface`] / [`tiles`] - scratch surface with tiled dirty tracking
//! - [`layer`] - layer-store boundary traits
//! - [`accumulator`] - the `StrokeAccumulator` trait and CPU backend

pub mod accumulator;
pub mod brush;
pub mod constants;
pub mod dynamics;
pub mod layer;
pub mod pressure;
pub mod stamper;
pub mod surface;
pub mod tiles;
pub mod types;

pub use accumulator::*;
pub use brush::*;
pub use constants::*;
pub use dynamics::*;
pub use layer::*;
pub use pressure::*;
pub use stamper::*;
pub use surface::*;
pub use tiles::*;
pub use types::*;
