//! Impasto input layer - sample normalization and session routing
//!
//! This crate turns raw events from up to three input sources (two native
//! streaming tablet backends and the windowed pointer channel) into one
//! canonical sample stream:
//! - [`sample::InputSample`] - canonical canvas-space input record
//! - [`ring::NativeSampleRing`] - bounded native sample channel with
//!   epoch/cursor semantics
//! - [`normalizer::SampleNormalizer`] - raw events to `InputSample`s
//! - [`router::SessionRouter`] - per-stroke ordering and contamination
//!   rejection for the native stream
//! - [`session::SessionTracker`] - pointer-contact session lifecycle
//! - [`diagnostics`] - fire-and-forget anomaly sink

pub mod diagnostics;
pub mod normalizer;
pub mod ring;
pub mod router;
pub mod sample;
pub mod session;

pub use diagnostics::*;
pub use normalizer::*;
pub use ring::*;
pub use router::*;
pub use sample::*;
pub use session::*;
