//! Impasto GPU backend - accelerated stroke accumulation
//!
//! A [`GpuAccumulator`] stamps batched dabs into a `vec4<f32>` storage
//! buffer with a compute shader. The buffer shares the CPU backend's pixel
//! layout, so `prepare_end_stroke` reads it back and the commit runs
//! through the same compositing path as the CPU backend.

mod accumulator;

pub use accumulator::*;
