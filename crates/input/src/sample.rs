use serde::{Deserialize, Serialize};

/// Which input channel produced a sample.
///
/// `NativeA` and `NativeB` are the two low-level streaming tablet backends;
/// `WindowedPointer` is the standard windowed pointer-event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SampleSource {
    NativeA = 0,
    NativeB = 1,
    WindowedPointer = 2,
}

impl SampleSource {
    /// Whether this source is one of the native streaming backends.
    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self, SampleSource::NativeA | SampleSource::NativeB)
    }
}

/// Contact phase of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SamplePhase {
    Down = 0,
    Move = 1,
    Up = 2,
    Hover = 3,
}

impl SamplePhase {
    /// Whether the pointer is in contact with the surface during this phase.
    #[inline]
    pub fn is_contact(&self) -> bool {
        matches!(self, SamplePhase::Down | SamplePhase::Move | SamplePhase::Up)
    }
}

/// Canonical unit of input in canvas space.
///
/// Created by the [`crate::normalizer::SampleNormalizer`] per raw event (or
/// per coalesced sub-event) and never mutated after creation. `host_time_us`
/// is monotonically non-decreasing within one session, and `pressure` is
/// forced to zero exactly at `Up`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    /// Position in canvas space
    pub x: f64,
    pub y: f64,
    /// Contact pressure in [0, 1]
    pub pressure: f32,
    /// Stylus tilt, normalized to [-1, 1]
    pub tilt_x: f32,
    pub tilt_y: f32,
    /// Barrel rotation in degrees
    pub rotation: f32,
    /// Host-side arrival time in monotonic microseconds
    pub host_time_us: u64,
    /// Device-side sample time in monotonic microseconds
    pub device_time_us: u64,
    /// Which channel produced this sample
    pub source: SampleSource,
    /// Contact phase
    pub phase: SamplePhase,
}

impl InputSample {
    /// Whether this sample belongs to a pointer contact (not hover).
    #[inline]
    pub fn is_contact(&self) -> bool {
        self.phase.is_contact()
    }
}

/// One raw record in the native sample ring buffer.
///
/// `seq` is assigned by the ring on push and is monotonic within an epoch.
/// `stroke_id` groups samples into discrete strokes on the device side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NativeSample {
    /// Ring sequence number (assigned on push)
    pub seq: u64,
    /// Device-side stroke grouping id
    pub stroke_id: u64,
    /// Position in canvas space
    pub x: f64,
    pub y: f64,
    /// Contact pressure in [0, 1]
    pub pressure: f32,
    /// Stylus tilt, normalized to [-1, 1]
    pub tilt_x: f32,
    pub tilt_y: f32,
    /// Barrel rotation in degrees
    pub rotation: f32,
    /// Device-side sample time in monotonic microseconds
    pub device_time_us: u64,
    /// Contact phase
    pub phase: SamplePhase,
    /// Which native backend produced this record
    pub source: SampleSource,
}
