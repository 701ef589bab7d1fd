//! Shared configuration for Impasto
//!
//! This crate is the single source of truth for canvas dimensions, input
//! tuning policy, and frame pacing shared across the stroke pipeline crates.
//! All empirically-tuned thresholds (pointer-down suppression, missing-seed
//! retry streak, speed smoothing) live here so they can be adjusted per
//! hardware/driver without touching pipeline code.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default canvas width in pixels
pub const DEFAULT_CANVAS_WIDTH: u32 = 1920;

/// Default canvas height in pixels
pub const DEFAULT_CANVAS_HEIGHT: u32 = 1080;

/// Default frame cadence in frames per second
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Default capacity of the native sample ring buffer
pub const DEFAULT_RING_CAPACITY: usize = 512;

/// Canvas configuration for the stroke scratch buffer and layer images
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Scale factor for DPI scaling of incoming pointer coordinates
    pub scale: f32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_CANVAS_WIDTH,
            height: DEFAULT_CANVAS_HEIGHT,
            scale: 1.0,
        }
    }
}

impl CanvasConfig {
    /// Create a new canvas config with the given dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            scale: 1.0,
        }
    }

    /// Get width as f32 for calculations
    pub fn width_f32(&self) -> f32 {
        self.width as f32
    }

    /// Get height as f32 for calculations
    pub fn height_f32(&self) -> f32 {
        self.height as f32
    }
}

/// Tuning policy for input normalization and session routing.
///
/// These are hardware/driver-dependent thresholds, not correctness
/// requirements. Defaults were chosen against consumer tablet drivers and
/// are expected to be overridden per platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InputTuning {
    /// Window after an accepted pointer-down during which a second down for
    /// the same backend+pointer pair is ignored as a duplicate, in
    /// microseconds.
    pub down_suppression_us: u64,
    /// Consecutive windowed events with no matching native sample before
    /// the native backend is considered absent for the session.
    pub missing_seed_retry_streak: u32,
    /// Number of recent samples the speed sensor averages over.
    pub speed_window: usize,
    /// Speed (canvas units per millisecond) that maps to a normalized
    /// speed of 1.0. Faster movement is clamped.
    pub speed_full_scale: f32,
    /// Capacity of the native sample ring buffer. Must be a power of two.
    pub ring_capacity: usize,
}

impl Default for InputTuning {
    fn default() -> Self {
        Self {
            down_suppression_us: 40_000,
            missing_seed_retry_streak: 3,
            speed_window: 8,
            speed_full_scale: 5.0,
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

/// Which stroke accumulator backend to prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendPreference {
    /// Use the GPU backend when available, CPU otherwise.
    #[default]
    Auto,
    /// Always use the CPU raster backend.
    ForceCpu,
    /// Use the GPU backend; fail stroke initialization if unavailable.
    ForceGpu,
}

/// Frame pacing configuration for the frame driver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Target frames per second for the composite loop.
    pub frame_rate: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

impl FrameConfig {
    /// Interval between frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }
}

/// Top-level pipeline configuration bundle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    pub canvas: CanvasConfig,
    pub input: InputTuning,
    pub frame: FrameConfig,
    pub backend: BackendPreference,
}

impl PipelineConfig {
    /// Parse a configuration bundle from JSON (settings files, test
    /// fixtures). Missing sections are not defaulted; callers layering
    /// partial overrides should deserialize into `serde_json::Value`
    /// first.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_canvas() {
        let config = CanvasConfig::default();
        assert_eq!(config.width, DEFAULT_CANVAS_WIDTH);
        assert_eq!(config.height, DEFAULT_CANVAS_HEIGHT);
        assert_eq!(config.scale, 1.0);
    }

    #[test]
    fn test_frame_interval() {
        let frame = FrameConfig { frame_rate: 60 };
        let interval = frame.frame_interval();
        assert!((interval.as_secs_f64() - 1.0 / 60.0).abs() < 1e-9);

        // Zero fps must not divide by zero
        let degenerate = FrameConfig { frame_rate: 0 };
        assert_eq!(degenerate.frame_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_input_tuning_defaults() {
        let tuning = InputTuning::default();
        assert_eq!(tuning.down_suppression_us, 40_000);
        assert_eq!(tuning.missing_seed_retry_streak, 3);
        assert!(tuning.ring_capacity.is_power_of_two());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = PipelineConfig::default();
        config.canvas.width = 800;
        config.backend = BackendPreference::ForceCpu;

        let json = config.to_json().unwrap();
        let back = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(back.canvas.width, 800);
        assert_eq!(back.backend, BackendPreference::ForceCpu);
        assert_eq!(back.input.down_suppression_us, config.input.down_suppression_us);
    }
}
