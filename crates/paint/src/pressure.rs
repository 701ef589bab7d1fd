//! Pressure curve and speed sensor.
//!
//! Raw pressure passes through a configurable global curve (a baked lookup
//! table) before being combined with per-dab dynamic sensors. The speed
//! sensor normalizes inter-sample velocity and smooths it over a fixed
//! window so a single noisy sample cannot spike stroke width.

use crate::constants::PRESSURE_LUT_SIZE;
use impasto_config::InputTuning;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Global pressure response curve, baked to a lookup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressureCurve {
    table: Vec<f32>,
}

impl Default for PressureCurve {
    fn default() -> Self {
        Self::identity()
    }
}

impl PressureCurve {
    /// Linear response.
    pub fn identity() -> Self {
        let table = (0..PRESSURE_LUT_SIZE)
            .map(|i| i as f32 / (PRESSURE_LUT_SIZE - 1) as f32)
            .collect();
        Self { table }
    }

    /// Power-curve response. `gamma < 1` makes light touches heavier,
    /// `gamma > 1` requires more force for the same output.
    pub fn gamma(gamma: f32) -> Self {
        let gamma = gamma.max(0.05);
        let table = (0..PRESSURE_LUT_SIZE)
            .map(|i| {
                let t = i as f32 / (PRESSURE_LUT_SIZE - 1) as f32;
                t.powf(gamma)
            })
            .collect();
        Self { table }
    }

    /// Bake a curve from monotonic control points `(input, output)` in
    /// [0, 1]. Points outside the range are clamped; segments between
    /// points are linear.
    pub fn from_points(points: &[(f32, f32)]) -> Self {
        if points.is_empty() {
            return Self::identity();
        }
        let mut pts: Vec<(f32, f32)> = points
            .iter()
            .map(|&(x, y)| (x.clamp(0.0, 1.0), y.clamp(0.0, 1.0)))
            .collect();
        pts.sort_by(|a, b| a.0.total_cmp(&b.0));

        let table = (0..PRESSURE_LUT_SIZE)
            .map(|i| {
                let t = i as f32 / (PRESSURE_LUT_SIZE - 1) as f32;
                match pts.iter().position(|&(x, _)| x >= t) {
                    Some(0) => pts[0].1,
                    Some(j) => {
                        let (x0, y0) = pts[j - 1];
                        let (x1, y1) = pts[j];
                        if (x1 - x0).abs() < 1e-6 {
                            y1
                        } else {
                            y0 + (y1 - y0) * (t - x0) / (x1 - x0)
                        }
                    }
                    None => pts[pts.len() - 1].1,
                }
            })
            .collect();
        Self { table }
    }

    /// Map a raw pressure value through the curve.
    pub fn apply(&self, pressure: f32) -> f32 {
        let p = pressure.clamp(0.0, 1.0);
        let scaled = p * (self.table.len() - 1) as f32;
        let i = scaled.floor() as usize;
        let frac = scaled - i as f32;
        if i + 1 >= self.table.len() {
            return self.table[self.table.len() - 1];
        }
        self.table[i] + (self.table[i + 1] - self.table[i]) * frac
    }
}

/// Normalized, smoothed stroke speed.
///
/// Speed is measured in canvas units per millisecond, scaled so that
/// `speed_full_scale` maps to 1.0, clamped, then averaged over the last
/// `speed_window` samples.
#[derive(Debug)]
pub struct SpeedSensor {
    window: VecDeque<f32>,
    capacity: usize,
    full_scale: f32,
    last: Option<(f64, f64, u64)>,
}

impl SpeedSensor {
    pub fn new(tuning: &InputTuning) -> Self {
        Self {
            window: VecDeque::with_capacity(tuning.speed_window.max(1)),
            capacity: tuning.speed_window.max(1),
            full_scale: tuning.speed_full_scale.max(1e-3),
            last: None,
        }
    }

    /// Reset for a new stroke.
    pub fn reset(&mut self) {
        self.window.clear();
        self.last = None;
    }

    /// Feed one sample; returns the smoothed normalized speed in [0, 1].
    pub fn sample(&mut self, x: f64, y: f64, time_us: u64) -> f32 {
        let instantaneous = match self.last {
            None => 0.0,
            Some((lx, ly, lt)) => {
                let dt_ms = time_us.saturating_sub(lt) as f64 / 1_000.0;
                if dt_ms <= 0.0 {
                    // Duplicate timestamp: keep the previous estimate.
                    self.window.back().copied().unwrap_or(0.0)
                } else {
                    let dist = ((x - lx).powi(2) + (y - ly).powi(2)).sqrt();
                    ((dist / dt_ms) as f32 / self.full_scale).clamp(0.0, 1.0)
                }
            }
        };
        self.last = Some((x, y, time_us));

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(instantaneous);

        let sum: f32 = self.window.iter().sum();
        (sum / self.window.len() as f32).clamp(0.0, 1.0)
    }
}
