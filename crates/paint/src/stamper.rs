//! Dab generation.
//!
//! The generator consumes the ordered sample stream of an active stroke and
//! emits discrete dab placements. A dab is due each time cumulative travel
//! since the last dab reaches the brush spacing distance; placements are
//! interpolated along the sample segments so density does not depend on
//! input rate. On stroke end, residual travel below the spacing threshold
//! is force-flushed as a final dab so strokes do not visually truncate.

use glam::DVec2;
use tracing::debug;

use crate::brush::BrushConfig;
use crate::constants::MIN_DAB_FOOTPRINT;
use crate::dynamics::{
    DabContext, dual_tip_placement, jitter_angle, jitter_color, scatter_offset,
};
use crate::pressure::{PressureCurve, SpeedSensor};
use crate::types::DabPlacement;
use impasto_config::InputTuning;
use impasto_input::InputSample;

/// Generates dab placements from the sample stream of one stroke.
pub struct DabGenerator {
    curve: PressureCurve,
    speed: SpeedSensor,
    /// Last sample position (None until the first sample of a stroke)
    last_pos: Option<DVec2>,
    /// Curved pressure of the last sample
    last_pressure: f32,
    last_tilt: (f32, f32),
    last_time_us: u64,
    last_speed: f32,
    /// Travel accumulated since the last emitted dab
    distance_acc: f32,
    /// Direction of the last non-degenerate segment, radians
    direction: f32,
    dab_index: u64,
    stroke_seed: u64,
    active: bool,
}

impl DabGenerator {
    pub fn new(tuning: &InputTuning, curve: PressureCurve) -> Self {
        Self {
            curve,
            speed: SpeedSensor::new(tuning),
            last_pos: None,
            last_pressure: 0.0,
            last_tilt: (0.0, 0.0),
            last_time_us: 0,
            last_speed: 0.0,
            distance_acc: 0.0,
            direction: 0.0,
            dab_index: 0,
            stroke_seed: 0,
            active: false,
        }
    }

    /// Replace the global pressure curve.
    pub fn set_curve(&mut self, curve: PressureCurve) {
        self.curve = curve;
    }

    /// Reset for a new stroke. The seed feeds deterministic dynamics.
    pub fn begin_stroke(&mut self, stroke_seed: u64) {
        self.speed.reset();
        self.last_pos = None;
        self.last_pressure = 0.0;
        self.last_tilt = (0.0, 0.0);
        self.last_time_us = 0;
        self.last_speed = 0.0;
        self.distance_acc = 0.0;
        self.direction = 0.0;
        self.dab_index = 0;
        self.stroke_seed = stroke_seed;
        self.active = true;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Process one sample, emitting zero or more dab placements.
    ///
    /// The brush snapshot is consulted fresh on every call; configuration
    /// changes mid-stroke apply from the next dab onward.
    pub fn process_sample(&mut self, brush: &BrushConfig, sample: &InputSample) -> Vec<DabPlacement> {
        if !self.active {
            debug!("process_sample: no active stroke, ignoring");
            return Vec::new();
        }

        let pos = DVec2::new(sample.x, sample.y);
        let pressure = self.curve.apply(sample.pressure);
        let speed = self.speed.sample(sample.x, sample.y, sample.host_time_us);
        let tilt = (sample.tilt_x, sample.tilt_y);

        let mut dabs = Vec::new();

        // First sample of the stroke: stamp once at the contact point.
        let Some(last) = self.last_pos else {
            self.last_pos = Some(pos);
            self.last_pressure = pressure;
            self.last_tilt = tilt;
            self.last_time_us = sample.host_time_us;
            self.last_speed = speed;
            self.distance_acc = 0.0;

            self.emit(&mut dabs, brush, pos, pressure, speed, tilt, sample.host_time_us);
            return dabs;
        };

        let delta = pos - last;
        let distance = delta.length() as f32;
        if distance < 1e-4 {
            // Stationary sample: update dynamics state only.
            self.last_pressure = pressure;
            self.last_tilt = tilt;
            self.last_time_us = sample.host_time_us;
            self.last_speed = speed;
            return dabs;
        }
        self.direction = delta.y.atan2(delta.x) as f32;

        let spacing = brush.spacing_distance();

        // Walk the segment, emitting a dab each time cumulative travel
        // crosses a spacing multiple. Segment endpoints themselves are
        // excluded (strict <); an endpoint landing exactly on a multiple
        // is stamped at the start of the next segment instead, so no
        // position is ever stamped twice.
        let mut s = spacing - self.distance_acc;
        if s < 0.0 {
            s = 0.0;
        }
        let mut last_emitted = None;
        while s < distance {
            let t = (s / distance) as f64;
            let at = last.lerp(pos, t);
            let p = lerp(self.last_pressure, pressure, t as f32);
            let tl = (
                lerp(self.last_tilt.0, tilt.0, t as f32),
                lerp(self.last_tilt.1, tilt.1, t as f32),
            );
            let time = lerp_u64(self.last_time_us, sample.host_time_us, t);
            let sp = lerp(self.last_speed, speed, t as f32);

            self.emit(&mut dabs, brush, at, p, sp, tl, time);
            last_emitted = Some(s);
            s += spacing;
        }

        self.distance_acc = match last_emitted {
            Some(at) => distance - at,
            None => self.distance_acc + distance,
        };

        self.last_pos = Some(pos);
        self.last_pressure = pressure;
        self.last_tilt = tilt;
        self.last_time_us = sample.host_time_us;
        self.last_speed = speed;

        if !dabs.is_empty() {
            debug!(count = dabs.len(), "dabs emitted along segment");
        }
        dabs
    }

    /// Finish the stroke, force-flushing residual travel as a final dab at
    /// the last sample position. Returns None if no sample ever arrived.
    pub fn end_stroke(&mut self, brush: &BrushConfig) -> Option<DabPlacement> {
        if !self.active {
            return None;
        }
        self.active = false;

        let pos = self.last_pos.take()?;
        let mut dabs = Vec::with_capacity(1);
        self.emit(
            &mut dabs,
            brush,
            pos,
            self.last_pressure,
            self.last_speed,
            self.last_tilt,
            self.last_time_us,
        );
        self.distance_acc = 0.0;
        dabs.into_iter().next()
    }

    /// Abandon the stroke without a final dab.
    pub fn cancel_stroke(&mut self) {
        self.active = false;
        self.last_pos = None;
        self.distance_acc = 0.0;
    }

    fn emit(
        &mut self,
        out: &mut Vec<DabPlacement>,
        brush: &BrushConfig,
        pos: DVec2,
        pressure: f32,
        speed: f32,
        tilt: (f32, f32),
        time_us: u64,
    ) {
        let dynamics = &brush.dynamics;
        let ctx = DabContext {
            stroke_seed: self.stroke_seed,
            dab_index: self.dab_index,
        };
        self.dab_index += 1;

        // Size: pressure response, then speed thinning, then the minimum
        // footprint with alpha-coverage compensation for sub-unit sizes.
        let pressure_scale = if dynamics.size_by_pressure {
            lerp(brush.min_size_fraction.clamp(0.0, 1.0), 1.0, pressure)
        } else {
            1.0
        };
        let speed_scale = 1.0 - dynamics.size_by_speed.clamp(0.0, 1.0) * speed;
        let requested = (brush.size * pressure_scale * speed_scale).max(0.0);
        let (size, coverage) = if requested < MIN_DAB_FOOTPRINT {
            let ratio = (requested / MIN_DAB_FOOTPRINT).clamp(0.0, 1.0);
            (MIN_DAB_FOOTPRINT, ratio * ratio)
        } else {
            (requested, 1.0)
        };

        let opacity = if dynamics.opacity_by_pressure {
            pressure.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let flow = (brush.flow.clamp(0.0, 1.0) * coverage).clamp(0.0, 1.0);

        // Tip shape: roundness flattened by tilt, angle from the brush,
        // travel direction, tilt azimuth, and jitter.
        let mut roundness = brush.roundness.clamp(0.01, 1.0);
        let mut angle = brush.angle_deg.to_radians();
        if dynamics.angle_by_direction {
            angle += self.direction;
        }
        if dynamics.shape_by_tilt {
            let tilt_mag = (tilt.0 * tilt.0 + tilt.1 * tilt.1).sqrt().min(1.0);
            if tilt_mag > 0.1 {
                roundness *= 1.0 - 0.6 * tilt_mag;
                angle += tilt.1.atan2(tilt.0);
            }
        }
        angle += jitter_angle(ctx, dynamics.shape_jitter);

        let (sx, sy) = scatter_offset(ctx, dynamics.scatter, size);
        let color = jitter_color(ctx, brush.color, dynamics.color_jitter);

        let primary = DabPlacement {
            x: pos.x as f32 + sx,
            y: pos.y as f32 + sy,
            size,
            roundness: roundness.max(0.01),
            angle,
            flip_x: brush.flip_x,
            flip_y: brush.flip_y,
            flow,
            opacity,
            color,
            hardness: brush.hardness.clamp(0.0, 1.0),
            mask: brush.mask,
            texture: brush.texture.map(|t| t.id),
            wet_edge: brush.wet_edge,
            timestamp_us: time_us,
            speed_norm: speed,
        };
        out.push(primary);

        if let Some(dual) = dynamics.dual_tip {
            out.push(dual_tip_placement(
                &primary,
                self.direction,
                dual.size_ratio,
                dual.offset,
                dual.flow_ratio,
            ));
        }
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline]
fn lerp_u64(a: u64, b: u64, t: f64) -> u64 {
    if b >= a {
        a + ((b - a) as f64 * t) as u64
    } else {
        a - ((a - b) as f64 * t) as u64
    }
}
