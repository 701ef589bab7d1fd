//! Raw event to canonical sample conversion.
//!
//! The normalizer is the single point where the three input channels meet.
//! When a native streaming backend is active and the event is trusted,
//! pressure/tilt/rotation are taken from the native sample queue rather than
//! the windowed pointer event; otherwise the windowed event's own fields are
//! used, with tilt normalized from degrees and an altitude/azimuth fallback.
//! Pressure is force-zeroed at `Up` so strokes always taper to nothing.

use crate::diagnostics::{AnomalyKind, DiagnosticsSink};
use crate::sample::{InputSample, NativeSample, SamplePhase, SampleSource};
use impasto_config::InputTuning;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Pressure reported for a contact event that carries no pressure of its
/// own (a mouse), matching the windowed pointer-event convention.
const DEFAULT_CONTACT_PRESSURE: f32 = 0.5;

/// One windowed pointer event (or coalesced sub-event) as delivered by the
/// host. Tilt is in degrees when present; the altitude/azimuth pair is in
/// radians and is only consulted when the tilt fields are absent.
#[derive(Debug, Clone, Copy)]
pub struct PointerEventData {
    pub pointer_id: u32,
    pub x: f64,
    pub y: f64,
    pub phase: SamplePhase,
    pub pressure: Option<f32>,
    pub tilt_x_deg: Option<f32>,
    pub tilt_y_deg: Option<f32>,
    pub altitude_rad: Option<f32>,
    pub azimuth_rad: Option<f32>,
    pub rotation_deg: f32,
    pub time_us: u64,
}

/// A raw windowed event plus its coalesced sub-events, if the host batched
/// any. `trusted` is false for programmatic replays, which must never be
/// enriched from the native stream.
#[derive(Debug, Clone)]
pub struct RawPointerEvent {
    pub primary: PointerEventData,
    pub coalesced: Vec<PointerEventData>,
    pub trusted: bool,
}

impl RawPointerEvent {
    pub fn single(primary: PointerEventData) -> Self {
        Self {
            primary,
            coalesced: Vec::new(),
            trusted: true,
        }
    }
}

/// Normalize a tilt angle in degrees to [-1, 1].
#[inline]
pub fn tilt_from_degrees(deg: f32) -> f32 {
    (deg / 90.0).clamp(-1.0, 1.0)
}

/// Derive normalized (tilt_x, tilt_y) from an altitude/azimuth pair in
/// radians, per the pointer-event conversion: a vertical pen (altitude
/// pi/2) has zero tilt, a flat pen full tilt along its azimuth.
pub fn tilt_from_altitude_azimuth(altitude_rad: f32, azimuth_rad: f32) -> (f32, f32) {
    let tan_alt = altitude_rad.tan();
    if tan_alt.abs() < 1e-6 {
        // Pen lying flat: full tilt in the azimuth direction.
        let limit = |c: f32| if c.abs() < 1e-6 { 0.0 } else { c.signum() };
        return (limit(azimuth_rad.cos()), limit(azimuth_rad.sin()));
    }
    let tilt_x_rad = (azimuth_rad.cos() / tan_alt).atan();
    let tilt_y_rad = (azimuth_rad.sin() / tan_alt).atan();
    (
        tilt_from_degrees(tilt_x_rad.to_degrees()),
        tilt_from_degrees(tilt_y_rad.to_degrees()),
    )
}

/// Converts raw events into canonical [`InputSample`]s.
///
/// Routed native samples are queued via [`Self::enqueue_native`]; each
/// contact sub-event then consumes the next queued record so no native
/// sample is used twice. When the queue runs dry the last native reading is
/// reused as a best-effort substitute, and a streak of contact `Down`s with
/// no native data at all suppresses native enrichment for the session.
pub struct SampleNormalizer {
    tuning: InputTuning,
    /// DPI scale applied to incoming windowed coordinates.
    scale: f64,
    /// Which native backend is currently connected, if any.
    active_native: Option<SampleSource>,
    /// Routed native samples not yet paired with a windowed sub-event.
    native_queue: VecDeque<NativeSample>,
    /// Last native record consumed, reused when the queue runs dry.
    last_native: Option<NativeSample>,
    /// Consecutive `Down`s with native active but no native data.
    missing_streak: u32,
    /// Latched when the streak exceeds the tuning threshold.
    native_suppressed: bool,
    /// Monotonic clamp for host timestamps within the session.
    last_host_time_us: u64,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl SampleNormalizer {
    pub fn new(tuning: InputTuning, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            tuning,
            scale: 1.0,
            active_native: None,
            native_queue: VecDeque::new(),
            last_native: None,
            missing_streak: 0,
            native_suppressed: false,
            last_host_time_us: 0,
            diagnostics,
        }
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    /// Declare which native backend is connected. Clears enrichment state.
    pub fn set_active_native(&mut self, source: Option<SampleSource>) {
        info!(?source, "active native backend changed");
        self.active_native = source;
        self.native_queue.clear();
        self.last_native = None;
        self.missing_streak = 0;
        self.native_suppressed = false;
    }

    #[inline]
    pub fn active_native(&self) -> Option<SampleSource> {
        if self.native_suppressed {
            None
        } else {
            self.active_native
        }
    }

    /// Queue routed native samples for enrichment.
    pub fn enqueue_native(&mut self, samples: impl IntoIterator<Item = NativeSample>) {
        self.native_queue.extend(samples);
    }

    /// Number of queued, not-yet-consumed native records.
    pub fn queued_native(&self) -> usize {
        self.native_queue.len()
    }

    /// Convert one raw event into an ordered, non-empty list of samples.
    pub fn normalize(&mut self, event: &RawPointerEvent) -> Vec<InputSample> {
        let native = self.active_native().filter(|_| event.trusted);

        let mut out = Vec::with_capacity(event.coalesced.len().max(1));
        if event.coalesced.is_empty() {
            out.push(self.normalize_one(&event.primary, native));
        } else {
            // Coalesced sub-events expand one sample each, in arrival order.
            for sub in &event.coalesced {
                out.push(self.normalize_one(sub, native));
            }
        }
        out
    }

    fn normalize_one(&mut self, data: &PointerEventData, native: Option<SampleSource>) -> InputSample {
        // Host timestamps must never run backwards within a session.
        self.last_host_time_us = self.last_host_time_us.max(data.time_us);
        let host_time_us = self.last_host_time_us;

        let mut sample = match native {
            Some(source) => self.enrich_from_native(data, source, host_time_us),
            None => self.from_windowed(data, host_time_us),
        };

        // Strokes must taper to nothing regardless of what a source reports.
        if sample.phase == SamplePhase::Up || sample.phase == SamplePhase::Hover {
            sample.pressure = 0.0;
        }
        sample
    }

    fn from_windowed(&self, data: &PointerEventData, host_time_us: u64) -> InputSample {
        let pressure = match data.phase {
            SamplePhase::Down | SamplePhase::Move => {
                data.pressure.unwrap_or(DEFAULT_CONTACT_PRESSURE)
            }
            SamplePhase::Up | SamplePhase::Hover => 0.0,
        }
        .clamp(0.0, 1.0);

        let (tilt_x, tilt_y) = match (data.tilt_x_deg, data.tilt_y_deg) {
            (Some(tx), Some(ty)) => (tilt_from_degrees(tx), tilt_from_degrees(ty)),
            _ => match (data.altitude_rad, data.azimuth_rad) {
                (Some(alt), Some(az)) => tilt_from_altitude_azimuth(alt, az),
                _ => (0.0, 0.0),
            },
        };

        InputSample {
            x: data.x * self.scale,
            y: data.y * self.scale,
            pressure,
            tilt_x,
            tilt_y,
            rotation: data.rotation_deg,
            host_time_us,
            device_time_us: data.time_us,
            source: SampleSource::WindowedPointer,
            phase: data.phase,
        }
    }

    fn enrich_from_native(
        &mut self,
        data: &PointerEventData,
        source: SampleSource,
        host_time_us: u64,
    ) -> InputSample {
        let native = match self.native_queue.pop_front() {
            Some(native) => {
                self.missing_streak = 0;
                self.last_native = Some(native);
                Some(native)
            }
            None => self.last_native,
        };

        match native {
            Some(native) => InputSample {
                x: data.x * self.scale,
                y: data.y * self.scale,
                pressure: native.pressure.clamp(0.0, 1.0),
                tilt_x: native.tilt_x,
                tilt_y: native.tilt_y,
                rotation: native.rotation,
                host_time_us,
                device_time_us: native.device_time_us,
                source,
                phase: data.phase,
            },
            None => {
                // No native data at all: best-effort windowed substitution.
                if data.phase == SamplePhase::Down {
                    self.diagnostics.record(AnomalyKind::MissingNativeSeed);
                    self.missing_streak += 1;
                    if self.missing_streak >= self.tuning.missing_seed_retry_streak {
                        info!(
                            streak = self.missing_streak,
                            "native stream absent, falling back to windowed input"
                        );
                        self.native_suppressed = true;
                    }
                }
                debug!("native queue dry, substituting windowed fields");
                self.from_windowed(data, host_time_us)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CountingDiagnostics;

    fn pointer(phase: SamplePhase, x: f64, time_us: u64) -> PointerEventData {
        PointerEventData {
            pointer_id: 1,
            x,
            y: 0.0,
            phase,
            pressure: Some(0.8),
            tilt_x_deg: Some(45.0),
            tilt_y_deg: Some(-90.0),
            altitude_rad: None,
            azimuth_rad: None,
            rotation_deg: 10.0,
            time_us,
        }
    }

    fn native(pressure: f32, device_time_us: u64) -> NativeSample {
        NativeSample {
            seq: 0,
            stroke_id: 1,
            x: 0.0,
            y: 0.0,
            pressure,
            tilt_x: 0.25,
            tilt_y: -0.5,
            rotation: 33.0,
            device_time_us,
            phase: SamplePhase::Move,
            source: SampleSource::NativeA,
        }
    }

    fn normalizer() -> (SampleNormalizer, Arc<CountingDiagnostics>) {
        let diag = Arc::new(CountingDiagnostics::new());
        (
            SampleNormalizer::new(InputTuning::default(), diag.clone()),
            diag,
        )
    }

    #[test]
    fn test_windowed_tilt_normalized_from_degrees() {
        let (mut n, _) = normalizer();
        let samples = n.normalize(&RawPointerEvent::single(pointer(SamplePhase::Move, 5.0, 100)));

        assert_eq!(samples.len(), 1);
        let s = samples[0];
        assert_eq!(s.source, SampleSource::WindowedPointer);
        assert!((s.tilt_x - 0.5).abs() < 1e-6);
        assert!((s.tilt_y + 1.0).abs() < 1e-6);
        assert!((s.pressure - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_altitude_azimuth_fallback() {
        let (mut n, _) = normalizer();
        let mut data = pointer(SamplePhase::Move, 0.0, 100);
        data.tilt_x_deg = None;
        data.tilt_y_deg = None;
        // Vertical pen: no tilt.
        data.altitude_rad = Some(std::f32::consts::FRAC_PI_2);
        data.azimuth_rad = Some(1.0);

        let s = n.normalize(&RawPointerEvent::single(data))[0];
        assert!(s.tilt_x.abs() < 1e-3);
        assert!(s.tilt_y.abs() < 1e-3);

        // 45 degree altitude pointing along +x: tilt_x = 45deg -> 0.5.
        data.altitude_rad = Some(std::f32::consts::FRAC_PI_4);
        data.azimuth_rad = Some(0.0);
        let s = n.normalize(&RawPointerEvent::single(data))[0];
        assert!((s.tilt_x - 0.5).abs() < 1e-3);
        assert!(s.tilt_y.abs() < 1e-3);
    }

    #[test]
    fn test_up_pressure_forced_zero() {
        let (mut n, _) = normalizer();
        let mut data = pointer(SamplePhase::Up, 0.0, 100);
        data.pressure = Some(0.9);

        let s = n.normalize(&RawPointerEvent::single(data))[0];
        assert_eq!(s.pressure, 0.0);
    }

    #[test]
    fn test_native_enrichment_consumes_queue_in_order() {
        let (mut n, _) = normalizer();
        n.set_active_native(Some(SampleSource::NativeA));
        n.enqueue_native([native(0.3, 10), native(0.6, 20)]);

        let s = n.normalize(&RawPointerEvent::single(pointer(SamplePhase::Move, 1.0, 100)))[0];
        assert_eq!(s.source, SampleSource::NativeA);
        assert!((s.pressure - 0.3).abs() < 1e-6);
        assert_eq!(s.device_time_us, 10);
        // Tilt comes from the native record, not the event.
        assert!((s.tilt_x - 0.25).abs() < 1e-6);

        let s = n.normalize(&RawPointerEvent::single(pointer(SamplePhase::Move, 2.0, 200)))[0];
        assert!((s.pressure - 0.6).abs() < 1e-6);
        assert_eq!(n.queued_native(), 0);

        // Queue dry: last native reading reused.
        let s = n.normalize(&RawPointerEvent::single(pointer(SamplePhase::Move, 3.0, 300)))[0];
        assert!((s.pressure - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_untrusted_event_not_enriched() {
        let (mut n, _) = normalizer();
        n.set_active_native(Some(SampleSource::NativeA));
        n.enqueue_native([native(0.3, 10)]);

        let mut event = RawPointerEvent::single(pointer(SamplePhase::Move, 1.0, 100));
        event.trusted = false;

        let s = n.normalize(&event)[0];
        assert_eq!(s.source, SampleSource::WindowedPointer);
        // The queued native sample was not consumed.
        assert_eq!(n.queued_native(), 1);
    }

    #[test]
    fn test_coalesced_expansion_preserves_order() {
        let (mut n, _) = normalizer();
        let event = RawPointerEvent {
            primary: pointer(SamplePhase::Move, 3.0, 300),
            coalesced: vec![
                pointer(SamplePhase::Move, 1.0, 100),
                pointer(SamplePhase::Move, 2.0, 200),
                pointer(SamplePhase::Move, 3.0, 300),
            ],
            trusted: true,
        };

        let samples = n.normalize(&event);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].x, 1.0);
        assert_eq!(samples[1].x, 2.0);
        assert_eq!(samples[2].x, 3.0);
    }

    #[test]
    fn test_host_time_monotonic() {
        let (mut n, _) = normalizer();
        let s1 = n.normalize(&RawPointerEvent::single(pointer(SamplePhase::Move, 0.0, 500)))[0];
        // An out-of-order timestamp is clamped forward.
        let s2 = n.normalize(&RawPointerEvent::single(pointer(SamplePhase::Move, 1.0, 400)))[0];
        assert!(s2.host_time_us >= s1.host_time_us);
    }

    #[test]
    fn test_missing_native_streak_falls_back() {
        let (mut n, diag) = normalizer();
        n.set_active_native(Some(SampleSource::NativeA));

        // Three downs with no native data: threshold reached.
        for i in 0..3u64 {
            let s =
                n.normalize(&RawPointerEvent::single(pointer(SamplePhase::Down, 0.0, i * 1_000)))[0];
            assert_eq!(s.source, SampleSource::WindowedPointer);
        }
        assert_eq!(diag.count(AnomalyKind::MissingNativeSeed), 3);
        assert_eq!(n.active_native(), None);

        // Even queued natives are now ignored until reconnection.
        n.enqueue_native([native(0.9, 10)]);
        let s = n.normalize(&RawPointerEvent::single(pointer(SamplePhase::Move, 0.0, 9_000)))[0];
        assert_eq!(s.source, SampleSource::WindowedPointer);
    }
}
