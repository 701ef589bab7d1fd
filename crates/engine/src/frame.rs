//! Fixed-cadence frame loop.
//!
//! The frame driver is the single reader of the engine's per-frame queue:
//! each tick drives suspended lifecycle work, drains the queue through the
//! dab generator, and triggers exactly one display composite - no matter
//! how many samples arrived that frame.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use impasto_config::FrameConfig;
use impasto_paint::{DirtyRect, LayerStore, StrokeAccumulator};

use crate::engine::{EngineError, StrokeEngine};
use crate::history::HistorySink;
use crate::pipeline::StrokePipeline;

pub struct FrameDriver {
    interval: Duration,
}

impl FrameDriver {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            interval: config.frame_interval(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run the frame loop until `shutdown` flips to true.
    ///
    /// `present` receives the frame's display damage (None when nothing
    /// changed) and is called exactly once per tick. Backend faults
    /// propagate to the caller, which owns the downgrade decision.
    pub async fn run<A, S, H, F>(
        &self,
        engine: &mut StrokeEngine<A, S, H>,
        mut shutdown: watch::Receiver<bool>,
        mut present: F,
    ) -> Result<(), EngineError>
    where
        A: StrokeAccumulator,
        S: LayerStore,
        H: HistorySink,
        F: FnMut(Option<DirtyRect>),
    {
        let mut ticker = tokio::time::interval(self.interval);
        // A stall must not burst-fire composites to catch up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let damage = engine.step_frame().await?;
                    present(damage);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("frame driver stopping");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Same loop over the full pipeline facade. Backend faults are
    /// absorbed by the pipeline's one-way downgrade, so only layer-store
    /// errors can end the loop early.
    pub async fn run_pipeline<S, H, F>(
        &self,
        pipeline: &mut StrokePipeline<S, H>,
        mut shutdown: watch::Receiver<bool>,
        mut present: F,
    ) -> Result<(), EngineError>
    where
        S: LayerStore,
        H: HistorySink,
        F: FnMut(Option<DirtyRect>),
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let damage = pipeline.step_frame().await?;
                    present(damage);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("frame driver stopping");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impasto_config::InputTuning;
    use impasto_input::{InputSample, SamplePhase, SampleSource};
    use impasto_paint::{CpuAccumulator, MemoryLayerStore};

    use crate::history::MemoryHistory;

    fn sample(x: f64, pressure: f32, time_us: u64, phase: SamplePhase) -> InputSample {
        InputSample {
            x,
            y: 32.0,
            pressure,
            tilt_x: 0.0,
            tilt_y: 0.0,
            rotation: 0.0,
            host_time_us: time_us,
            device_time_us: time_us,
            source: SampleSource::WindowedPointer,
            phase,
        }
    }

    fn engine() -> StrokeEngine<CpuAccumulator, MemoryLayerStore, MemoryHistory> {
        let mut store = MemoryLayerStore::new();
        store.add_layer(1, 64, 64);
        let mut engine = StrokeEngine::new(
            CpuAccumulator::new(64, 64),
            store,
            MemoryHistory::new(),
            &InputTuning::default(),
        );
        engine.set_active_layer(1);
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_present_per_tick() {
        let mut engine = engine();
        let driver = FrameDriver::new(&FrameConfig { frame_rate: 100 });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // A full stroke queued before the loop starts: many samples, but
        // the presents are paced by ticks, not by sample count.
        engine.handle_sample(sample(0.0, 0.5, 0, SamplePhase::Down));

        let mut presents = 0usize;
        let run = async {
            driver
                .run(&mut engine, shutdown_rx, |_damage| presents += 1)
                .await
                .unwrap();
        };
        let stop = async {
            tokio::time::sleep(Duration::from_millis(35)).await;
            shutdown_tx.send(true).unwrap();
        };
        tokio::join!(run, stop);

        // 100fps for ~35ms: a handful of presents, one per elapsed tick.
        assert!(presents >= 2, "presents = {presents}");
        assert!(presents <= 5, "presents = {presents}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_processes_stroke_to_commit() {
        let mut engine = engine();
        let driver = FrameDriver::new(&FrameConfig { frame_rate: 120 });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        engine.handle_sample(sample(0.0, 0.8, 0, SamplePhase::Down));
        engine.handle_sample(sample(20.0, 0.8, 5_000, SamplePhase::Move));
        engine.handle_sample(sample(20.0, 0.0, 10_000, SamplePhase::Up));

        let mut saw_damage = false;
        let run = async {
            driver
                .run(&mut engine, shutdown_rx, |damage| {
                    saw_damage |= damage.is_some();
                })
                .await
                .unwrap();
        };
        let stop = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            shutdown_tx.send(true).unwrap();
        };
        tokio::join!(run, stop);

        assert!(saw_damage);
        assert_eq!(engine.history().records().len(), 1);
    }
}
