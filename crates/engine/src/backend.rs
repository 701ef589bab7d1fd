//! Accumulator backend selection.
//!
//! Selection is a pure function of availability and user preference,
//! isolated here as the single factory decision point. The one-way
//! downgrade rule is enforced by the pipeline facade: once a GPU fault
//! downgrades the session to CPU, nothing in this module re-selects the
//! accelerated backend without explicit reinitialization.

use impasto_config::{BackendPreference, CanvasConfig};
use impasto_gpu::GpuAccumulator;
use impasto_paint::{
    AccumulatorError, BackendKind, BlendMode, CpuAccumulator, DabPlacement, DirtyRect, LayerImage,
    PreparedCommit, StrokeAccumulator, StrokeParams,
};
use tracing::info;

/// Pick a backend from preference and probed availability.
pub fn select_backend(preference: BackendPreference, gpu_available: bool) -> BackendKind {
    match preference {
        BackendPreference::ForceCpu => BackendKind::Cpu,
        BackendPreference::ForceGpu => BackendKind::Gpu,
        BackendPreference::Auto => {
            if gpu_available {
                BackendKind::Gpu
            } else {
                BackendKind::Cpu
            }
        }
    }
}

/// Probe availability and build the selected accumulator.
pub async fn create_accumulator(
    canvas: &CanvasConfig,
    preference: BackendPreference,
) -> Accumulator {
    let available = impasto_gpu::gpu_available().await;
    let kind = select_backend(preference, available);
    info!(?preference, available, ?kind, "backend selected");
    match kind {
        BackendKind::Cpu => Accumulator::Cpu(CpuAccumulator::new(canvas.width, canvas.height)),
        BackendKind::Gpu => Accumulator::Gpu(GpuAccumulator::new(canvas.width, canvas.height)),
    }
}

/// The dual-backend accumulator, dispatching the shared contract.
pub enum Accumulator {
    Cpu(CpuAccumulator),
    Gpu(GpuAccumulator),
}

impl Accumulator {
    /// Fresh CPU accumulator, used by the one-way downgrade path.
    pub fn cpu_fallback(canvas: &CanvasConfig) -> Self {
        Accumulator::Cpu(CpuAccumulator::new(canvas.width, canvas.height))
    }
}

impl StrokeAccumulator for Accumulator {
    fn kind(&self) -> BackendKind {
        match self {
            Accumulator::Cpu(inner) => inner.kind(),
            Accumulator::Gpu(inner) => inner.kind(),
        }
    }

    fn is_active(&self) -> bool {
        match self {
            Accumulator::Cpu(inner) => inner.is_active(),
            Accumulator::Gpu(inner) => inner.is_active(),
        }
    }

    async fn begin_stroke(&mut self, params: StrokeParams) -> Result<(), AccumulatorError> {
        match self {
            Accumulator::Cpu(inner) => inner.begin_stroke(params).await,
            Accumulator::Gpu(inner) => inner.begin_stroke(params).await,
        }
    }

    fn stamp_dab(&mut self, dab: &DabPlacement) -> Result<(), AccumulatorError> {
        match self {
            Accumulator::Cpu(inner) => inner.stamp_dab(dab),
            Accumulator::Gpu(inner) => inner.stamp_dab(dab),
        }
    }

    async fn prepare_end_stroke(&mut self) -> Result<PreparedCommit, AccumulatorError> {
        match self {
            Accumulator::Cpu(inner) => inner.prepare_end_stroke().await,
            Accumulator::Gpu(inner) => inner.prepare_end_stroke().await,
        }
    }

    fn commit_and_clear(
        &mut self,
        destination: &mut LayerImage,
        opacity: f32,
        mode: BlendMode,
    ) -> Result<Option<DirtyRect>, AccumulatorError> {
        match self {
            Accumulator::Cpu(inner) => inner.commit_and_clear(destination, opacity, mode),
            Accumulator::Gpu(inner) => inner.commit_and_clear(destination, opacity, mode),
        }
    }

    fn abort(&mut self) {
        match self {
            Accumulator::Cpu(inner) => inner.abort(),
            Accumulator::Gpu(inner) => inner.abort(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_is_pure() {
        use BackendPreference::*;
        assert_eq!(select_backend(ForceCpu, true), BackendKind::Cpu);
        assert_eq!(select_backend(ForceCpu, false), BackendKind::Cpu);
        assert_eq!(select_backend(ForceGpu, false), BackendKind::Gpu);
        assert_eq!(select_backend(Auto, true), BackendKind::Gpu);
        assert_eq!(select_backend(Auto, false), BackendKind::Cpu);
    }

    #[test]
    fn test_cpu_fallback_kind() {
        let canvas = CanvasConfig::new(64, 64);
        let acc = Accumulator::cpu_fallback(&canvas);
        assert_eq!(acc.kind(), BackendKind::Cpu);
    }
}
