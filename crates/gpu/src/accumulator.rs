//! wgpu-backed stroke accumulator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use impasto_paint::{
    AccumulatorError, BackendKind, BlendMode, DabPlacement, DirtyRect, GpuDab, LayerImage,
    PixelSurface, PreparedCommit, StrokeAccumulator, StrokeParams, composite_scratch,
};

/// Dabs buffered before a compute dispatch is forced.
const DAB_BATCH: usize = 256;

/// Workgroup size of the stamping shader (must match shader.wgsl).
const WORKGROUP: u32 = 8;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShaderParams {
    width: u32,
    height: u32,
    dab_count: u32,
    _pad: u32,
}

struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    scratch_buffer: wgpu::Buffer,
    dab_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    readback_buffer: wgpu::Buffer,
    /// Set by the uncaptured-error handler on mid-stroke device errors.
    device_error: Arc<AtomicBool>,
}

/// Probe for an adapter without holding onto it.
pub async fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .is_some()
}

/// GPU-accelerated stroke accumulator.
///
/// Dabs are batched on the CPU and stamped by a compute shader into a
/// storage-buffer scratch whose pixel layout matches the CPU backend.
/// `begin_stroke` performs (one-time) device warm-up; `prepare_end_stroke`
/// flushes outstanding batches and maps the readback buffer. Any device or
/// validation error latches the fault flag: the accumulator refuses further
/// strokes and the engine downgrades to the CPU backend.
pub struct GpuAccumulator {
    width: u32,
    height: u32,
    context: Option<GpuContext>,
    pending: Vec<GpuDab>,
    dirty: Option<DirtyRect>,
    params: Option<StrokeParams>,
    readback: Option<PixelSurface>,
    faulted: bool,
}

impl GpuAccumulator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            context: None,
            pending: Vec::with_capacity(DAB_BATCH),
            dirty: None,
            params: None,
            readback: None,
            faulted: false,
        }
    }

    /// Whether the backend has latched an unrecoverable fault.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    fn scratch_bytes(&self) -> u64 {
        (self.width as u64) * (self.height as u64) * 16
    }

    async fn ensure_context(&mut self) -> Result<(), AccumulatorError> {
        if self.context.is_some() {
            return Ok(());
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .ok_or_else(|| AccumulatorError::Unavailable("no compatible adapter".into()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("impasto stroke device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| AccumulatorError::Unavailable(e.to_string()))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("dab stamping"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let scratch_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("stroke scratch"),
            size: self.scratch_bytes(),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let dab_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dab batch"),
            size: (DAB_BATCH * std::mem::size_of::<GpuDab>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("stamp params"),
            size: std::mem::size_of::<ShaderParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("scratch readback"),
            size: self.scratch_bytes(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("stamp bindings"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stamp bindings"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: scratch_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dab_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("stamp pipeline"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("stamp pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("stamp_dabs"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let device_error = Arc::new(AtomicBool::new(false));
        {
            let flag = Arc::clone(&device_error);
            device.on_uncaptured_error(Box::new(move |error| {
                warn!(%error, "uncaptured device error");
                flag.store(true, Ordering::Release);
            }));
        }

        info!(width = self.width, height = self.height, "gpu accumulator initialized");
        self.context = Some(GpuContext {
            device,
            queue,
            pipeline,
            bind_group,
            scratch_buffer,
            dab_buffer,
            params_buffer,
            readback_buffer,
            device_error,
        });
        Ok(())
    }

    /// Submit the pending dab batch. Synchronous: errors are picked up by
    /// the validation scope drained in `prepare_end_stroke`.
    fn flush_batch(&mut self) {
        let Some(ctx) = &self.context else {
            return;
        };
        if self.pending.is_empty() {
            return;
        }

        ctx.queue
            .write_buffer(&ctx.dab_buffer, 0, bytemuck::cast_slice(&self.pending));
        let shader_params = ShaderParams {
            width: self.width,
            height: self.height,
            dab_count: self.pending.len() as u32,
            _pad: 0,
        };
        ctx.queue
            .write_buffer(&ctx.params_buffer, 0, bytemuck::bytes_of(&shader_params));

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stamp batch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("stamp batch"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&ctx.pipeline);
            pass.set_bind_group(0, &ctx.bind_group, &[]);
            pass.dispatch_workgroups(
                self.width.div_ceil(WORKGROUP),
                self.height.div_ceil(WORKGROUP),
                1,
            );
        }
        ctx.queue.submit(Some(encoder.finish()));

        debug!(count = self.pending.len(), "dab batch dispatched");
        self.pending.clear();
    }

    fn clear_scratch_buffer(&self) {
        if let Some(ctx) = &self.context {
            let mut encoder = ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("clear scratch"),
                });
            encoder.clear_buffer(&ctx.scratch_buffer, 0, None);
            ctx.queue.submit(Some(encoder.finish()));
        }
    }

    /// Read the scratch buffer back into CPU pixels.
    async fn read_back(&mut self) -> Result<PixelSurface, AccumulatorError> {
        let ctx = self
            .context
            .as_ref()
            .ok_or_else(|| AccumulatorError::Unavailable("device not initialized".into()))?;

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("scratch readback"),
            });
        encoder.copy_buffer_to_buffer(
            &ctx.scratch_buffer,
            0,
            &ctx.readback_buffer,
            0,
            self.scratch_bytes(),
        );
        ctx.queue.submit(Some(encoder.finish()));

        let slice = ctx.readback_buffer.slice(..);
        let (tx, rx) = tokio::sync::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = ctx.device.poll(wgpu::Maintain::Wait);
        rx.await
            .map_err(|_| AccumulatorError::DeviceFault("map callback dropped".into()))?
            .map_err(|e| AccumulatorError::DeviceFault(e.to_string()))?;

        let mut surface = PixelSurface::new(self.width, self.height);
        {
            let view = slice.get_mapped_range();
            surface.copy_from(bytemuck::cast_slice(&view));
        }
        ctx.readback_buffer.unmap();
        Ok(surface)
    }

    fn fault(&mut self, message: String) -> AccumulatorError {
        warn!(%message, "gpu backend fault, latching downgrade");
        self.faulted = true;
        self.params = None;
        self.pending.clear();
        self.readback = None;
        AccumulatorError::DeviceFault(message)
    }
}

impl StrokeAccumulator for GpuAccumulator {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn is_active(&self) -> bool {
        self.params.is_some()
    }

    async fn begin_stroke(&mut self, params: StrokeParams) -> Result<(), AccumulatorError> {
        if self.faulted {
            return Err(AccumulatorError::DeviceFault("backend is faulted".into()));
        }
        if self.params.is_some() {
            return Err(AccumulatorError::AlreadyActive);
        }

        self.ensure_context().await?;

        self.clear_scratch_buffer();
        self.pending.clear();
        self.dirty = None;
        self.readback = None;
        self.params = Some(params);
        debug!("gpu stroke begun");
        Ok(())
    }

    fn stamp_dab(&mut self, dab: &DabPlacement) -> Result<(), AccumulatorError> {
        if self.params.is_none() {
            debug_assert!(false, "stamp_dab with no active stroke");
            warn!("stamp_dab ignored: no active stroke");
            return Ok(());
        }

        // Track the dirty rect on the CPU with the same bounding math the
        // CPU backend uses, so commits stay minimal.
        let (major, minor) = dab.radii();
        let angle = dab.angle;
        let (cos_a, sin_a) = (angle.cos(), angle.sin());
        let half_w = ((major * cos_a).powi(2) + (minor * sin_a).powi(2)).sqrt();
        let half_h = ((major * sin_a).powi(2) + (minor * cos_a).powi(2)).sqrt();
        let rect = DirtyRect::new(
            (dab.x - half_w).floor() as i32,
            (dab.y - half_h).floor() as i32,
            (dab.x + half_w).ceil() as i32,
            (dab.y + half_h).ceil() as i32,
        )
        .clamped(self.width, self.height);
        if !rect.is_empty() {
            self.dirty = Some(match self.dirty {
                Some(existing) => existing.union(&rect),
                None => rect,
            });
        }

        self.pending.push(GpuDab::from_placement(dab));
        if self.pending.len() >= DAB_BATCH {
            self.flush_batch();
        }
        Ok(())
    }

    async fn prepare_end_stroke(&mut self) -> Result<PreparedCommit, AccumulatorError> {
        if self.params.is_none() {
            return Err(AccumulatorError::NotActive);
        }

        // The final flush runs under a validation scope; mid-stroke batch
        // flushes are covered by the uncaptured-error flag instead.
        if let Some(ctx) = &self.context {
            ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        }
        self.flush_batch();
        let mut fault_message = None;
        if let Some(ctx) = &self.context {
            if let Some(error) = ctx.device.pop_error_scope().await {
                fault_message = Some(error.to_string());
            } else if ctx.device_error.load(Ordering::Acquire) {
                fault_message = Some("device error during stroke".into());
            }
        }
        if let Some(message) = fault_message {
            return Err(self.fault(message));
        }

        let surface = match self.read_back().await {
            Ok(surface) => surface,
            Err(AccumulatorError::DeviceFault(message)) => return Err(self.fault(message)),
            Err(other) => return Err(other),
        };
        self.readback = Some(surface);

        Ok(PreparedCommit {
            dirty_rect: self.dirty,
        })
    }

    fn commit_and_clear(
        &mut self,
        destination: &mut LayerImage,
        opacity: f32,
        mode: BlendMode,
    ) -> Result<Option<DirtyRect>, AccumulatorError> {
        if self.params.is_none() {
            debug_assert!(false, "commit with no active stroke");
            warn!("commit_and_clear ignored: no active stroke");
            return Ok(None);
        }
        let Some(scratch) = self.readback.take() else {
            debug_assert!(false, "commit without prepare_end_stroke");
            warn!("commit_and_clear ignored: stroke was not prepared");
            return Ok(None);
        };

        let rect = self.dirty;
        if let Some(rect) = rect {
            composite_scratch(&scratch, destination, rect, opacity, mode);
        }

        self.clear_scratch_buffer();
        self.dirty = None;
        self.params = None;
        info!(?rect, "gpu stroke committed");
        Ok(rect)
    }

    fn abort(&mut self) {
        if self.params.take().is_some() {
            info!("gpu stroke aborted, scratch discarded");
        }
        self.pending.clear();
        self.readback = None;
        self.dirty = None;
        self.clear_scratch_buffer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impasto_paint::MaskKind;

    fn dab(x: f32, y: f32, size: f32) -> DabPlacement {
        DabPlacement {
            x,
            y,
            size,
            roundness: 1.0,
            angle: 0.0,
            flip_x: false,
            flip_y: false,
            flow: 1.0,
            opacity: 1.0,
            color: [0.0, 1.0, 0.0, 1.0],
            hardness: 1.0,
            mask: MaskKind::SoftRound,
            texture: None,
            wet_edge: false,
            timestamp_us: 0,
            speed_norm: 0.0,
        }
    }

    /// Hardware-dependent: skipped when no adapter is present (CI).
    #[tokio::test]
    async fn test_gpu_stroke_matches_cpu_commit_path() {
        if !gpu_available().await {
            eprintln!("skipping: no gpu adapter");
            return;
        }

        let mut acc = GpuAccumulator::new(64, 64);
        let mut layer = LayerImage::new(64, 64);

        acc.begin_stroke(StrokeParams::default()).await.unwrap();
        acc.stamp_dab(&dab(32.0, 32.0, 16.0)).unwrap();
        let prepared = acc.prepare_end_stroke().await.unwrap();
        assert!(prepared.dirty_rect.is_some());

        acc.commit_and_clear(&mut layer, 1.0, BlendMode::Normal)
            .unwrap();
        assert!(!acc.is_active());
        assert!(layer.get_pixel(32, 32).unwrap()[1] > 0.9);
        // Outside the dab: untouched.
        assert_eq!(layer.get_pixel(2, 2), Some([0.0; 4]));
    }

    #[tokio::test]
    async fn test_gpu_abort_leaves_layer_untouched() {
        if !gpu_available().await {
            eprintln!("skipping: no gpu adapter");
            return;
        }

        let mut acc = GpuAccumulator::new(32, 32);
        let layer = LayerImage::new(32, 32);
        let before = layer.clone();

        acc.begin_stroke(StrokeParams::default()).await.unwrap();
        acc.stamp_dab(&dab(16.0, 16.0, 8.0)).unwrap();
        acc.abort();

        assert!(!acc.is_active());
        assert_eq!(layer, before);
    }

    #[test]
    fn test_faulted_backend_refuses_strokes() {
        let mut acc = GpuAccumulator::new(32, 32);
        acc.faulted = true;

        let result = futures_executor_block(acc.begin_stroke(StrokeParams::default()));
        assert!(matches!(result, Err(AccumulatorError::DeviceFault(_))));
    }

    fn futures_executor_block<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(future)
    }
}
