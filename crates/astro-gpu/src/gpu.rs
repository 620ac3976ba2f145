//! GPU resource management shared by every stage.

use std::borrow::Cow;
use std::sync::Arc;

use astro_core::{ColorType, ForceSample, ParticleSet, PositionMass, VelocityRadius};
use wgpu::util::DeviceExt;

use crate::{GpuError, Result};

/// Invocations per work-group in every kernel.
pub const WORKGROUP_SIZE: u32 = 256;

/// Work-groups needed to cover `n` invocations.
pub fn workgroups(n: u32) -> u32 {
    n.div_ceil(WORKGROUP_SIZE)
}

/// GPU context holding device and queue.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Create a new GPU context on the highest-performance adapter.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| GpuError::GpuInit("No suitable GPU adapter found".into()))?;

        let adapter_info = adapter.get_info();
        tracing::info!("Using GPU adapter: {:?}", adapter_info);

        // The node arena is one binding, so ask for as much as the adapter offers.
        let adapter_limits = adapter.limits();
        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size: adapter_limits.max_buffer_size,
            ..wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Gravity GPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| GpuError::GpuInit(e.to_string()))?;

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }

    /// Fail if a storage binding of `bytes` would exceed the device limits.
    pub fn check_storage(&self, what: &'static str, bytes: u64) -> Result<()> {
        let limits = self.device.limits();
        let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if bytes > limit {
            return Err(GpuError::CapacityExceeded { what, bytes, limit });
        }
        Ok(())
    }

    /// Fail if covering `invocations` would exceed the per-dimension dispatch limit.
    pub fn check_dispatch(&self, what: &'static str, invocations: u32) -> Result<()> {
        let groups = workgroups(invocations);
        let limit = self.device.limits().max_compute_workgroups_per_dimension;
        if groups > limit {
            return Err(GpuError::TooManyWorkgroups {
                what,
                groups,
                limit,
            });
        }
        Ok(())
    }

    pub fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(Some(encoder.finish()));
    }
}

pub(crate) fn shader_module(ctx: &GpuContext, label: &str, source: &str) -> wgpu::ShaderModule {
    ctx.device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_owned())),
        })
}

pub(crate) fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn uniform_buffer<T: bytemuck::Pod>(
    ctx: &GpuContext,
    label: &str,
    value: &T,
) -> wgpu::Buffer {
    ctx.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
}

pub(crate) fn storage_buffer(ctx: &GpuContext, label: &str, size: u64) -> wgpu::Buffer {
    ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        // Bindings must not be empty.
        size: size.max(16),
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// One compute entry point with its own bind group layout.
pub(crate) struct ComputeKernel {
    pub pipeline: wgpu::ComputePipeline,
    pub layout: Arc<wgpu::BindGroupLayout>,
    label: String,
}

impl ComputeKernel {
    pub fn new(
        ctx: &GpuContext,
        label: &str,
        module: &wgpu::ShaderModule,
        entry_point: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Self {
        let layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            });
        Self::with_layout(ctx, label, module, entry_point, Arc::new(layout))
    }

    /// Another entry point over the same bindings, so bind groups can be shared.
    pub fn with_layout(
        ctx: &GpuContext,
        label: &str,
        module: &wgpu::ShaderModule,
        entry_point: &str,
        layout: Arc<wgpu::BindGroupLayout>,
    ) -> Self {
        let pipeline_layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&*layout],
                push_constant_ranges: &[],
            });

        let pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            });

        Self {
            pipeline,
            layout,
            label: label.to_owned(),
        }
    }

    /// Bind whole buffers to the given binding numbers.
    pub fn bind(&self, ctx: &GpuContext, buffers: &[(u32, &wgpu::Buffer)]) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&self.label),
            layout: &*self.layout,
            entries: &entries,
        })
    }

    /// Record one dispatch in its own compute pass.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        bind_group: &wgpu::BindGroup,
        workgroups: u32,
    ) {
        if workgroups == 0 {
            return;
        }
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&self.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }
}

/// Copy the first `count` elements of `buffer` back to the host (blocking).
pub fn read_buffer<T: bytemuck::Pod>(
    ctx: &GpuContext,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    if size == 0 {
        return Ok(Vec::new());
    }
    if size > buffer.size() {
        return Err(GpuError::Readback(format!(
            "requested {size} bytes from a {} byte buffer",
            buffer.size()
        )));
    }

    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Staging Buffer"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = ctx.encoder("Readback Encoder");
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    ctx.submit(encoder);

    let buffer_slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    ctx.device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|_| GpuError::Readback("Channel closed".into()))?
        .map_err(|e| GpuError::Readback(e.to_string()))?;

    let values = {
        let data = buffer_slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    staging.unmap();

    Ok(values)
}

/// A single GPU-resident `u32` element count.
///
/// Scan and sort read their live length from a buffer like this so that a
/// previous stage can shrink it without a host round trip.
pub struct CountBuffer {
    buffer: wgpu::Buffer,
}

impl CountBuffer {
    pub fn new(ctx: &GpuContext, label: &str) -> Self {
        Self {
            buffer: storage_buffer(ctx, label, 4),
        }
    }

    pub fn set(&self, ctx: &GpuContext, count: u32) {
        ctx.queue
            .write_buffer(&self.buffer, 0, bytemuck::bytes_of(&count));
    }

    pub fn get(&self, ctx: &GpuContext) -> Result<u32> {
        Ok(read_buffer::<u32>(ctx, &self.buffer, 1)?[0])
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// Particle state and force output, sized for a fixed maximum population.
pub struct ParticleBuffers {
    pub position_mass: wgpu::Buffer,
    pub velocity_radius: wgpu::Buffer,
    pub color_type: wgpu::Buffer,
    pub forces: wgpu::Buffer,
    capacity: u32,
}

impl ParticleBuffers {
    pub fn new(ctx: &GpuContext, capacity: u32) -> Result<Self> {
        let n = capacity as u64;
        let color_bytes = n * std::mem::size_of::<ColorType>() as u64;
        ctx.check_storage("color buffer", color_bytes)?;
        ctx.check_dispatch("particle pass", capacity)?;

        Ok(Self {
            position_mass: storage_buffer(
                ctx,
                "Position Mass Buffer",
                n * std::mem::size_of::<PositionMass>() as u64,
            ),
            velocity_radius: storage_buffer(
                ctx,
                "Velocity Radius Buffer",
                n * std::mem::size_of::<VelocityRadius>() as u64,
            ),
            color_type: storage_buffer(ctx, "Color Type Buffer", color_bytes),
            forces: storage_buffer(
                ctx,
                "Force Buffer",
                n * std::mem::size_of::<ForceSample>() as u64,
            ),
            capacity,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Overwrite the first `set.len()` particles.
    pub fn upload(&self, ctx: &GpuContext, set: &ParticleSet) -> Result<()> {
        if set.len() > self.capacity as usize {
            return Err(GpuError::InvalidInput(format!(
                "{} particles do not fit buffers sized for {}",
                set.len(),
                self.capacity
            )));
        }
        if set.velocity_radius.len() != set.len() || set.color_type.len() != set.len() {
            return Err(GpuError::InvalidInput(
                "particle arrays have different lengths".into(),
            ));
        }
        ctx.queue.write_buffer(
            &self.position_mass,
            0,
            bytemuck::cast_slice(&set.position_mass),
        );
        ctx.queue.write_buffer(
            &self.velocity_radius,
            0,
            bytemuck::cast_slice(&set.velocity_radius),
        );
        ctx.queue
            .write_buffer(&self.color_type, 0, bytemuck::cast_slice(&set.color_type));
        Ok(())
    }

    /// Read the first `count` particles back into a [`ParticleSet`].
    pub fn download(&self, ctx: &GpuContext, count: u32) -> Result<ParticleSet> {
        let count = count.min(self.capacity) as usize;
        Ok(ParticleSet {
            position_mass: read_buffer(ctx, &self.position_mass, count)?,
            velocity_radius: read_buffer(ctx, &self.velocity_radius, count)?,
            color_type: read_buffer(ctx, &self.color_type, count)?,
        })
    }
}
