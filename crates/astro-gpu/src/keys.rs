//! Morton key generation on the GPU.

use astro_core::{KeyQuantizer, SimulationConfig};

use crate::gpu::{self, storage_entry, uniform_entry, ComputeKernel, GpuContext};
use crate::shaders::{compose, KEY_SHADER};

/// Uniforms of the key kernel (matches `KeyParams` in the shader).
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct KeyParams {
    pub particle_count: u32,
    pub key_layers: u32,
    pub half_extent: f32,
    pub scale: f32,
}

impl KeyParams {
    pub fn new(particle_count: u32, key_layers: u32, quantizer: &KeyQuantizer) -> Self {
        Self {
            particle_count,
            key_layers,
            half_extent: quantizer.half_extent,
            scale: quantizer.scale,
        }
    }
}

/// Writes one `(key, particle index)` entry per particle.
pub struct KeyGenerator {
    kernel: ComputeKernel,
    bind_group: wgpu::BindGroup,
    params_buffer: wgpu::Buffer,
    params: KeyParams,
}

impl KeyGenerator {
    /// Bind the generator to particle positions and the entry buffer it fills.
    pub fn new(
        ctx: &GpuContext,
        config: &SimulationConfig,
        position_mass: &wgpu::Buffer,
        entries: &wgpu::Buffer,
    ) -> Self {
        let module = gpu::shader_module(ctx, "Key Shader", &compose(KEY_SHADER));
        let kernel = ComputeKernel::new(
            ctx,
            "Generate Keys",
            &module,
            "generate_keys",
            &[
                storage_entry(0, true),
                storage_entry(1, false),
                uniform_entry(2),
            ],
        );

        let params = KeyParams::new(0, config.key_layers, &config.quantizer());
        let params_buffer = gpu::uniform_buffer(ctx, "Key Params Buffer", &params);
        let bind_group = kernel.bind(
            ctx,
            &[(0, position_mass), (1, entries), (2, &params_buffer)],
        );

        Self {
            kernel,
            bind_group,
            params_buffer,
            params,
        }
    }

    pub fn set_particle_count(&mut self, ctx: &GpuContext, particle_count: u32) {
        self.params.particle_count = particle_count;
        ctx.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.params));
    }

    pub fn params(&self) -> &KeyParams {
        &self.params
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        self.kernel.dispatch(
            encoder,
            &self.bind_group,
            gpu::workgroups(self.params.particle_count),
        );
    }
}
