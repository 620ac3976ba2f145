//! Semi-implicit Euler integration.

use astro_core::SimulationConfig;

use crate::gpu::{self, storage_entry, uniform_entry, ComputeKernel, GpuContext, ParticleBuffers};
use crate::shaders::{compose, INTEGRATE_SHADER};

#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct IntegrateParams {
    pub particle_count: u32,
    pub dt: f32,
    pub damping: f32,
    pub _pad: u32,
}

/// Advances velocities, then positions, from the force buffer.
pub struct Integrator {
    kernel: ComputeKernel,
    bind_group: wgpu::BindGroup,
    params_buffer: wgpu::Buffer,
    params: IntegrateParams,
}

impl Integrator {
    pub fn new(ctx: &GpuContext, config: &SimulationConfig, buffers: &ParticleBuffers) -> Self {
        let module = gpu::shader_module(ctx, "Integrate Shader", &compose(INTEGRATE_SHADER));
        let kernel = ComputeKernel::new(
            ctx,
            "Integrate",
            &module,
            "integrate",
            &[
                storage_entry(0, false),
                storage_entry(1, false),
                storage_entry(2, true),
                uniform_entry(3),
            ],
        );

        let params = IntegrateParams {
            particle_count: 0,
            dt: config.dt,
            damping: config.damping,
            _pad: 0,
        };
        let params_buffer = gpu::uniform_buffer(ctx, "Integrate Params Buffer", &params);
        let bind_group = kernel.bind(
            ctx,
            &[
                (0, &buffers.position_mass),
                (1, &buffers.velocity_radius),
                (2, &buffers.forces),
                (3, &params_buffer),
            ],
        );

        Self {
            kernel,
            bind_group,
            params_buffer,
            params,
        }
    }

    pub fn params(&self) -> &IntegrateParams {
        &self.params
    }

    pub fn set_particle_count(&mut self, ctx: &GpuContext, particle_count: u32) {
        self.params.particle_count = particle_count;
        self.write_params(ctx);
    }

    pub fn set_step(&mut self, ctx: &GpuContext, dt: f32, damping: f32) {
        self.params.dt = dt;
        self.params.damping = damping;
        self.write_params(ctx);
    }

    fn write_params(&self, ctx: &GpuContext) {
        ctx.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.params));
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        self.kernel.dispatch(
            encoder,
            &self.bind_group,
            gpu::workgroups(self.params.particle_count),
        );
    }
}
