//! Barnes-Hut force evaluation over the layered tree.

use astro_core::{ForceSample, SimulationConfig};

use crate::gpu::{self, storage_entry, uniform_entry, ComputeKernel, GpuContext, ParticleBuffers};
use crate::shaders::force_shader;
use crate::tree::TreeBuilder;
use crate::Result;

/// Uniforms of the force kernel (matches `ForceParams` in the shader).
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ForceParams {
    pub particle_count: u32,
    pub theta: f32,
    pub softening: f32,
    pub max_force: f32,
    pub gravitational_constant: f32,
    pub leaf_cell_size: f32,
    pub _pad: [u32; 2],
}

impl ForceParams {
    pub fn from_config(config: &SimulationConfig, particle_count: u32) -> Self {
        Self {
            particle_count,
            theta: config.theta,
            softening: config.softening,
            max_force: config.max_force,
            gravitational_constant: config.gravitational_constant,
            leaf_cell_size: config.layer_extent(0),
            _pad: [0; 2],
        }
    }
}

/// One invocation per particle walks the tree with a fixed-size stack and
/// writes a [`ForceSample`].
pub struct ForceEvaluator {
    kernel: ComputeKernel,
    bind_group: wgpu::BindGroup,
    params_buffer: wgpu::Buffer,
    params: ForceParams,
}

impl ForceEvaluator {
    pub fn new(
        ctx: &GpuContext,
        config: &SimulationConfig,
        buffers: &ParticleBuffers,
        tree: &TreeBuilder,
    ) -> Self {
        let source = force_shader(config.stack_capacity);
        let module = gpu::shader_module(ctx, "Force Shader", &source);
        let kernel = ComputeKernel::new(
            ctx,
            "Evaluate Forces",
            &module,
            "evaluate_forces",
            &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, false),
                uniform_entry(6),
                uniform_entry(7),
            ],
        );

        let params = ForceParams::from_config(config, 0);
        let params_buffer = gpu::uniform_buffer(ctx, "Force Params Buffer", &params);
        let bind_group = kernel.bind(
            ctx,
            &[
                (0, &buffers.position_mass),
                (1, &buffers.color_type),
                (2, tree.nodes()),
                (3, tree.leaf_of()),
                (4, tree.state()),
                (5, &buffers.forces),
                (6, &params_buffer),
                (7, tree.uniforms()),
            ],
        );

        tracing::info!(
            stack_capacity = config.stack_capacity,
            theta = config.theta,
            "created force evaluator"
        );

        Self {
            kernel,
            bind_group,
            params_buffer,
            params,
        }
    }

    pub fn params(&self) -> &ForceParams {
        &self.params
    }

    pub fn set_particle_count(&mut self, ctx: &GpuContext, particle_count: u32) {
        self.params.particle_count = particle_count;
        self.write_params(ctx);
    }

    /// Push new physical parameters; the particle count and cell size are kept.
    pub fn set_params(&mut self, ctx: &GpuContext, config: &SimulationConfig) {
        self.params = ForceParams::from_config(config, self.params.particle_count);
        self.write_params(ctx);
    }

    fn write_params(&self, ctx: &GpuContext) {
        ctx.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.params));
    }

    /// Record force evaluation. The tree must have been built in the same
    /// or an earlier submission.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        self.kernel.dispatch(
            encoder,
            &self.bind_group,
            gpu::workgroups(self.params.particle_count),
        );
    }

    pub fn read_forces(
        &self,
        ctx: &GpuContext,
        buffers: &ParticleBuffers,
    ) -> Result<Vec<ForceSample>> {
        gpu::read_buffer(ctx, &buffers.forces, self.params.particle_count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_config() {
        let config = SimulationConfig {
            key_layers: 4,
            world_half_extent: 8.0,
            ..Default::default()
        };
        let params = ForceParams::from_config(&config, 10);
        assert_eq!(std::mem::size_of::<ForceParams>(), 32);
        assert_eq!(params.particle_count, 10);
        assert_eq!(params.leaf_cell_size, 1.0);
        assert_eq!(params.theta, config.theta);
    }
}
