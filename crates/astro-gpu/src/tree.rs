//! GPU-side layered tree construction.
//!
//! Nodes live in one arena laid out by a [`LayerTable`]. Building is a fixed
//! command stream of one block of passes per layer, from the leaves up:
//!
//! 1. **Sort**: leaf keys are radix sorted over `3 * key_layers` bits.
//!    Internal layers inherit key order from the layer below, or are
//!    re-sorted when `resort_internal_layers` is set.
//! 2. **Mark / scan / emit**: the first entry of each equal-key run is
//!    marked, the marks are scanned into dense run indices, and each run
//!    records where it starts while bumping an atomic run counter.
//! 3. **Aggregate**: one invocation per run sums its members into a node
//!    and writes `(key >> 3, node index)` for the next layer.
//! 4. **Finish / promote**: a single invocation publishes the layer's node
//!    count and decides whether the build is done; the new entries become
//!    the input of the next layer.
//!
//! Once a layer produces a single node (or the last layer is reached) every
//! later pass returns immediately, so the host never reads anything back.

use astro_core::{LayerTable, SimulationConfig, TreeNode, TreeSnapshot, MAX_LAYERS};

use crate::gpu::{self, storage_entry, uniform_entry, ComputeKernel, GpuContext};
use crate::shaders::{compose, TREE_SHADER};
use crate::sort::RadixSorter;
use crate::{GpuError, Result};

/// Build bookkeeping kept on the GPU (matches `BuildState` in the shader).
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BuildState {
    /// Entries feeding the current layer; also the scan and sort length.
    pub live_count: u32,
    /// Runs found in the current layer (atomic on the GPU).
    pub run_count: u32,
    pub top_layer: u32,
    pub done: u32,
    pub overflow: u32,
    /// First layer that produced more runs than its capacity.
    pub overflow_layer: u32,
    pub _pad: [u32; 2],
    pub layer_counts: [u32; MAX_LAYERS],
}

/// Tree-wide uniforms (matches `TreeUniforms` in the shaders).
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct TreeUniforms {
    pub particle_count: u32,
    pub key_layers: u32,
    pub layer_count: u32,
    pub _pad: u32,
    /// `(offset, capacity, 0, 0)` per layer.
    pub layers: [[u32; 4]; MAX_LAYERS],
}

/// Per-layer uniforms (matches `LayerPass` in the shader).
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct LayerPass {
    layer: u32,
    singletons: u32,
    final_layer: u32,
    _pad: u32,
}

// Binding numbers in TREE_SHADER.
const POSITION_MASS: u32 = 0;
const COLOR_TYPE: u32 = 1;
const ENTRIES: u32 = 2;
const NEXT_ENTRIES: u32 = 3;
const FLAGS: u32 = 4;
const RUN_STARTS: u32 = 5;
const NODES: u32 = 6;
const LEAF_OF: u32 = 7;
const STATE: u32 = 8;
const TREE: u32 = 9;
const LAYER_PASS: u32 = 10;

struct TreeKernels {
    reset: ComputeKernel,
    mark: ComputeKernel,
    emit: ComputeKernel,
    aggregate: ComputeKernel,
    finish: ComputeKernel,
    promote: ComputeKernel,
}

impl TreeKernels {
    fn new(ctx: &GpuContext) -> Self {
        let module = gpu::shader_module(ctx, "Tree Shader", &compose(TREE_SHADER));
        let rw = |binding| storage_entry(binding, false);
        let ro = |binding| storage_entry(binding, true);

        Self {
            reset: ComputeKernel::new(
                ctx,
                "Reset Build State",
                &module,
                "reset_state",
                &[rw(STATE), uniform_entry(TREE)],
            ),
            mark: ComputeKernel::new(
                ctx,
                "Mark Runs",
                &module,
                "mark_runs",
                &[rw(ENTRIES), rw(FLAGS), rw(STATE), uniform_entry(LAYER_PASS)],
            ),
            emit: ComputeKernel::new(
                ctx,
                "Emit Runs",
                &module,
                "emit_runs",
                &[
                    rw(ENTRIES),
                    rw(FLAGS),
                    rw(RUN_STARTS),
                    rw(STATE),
                    uniform_entry(LAYER_PASS),
                ],
            ),
            aggregate: ComputeKernel::new(
                ctx,
                "Aggregate Runs",
                &module,
                "aggregate",
                &[
                    ro(POSITION_MASS),
                    ro(COLOR_TYPE),
                    rw(ENTRIES),
                    rw(NEXT_ENTRIES),
                    rw(RUN_STARTS),
                    rw(NODES),
                    rw(LEAF_OF),
                    rw(STATE),
                    uniform_entry(TREE),
                    uniform_entry(LAYER_PASS),
                ],
            ),
            finish: ComputeKernel::new(
                ctx,
                "Finish Layer",
                &module,
                "finish_layer",
                &[rw(STATE), uniform_entry(TREE), uniform_entry(LAYER_PASS)],
            ),
            promote: ComputeKernel::new(
                ctx,
                "Promote Entries",
                &module,
                "promote",
                &[rw(ENTRIES), rw(NEXT_ENTRIES), rw(STATE)],
            ),
        }
    }
}

struct LayerBindGroups {
    layer: u32,
    mark: wgpu::BindGroup,
    emit: wgpu::BindGroup,
    aggregate: wgpu::BindGroup,
    finish: wgpu::BindGroup,
    _pass: wgpu::Buffer,
}

/// Builds the layered tree from particle positions every frame.
pub struct TreeBuilder {
    config: SimulationConfig,
    table: LayerTable,
    particle_count: u32,
    sorter: RadixSorter,
    nodes: wgpu::Buffer,
    leaf_of: wgpu::Buffer,
    state: wgpu::Buffer,
    uniforms_buffer: wgpu::Buffer,
    uniforms: TreeUniforms,
    kernels: TreeKernels,
    reset_group: wgpu::BindGroup,
    promote_group: wgpu::BindGroup,
    layers: Vec<LayerBindGroups>,
    shortcut: LayerBindGroups,
}

impl TreeBuilder {
    /// Allocate the arena and all scratch buffers for `config.max_particles`.
    pub fn new(
        ctx: &GpuContext,
        config: &SimulationConfig,
        position_mass: &wgpu::Buffer,
        color_type: &wgpu::Buffer,
    ) -> Result<Self> {
        config.validate()?;
        let table = config.layer_table()?;
        let capacity = config.max_particles;

        let arena_bytes = table.total_nodes() as u64 * std::mem::size_of::<TreeNode>() as u64;
        ctx.check_storage("node arena", arena_bytes)?;

        let state = gpu::storage_buffer(
            ctx,
            "Build State Buffer",
            std::mem::size_of::<BuildState>() as u64,
        );
        let sorter = RadixSorter::new(ctx, capacity, &state)?;
        let nodes = gpu::storage_buffer(ctx, "Node Arena Buffer", arena_bytes);
        let leaf_of = gpu::storage_buffer(ctx, "Leaf Index Buffer", capacity as u64 * 4);
        let run_starts = gpu::storage_buffer(ctx, "Run Start Buffer", capacity as u64 * 4);

        let uniforms = TreeUniforms {
            particle_count: 0,
            key_layers: config.key_layers,
            layer_count: table.layer_count(),
            _pad: 0,
            layers: table.to_uniform(),
        };
        let uniforms_buffer = gpu::uniform_buffer(ctx, "Tree Uniforms Buffer", &uniforms);

        let kernels = TreeKernels::new(ctx);
        let reset_group = kernels
            .reset
            .bind(ctx, &[(STATE, &state), (TREE, &uniforms_buffer)]);
        let promote_group = kernels.promote.bind(
            ctx,
            &[
                (ENTRIES, sorter.front()),
                (NEXT_ENTRIES, sorter.back()),
                (STATE, &state),
            ],
        );

        let make_layer = |pass: LayerPass| {
            let pass_buffer = gpu::uniform_buffer(ctx, "Layer Pass Buffer", &pass);
            LayerBindGroups {
                layer: pass.layer,
                mark: kernels.mark.bind(
                    ctx,
                    &[
                        (ENTRIES, sorter.front()),
                        (FLAGS, sorter.scan().data()),
                        (STATE, &state),
                        (LAYER_PASS, &pass_buffer),
                    ],
                ),
                emit: kernels.emit.bind(
                    ctx,
                    &[
                        (ENTRIES, sorter.front()),
                        (FLAGS, sorter.scan().data()),
                        (RUN_STARTS, &run_starts),
                        (STATE, &state),
                        (LAYER_PASS, &pass_buffer),
                    ],
                ),
                aggregate: kernels.aggregate.bind(
                    ctx,
                    &[
                        (POSITION_MASS, position_mass),
                        (COLOR_TYPE, color_type),
                        (ENTRIES, sorter.front()),
                        (NEXT_ENTRIES, sorter.back()),
                        (RUN_STARTS, &run_starts),
                        (NODES, &nodes),
                        (LEAF_OF, &leaf_of),
                        (STATE, &state),
                        (TREE, &uniforms_buffer),
                        (LAYER_PASS, &pass_buffer),
                    ],
                ),
                finish: kernels.finish.bind(
                    ctx,
                    &[
                        (STATE, &state),
                        (TREE, &uniforms_buffer),
                        (LAYER_PASS, &pass_buffer),
                    ],
                ),
                _pass: pass_buffer,
            }
        };

        let layers = (0..=config.key_layers)
            .map(|layer| {
                make_layer(LayerPass {
                    layer,
                    singletons: 0,
                    final_layer: (layer == config.key_layers) as u32,
                    _pad: 0,
                })
            })
            .collect();
        let shortcut = make_layer(LayerPass {
            layer: 0,
            singletons: 1,
            final_layer: 1,
            _pad: 0,
        });

        tracing::info!(
            layers = table.layer_count(),
            nodes = table.total_nodes(),
            arena_bytes,
            "created tree builder"
        );

        Ok(Self {
            config: config.clone(),
            table,
            particle_count: 0,
            sorter,
            nodes,
            leaf_of,
            state,
            uniforms_buffer,
            uniforms,
            kernels,
            reset_group,
            promote_group,
            layers,
            shortcut,
        })
    }

    pub fn set_particle_count(&mut self, ctx: &GpuContext, particle_count: u32) -> Result<()> {
        if particle_count > self.config.max_particles {
            return Err(GpuError::InvalidInput(format!(
                "{particle_count} particles exceed tree capacity {}",
                self.config.max_particles
            )));
        }
        self.particle_count = particle_count;
        self.uniforms.particle_count = particle_count;
        ctx.queue
            .write_buffer(&self.uniforms_buffer, 0, bytemuck::bytes_of(&self.uniforms));
        Ok(())
    }

    pub fn particle_count(&self) -> u32 {
        self.particle_count
    }

    /// Whether the current particle count skips sorting.
    pub fn uses_shortcut(&self) -> bool {
        self.config.uses_shortcut(self.particle_count)
    }

    /// Record a full build. Leaf entries must already be in [`entries`](Self::entries).
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        self.kernels.reset.dispatch(encoder, &self.reset_group, 1);

        if self.uses_shortcut() {
            tracing::debug!(particles = self.particle_count, "singleton leaf build");
            self.encode_layer(encoder, &self.shortcut, false);
            return;
        }

        let key_layers = self.config.key_layers;
        self.sorter.encode(encoder, 0..3 * key_layers);
        for group in &self.layers {
            let layer = group.layer;
            if layer > 0 && self.config.resort_internal_layers {
                self.sorter.encode(encoder, 0..3 * (key_layers - layer));
            }
            self.encode_layer(encoder, group, layer < key_layers);
        }
    }

    fn encode_layer(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        group: &LayerBindGroups,
        promote: bool,
    ) {
        let groups = gpu::workgroups(self.particle_count);
        let runs = self
            .table
            .slot(group.layer)
            .map_or(0, |slot| slot.capacity)
            .min(self.particle_count);

        self.kernels.mark.dispatch(encoder, &group.mark, groups);
        self.sorter.scan().encode(encoder);
        self.kernels.emit.dispatch(encoder, &group.emit, groups);
        self.kernels
            .aggregate
            .dispatch(encoder, &group.aggregate, gpu::workgroups(runs));
        self.kernels.finish.dispatch(encoder, &group.finish, 1);
        if promote {
            self.kernels
                .promote
                .dispatch(encoder, &self.promote_group, groups);
        }
    }

    /// Leaf `(key, particle)` entries; sorted in place by [`encode`](Self::encode).
    pub fn entries(&self) -> &wgpu::Buffer {
        self.sorter.front()
    }

    pub fn nodes(&self) -> &wgpu::Buffer {
        &self.nodes
    }

    pub fn leaf_of(&self) -> &wgpu::Buffer {
        &self.leaf_of
    }

    pub fn state(&self) -> &wgpu::Buffer {
        &self.state
    }

    pub fn uniforms(&self) -> &wgpu::Buffer {
        &self.uniforms_buffer
    }

    pub fn read_state(&self, ctx: &GpuContext) -> Result<BuildState> {
        gpu::read_buffer::<BuildState>(ctx, &self.state, 1)?
            .pop()
            .ok_or_else(|| GpuError::Readback("empty build state".into()))
    }

    /// Copy the arena, counts and leaf links back for inspection.
    pub fn read_snapshot(&self, ctx: &GpuContext) -> Result<TreeSnapshot> {
        let state = self.read_state(ctx)?;
        let nodes = gpu::read_buffer(ctx, &self.nodes, self.table.total_nodes() as usize)?;
        let leaf_of = gpu::read_buffer(ctx, &self.leaf_of, self.particle_count as usize)?;
        let layers = self.table.layer_count() as usize;

        let overflow_layer = (state.overflow != 0).then_some(state.overflow_layer);
        if let Some(layer) = overflow_layer {
            tracing::warn!(
                layer,
                top_layer = state.top_layer,
                "tree build overflowed its layer table"
            );
        }

        Ok(TreeSnapshot {
            nodes,
            table: self.table.clone(),
            layer_counts: state.layer_counts[..layers].to_vec(),
            top_layer: state.top_layer,
            overflow_layer,
            singleton_leaves: self.uses_shortcut(),
            leaf_of,
        })
    }
}
