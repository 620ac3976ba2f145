//! WGSL compute shaders for the gravity pipeline.
//!
//! Every module is [`COMMON`] followed by one stage's source, see [`compose`].
//! Structs mirror the `#[repr(C)]` types in `astro_core` byte for byte.

/// Shared structs, constants and helpers.
pub const COMMON: &str = r#"
const NO_CHILD: u32 = 0xffffffffu;
const MAX_LAYERS: u32 = 22u;
const KIND_STAR: u32 = 0u;

struct PositionMass {
    position: vec3<f32>,
    mass: f32,
}

struct VelocityRadius {
    velocity: vec3<f32>,
    radius: f32,
}

struct ColorType {
    color: vec4<f32>,
    kind: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}

struct SortEntry {
    key_lo: u32,
    key_hi: u32,
    index: u32,
}

struct TreeNode {
    center_of_mass: vec3<f32>,
    mass: f32,
    emitted: vec4<f32>,
    emitted_center: vec3<f32>,
    layer: u32,
    key_lo: u32,
    key_hi: u32,
    member_count: u32,
    parent: u32,
    children: array<u32, 8>,
}

struct ForceSample {
    force: vec3<f32>,
    visited: u32,
    light: vec3<f32>,
    truncated: u32,
}

// layers[k] = (offset, capacity, 0, 0)
struct TreeUniforms {
    particle_count: u32,
    key_layers: u32,
    layer_count: u32,
    pad0: u32,
    layers: array<vec4<u32>, 22>,
}

// Stars emit color * intensity, everything else is dark.
fn emission(c: ColorType) -> vec4<f32> {
    if (c.kind != KIND_STAR) {
        return vec4<f32>(0.0);
    }
    return vec4<f32>(c.color.rgb * c.color.a, c.color.a);
}

// 64-bit logical shift right of a (lo, hi) key.
fn shift_key_right(key: vec2<u32>, s: u32) -> vec2<u32> {
    if (s == 0u) {
        return key;
    }
    if (s >= 64u) {
        return vec2<u32>(0u, 0u);
    }
    if (s >= 32u) {
        return vec2<u32>(key.y >> (s - 32u), 0u);
    }
    return vec2<u32>((key.x >> s) | (key.y << (32u - s)), key.y >> s);
}

fn key_bit(entry: SortEntry, bit: u32) -> u32 {
    if (bit < 32u) {
        return (entry.key_lo >> bit) & 1u;
    }
    return (entry.key_hi >> (bit - 32u)) & 1u;
}
"#;

/// Morton key generation: one invocation per particle.
pub const KEY_SHADER: &str = r#"
struct KeyParams {
    particle_count: u32,
    key_layers: u32,
    half_extent: f32,
    scale: f32,
}

@group(0) @binding(0) var<storage, read> position_mass: array<PositionMass>;
@group(0) @binding(1) var<storage, read_write> entries: array<SortEntry>;
@group(0) @binding(2) var<uniform> params: KeyParams;

// Multiply by a host-computed scale; a divide here would drift from the host mirror.
fn quantize(v: f32) -> u32 {
    let scaled = (v + params.half_extent) * params.scale;
    return u32(clamp(scaled, 0.0, 2097151.0));
}

@compute @workgroup_size(256)
fn generate_keys(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.particle_count) {
        return;
    }

    let p = position_mass[i].position;
    let q = vec3<u32>(quantize(p.x), quantize(p.y), quantize(p.z));

    var lo = 0u;
    var hi = 0u;
    for (var k = 0u; k < 21u; k++) {
        for (var axis = 0u; axis < 3u; axis++) {
            let bit = (q[axis] >> k) & 1u;
            let b = 3u * k + axis;
            if (b < 32u) {
                lo |= bit << b;
            } else {
                hi |= bit << (b - 32u);
            }
        }
    }

    let key = shift_key_right(vec2<u32>(lo, hi), 3u * (21u - params.key_layers));
    entries[i] = SortEntry(key.x, key.y, i);
}
"#;

/// Work-efficient exclusive scan, one level of a multi-level hierarchy.
///
/// `scan_blocks` scans 512-element blocks with 256 invocations and writes
/// each block total to `sums`. `add_block_offsets` adds the scanned block
/// totals back. The live length of a level is the live count divided by
/// 512 once per level, rounded up.
pub const SCAN_SHADER: &str = r#"
const BLOCK: u32 = 512u;

struct ScanParams {
    level: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}

@group(0) @binding(0) var<storage, read_write> data: array<u32>;
@group(0) @binding(1) var<storage, read_write> sums: array<u32>;
@group(0) @binding(2) var<storage, read> count: array<u32>;
@group(0) @binding(3) var<uniform> params: ScanParams;

var<workgroup> tile: array<u32, 512>;

fn level_length() -> u32 {
    var n = count[0];
    for (var l = 0u; l < params.level; l++) {
        n = (n + BLOCK - 1u) / BLOCK;
    }
    return min(n, arrayLength(&data));
}

@compute @workgroup_size(256)
fn scan_blocks(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let len = level_length();
    let base = wid.x * BLOCK;
    let t = lid.x;
    let a = base + 2u * t;
    let b = a + 1u;

    // Every invocation reaches every barrier; only loads and stores are guarded.
    var va = 0u;
    var vb = 0u;
    if (a < len) {
        va = data[a];
    }
    if (b < len) {
        vb = data[b];
    }
    tile[2u * t] = va;
    tile[2u * t + 1u] = vb;

    // Up-sweep.
    var offset = 1u;
    for (var d = BLOCK >> 1u; d > 0u; d = d >> 1u) {
        workgroupBarrier();
        if (t < d) {
            let ai = offset * (2u * t + 1u) - 1u;
            let bi = offset * (2u * t + 2u) - 1u;
            tile[bi] += tile[ai];
        }
        offset = offset << 1u;
    }

    workgroupBarrier();
    if (t == 0u) {
        // Block 0 always reports, so an empty input still yields a zero total.
        if (base < len || wid.x == 0u) {
            sums[wid.x] = tile[BLOCK - 1u];
        }
        tile[BLOCK - 1u] = 0u;
    }

    // Down-sweep.
    for (var d = 1u; d < BLOCK; d = d << 1u) {
        offset = offset >> 1u;
        workgroupBarrier();
        if (t < d) {
            let ai = offset * (2u * t + 1u) - 1u;
            let bi = offset * (2u * t + 2u) - 1u;
            let left = tile[ai];
            tile[ai] = tile[bi];
            tile[bi] += left;
        }
    }

    workgroupBarrier();
    if (a < len) {
        data[a] = tile[2u * t];
    }
    if (b < len) {
        data[b] = tile[2u * t + 1u];
    }
}

@compute @workgroup_size(256)
fn add_block_offsets(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < level_length()) {
        data[i] += sums[i / BLOCK];
    }
}
"#;

/// One pass of the binary LSD radix sort.
///
/// `flag_zero_bits` writes 1 where the current bit is 0; after those flags
/// are scanned, `scatter` moves each entry to its stable slot. Entries past
/// the live count are copied through unchanged.
pub const SORT_SHADER: &str = r#"
struct SortParams {
    bit: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}

@group(0) @binding(0) var<storage, read> src: array<SortEntry>;
@group(0) @binding(1) var<storage, read_write> dst: array<SortEntry>;
@group(0) @binding(2) var<storage, read_write> flags: array<u32>;
@group(0) @binding(3) var<storage, read> total: array<u32>;
@group(0) @binding(4) var<storage, read> count: array<u32>;
@group(0) @binding(5) var<uniform> params: SortParams;

fn live_count() -> u32 {
    return min(count[0], arrayLength(&src));
}

@compute @workgroup_size(256)
fn flag_zero_bits(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < live_count()) {
        flags[i] = 1u - key_bit(src[i], params.bit);
    }
}

@compute @workgroup_size(256)
fn scatter(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&src)) {
        return;
    }
    let entry = src[i];
    if (i >= live_count()) {
        dst[i] = entry;
        return;
    }

    let zeros_before = flags[i];
    var slot = zeros_before;
    if (key_bit(entry, params.bit) != 0u) {
        slot = total[0] + i - zeros_before;
    }
    dst[slot] = entry;
}
"#;

/// Layered tree compaction.
///
/// Per layer: `mark_runs`, a scan of the marks, `emit_runs`, `aggregate`,
/// `finish_layer` and `promote`. Once a layer produces at most one node, or
/// the last layer is reached, `done` is set and every later kernel returns
/// immediately.
pub const TREE_SHADER: &str = r#"
struct BuildState {
    live_count: u32,
    run_count: atomic<u32>,
    top_layer: u32,
    done: u32,
    overflow: u32,
    overflow_layer: u32,
    pad0: u32,
    pad1: u32,
    layer_counts: array<u32, 22>,
}

struct LayerPass {
    layer: u32,
    singletons: u32,
    final_layer: u32,
    pad0: u32,
}

@group(0) @binding(0) var<storage, read> position_mass: array<PositionMass>;
@group(0) @binding(1) var<storage, read> color_type: array<ColorType>;
@group(0) @binding(2) var<storage, read_write> entries: array<SortEntry>;
@group(0) @binding(3) var<storage, read_write> next_entries: array<SortEntry>;
@group(0) @binding(4) var<storage, read_write> flags: array<u32>;
@group(0) @binding(5) var<storage, read_write> run_starts: array<u32>;
@group(0) @binding(6) var<storage, read_write> nodes: array<TreeNode>;
@group(0) @binding(7) var<storage, read_write> leaf_of: array<u32>;
@group(0) @binding(8) var<storage, read_write> state: BuildState;
@group(0) @binding(9) var<uniform> tree: TreeUniforms;
@group(0) @binding(10) var<uniform> layer_pass: LayerPass;

@compute @workgroup_size(1)
fn reset_state() {
    state.live_count = tree.particle_count;
    atomicStore(&state.run_count, 0u);
    state.top_layer = 0u;
    state.done = 0u;
    state.overflow = 0u;
    state.overflow_layer = 0u;
    for (var k = 0u; k < MAX_LAYERS; k++) {
        state.layer_counts[k] = 0u;
    }
}

fn is_run_start(i: u32) -> u32 {
    if (layer_pass.singletons != 0u || i == 0u) {
        return 1u;
    }
    let a = entries[i];
    let b = entries[i - 1u];
    return select(0u, 1u, a.key_lo != b.key_lo || a.key_hi != b.key_hi);
}

@compute @workgroup_size(256)
fn mark_runs(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (state.done != 0u || i >= state.live_count) {
        return;
    }
    flags[i] = is_run_start(i);
}

// flags now holds each element's run index.
@compute @workgroup_size(256)
fn emit_runs(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (state.done != 0u || i >= state.live_count) {
        return;
    }
    if (is_run_start(i) == 1u) {
        run_starts[flags[i]] = i;
        atomicAdd(&state.run_count, 1u);
    }
}

@compute @workgroup_size(256)
fn aggregate(@builtin(global_invocation_id) gid: vec3<u32>) {
    let r = gid.x;
    if (state.done != 0u) {
        return;
    }
    let runs = atomicLoad(&state.run_count);
    let k = layer_pass.layer;
    let slot = tree.layers[k];
    // Runs past the layer capacity are dropped; finish_layer flags the overflow.
    if (r >= runs || r >= slot.y) {
        return;
    }

    let start = run_starts[r];
    var end = state.live_count;
    if (r + 1u < runs) {
        end = run_starts[r + 1u];
    }
    let node_index = slot.x + r;

    var mass = 0.0;
    var weighted = vec3<f32>(0.0);
    var plain = vec3<f32>(0.0);
    var light = vec4<f32>(0.0);
    var light_weighted = vec3<f32>(0.0);
    var members = 0u;
    var children = array<u32, 8>(
        NO_CHILD, NO_CHILD, NO_CHILD, NO_CHILD,
        NO_CHILD, NO_CHILD, NO_CHILD, NO_CHILD,
    );

    for (var j = start; j < end; j++) {
        let member = entries[j].index;
        if (k == 0u) {
            let pm = position_mass[member];
            let e = emission(color_type[member]);
            mass += pm.mass;
            weighted += pm.position * pm.mass;
            plain += pm.position;
            light += e;
            light_weighted += pm.position * e.w;
            members += 1u;
            leaf_of[member] = node_index;
        } else {
            let child = nodes[member];
            mass += child.mass;
            weighted += child.center_of_mass * child.mass;
            plain += child.center_of_mass;
            light += child.emitted;
            light_weighted += child.emitted_center * child.emitted.w;
            members += child.member_count;
            nodes[member].parent = node_index;
            if (j - start < 8u) {
                children[j - start] = member;
            }
        }
    }

    // Massless groups fall back to the plain mean.
    var center = plain / f32(max(end - start, 1u));
    if (mass > 0.0) {
        center = weighted / mass;
    }
    var light_center = center;
    if (light.w > 0.0) {
        light_center = light_weighted / light.w;
    }

    let head = entries[start];
    var node: TreeNode;
    node.center_of_mass = center;
    node.mass = mass;
    node.emitted = light;
    node.emitted_center = light_center;
    node.layer = k;
    node.key_lo = head.key_lo;
    node.key_hi = head.key_hi;
    node.member_count = members;
    node.parent = NO_CHILD;
    node.children = children;
    nodes[node_index] = node;

    let parent_key = shift_key_right(vec2<u32>(head.key_lo, head.key_hi), 3u);
    next_entries[r] = SortEntry(parent_key.x, parent_key.y, node_index);
}

@compute @workgroup_size(1)
fn finish_layer() {
    if (state.done != 0u) {
        return;
    }
    let k = layer_pass.layer;
    let runs = atomicLoad(&state.run_count);
    let capacity = tree.layers[k].y;

    var produced = runs;
    if (runs > capacity) {
        if (state.overflow == 0u) {
            state.overflow_layer = k;
        }
        state.overflow = 1u;
        produced = capacity;
    }
    state.layer_counts[k] = produced;
    state.top_layer = k;
    state.live_count = produced;
    atomicStore(&state.run_count, 0u);
    if (produced <= 1u || layer_pass.final_layer != 0u) {
        state.done = 1u;
    }
}

@compute @workgroup_size(256)
fn promote(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < state.live_count) {
        entries[i] = next_entries[i];
    }
}
"#;

/// Barnes-Hut force evaluation with a fixed-size explicit stack.
///
/// `__STACK_CAPACITY__` is replaced with the configured stack size before
/// compilation. When a node's children do not fit on the stack the node is
/// taken as a single mass and `truncated` is incremented.
pub const FORCE_SHADER: &str = r#"
const STACK_CAPACITY: u32 = __STACK_CAPACITY__u;

struct BuildView {
    live_count: u32,
    run_count: u32,
    top_layer: u32,
    done: u32,
    overflow: u32,
    overflow_layer: u32,
    pad0: u32,
    pad1: u32,
    layer_counts: array<u32, 22>,
}

struct ForceParams {
    particle_count: u32,
    theta: f32,
    softening: f32,
    max_force: f32,
    gravitational_constant: f32,
    leaf_cell_size: f32,
    pad0: u32,
    pad1: u32,
}

struct Source {
    center: vec3<f32>,
    mass: f32,
    light_center: vec3<f32>,
    light: vec4<f32>,
}

@group(0) @binding(0) var<storage, read> position_mass: array<PositionMass>;
@group(0) @binding(1) var<storage, read> color_type: array<ColorType>;
@group(0) @binding(2) var<storage, read> nodes: array<TreeNode>;
@group(0) @binding(3) var<storage, read> leaf_of: array<u32>;
@group(0) @binding(4) var<storage, read> state: BuildView;
@group(0) @binding(5) var<storage, read_write> forces: array<ForceSample>;
@group(0) @binding(6) var<uniform> params: ForceParams;
@group(0) @binding(7) var<uniform> tree: TreeUniforms;

// A node as seen from `me`: if the node contains `me`, its own mass and
// light are taken out first.
fn source_of(n: TreeNode, contains: bool, me: PositionMass, my_light: vec4<f32>) -> Source {
    var s = Source(n.center_of_mass, n.mass, n.emitted_center, n.emitted);
    if (!contains) {
        return s;
    }

    let rest = n.mass - me.mass;
    if (rest > n.mass * 1.0e-6) {
        s.center = (n.center_of_mass * n.mass - me.position * me.mass) / rest;
        s.mass = rest;
    } else {
        s.mass = 0.0;
    }

    let rest_light = n.emitted - my_light;
    if (rest_light.w > n.emitted.w * 1.0e-6) {
        s.light_center = (n.emitted_center * n.emitted.w - me.position * my_light.w) / rest_light.w;
        s.light = rest_light;
    } else {
        s.light = vec4<f32>(0.0);
    }
    return s;
}

fn gravity(s: Source, me: PositionMass) -> vec3<f32> {
    if (s.mass <= 0.0) {
        return vec3<f32>(0.0);
    }
    let d = s.center - me.position;
    let inv = inverseSqrt(dot(d, d) + params.softening * params.softening);
    return d * (params.gravitational_constant * me.mass * s.mass * inv * inv * inv);
}

fn received_light(s: Source, me: PositionMass) -> vec3<f32> {
    if (s.light.w <= 0.0) {
        return vec3<f32>(0.0);
    }
    let d = s.light_center - me.position;
    return s.light.rgb / (dot(d, d) + params.softening * params.softening);
}

@compute @workgroup_size(256)
fn evaluate_forces(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.particle_count) {
        return;
    }
    let me = position_mass[i];
    let my_light = emission(color_type[i]);

    // path[k] is the layer-k node holding this particle.
    var path: array<u32, 22>;
    var cursor = leaf_of[i];
    for (var k = 0u; k < MAX_LAYERS; k++) {
        path[k] = cursor;
        if (cursor != NO_CHILD) {
            cursor = nodes[cursor].parent;
        }
    }

    var force = vec3<f32>(0.0);
    var light = vec3<f32>(0.0);
    var visited = 0u;
    var truncated = 0u;
    var stack: array<u32, STACK_CAPACITY>;

    let top = min(state.top_layer, MAX_LAYERS - 1u);
    let first_root = tree.layers[top].x;
    let root_count = state.layer_counts[top];

    for (var r = 0u; r < root_count; r++) {
        stack[0] = first_root + r;
        var depth = 1u;
        while (depth > 0u) {
            depth -= 1u;
            let index = stack[depth];
            let n = nodes[index];
            if (n.mass <= 0.0 && n.emitted.w <= 0.0) {
                continue;
            }
            visited += 1u;
            let contains = path[min(n.layer, MAX_LAYERS - 1u)] == index;

            if (n.layer > 0u) {
                let extent = params.leaf_cell_size * f32(1u << n.layer);
                let dist = length(n.center_of_mass - me.position);
                if (contains || extent >= params.theta * dist) {
                    var open = 0u;
                    for (var c = 0u; c < 8u; c++) {
                        if (nodes[index].children[c] != NO_CHILD) {
                            open += 1u;
                        }
                    }
                    if (depth + open <= STACK_CAPACITY) {
                        for (var c = 0u; c < 8u; c++) {
                            let child = nodes[index].children[c];
                            if (child != NO_CHILD) {
                                stack[depth] = child;
                                depth += 1u;
                            }
                        }
                        continue;
                    }
                    truncated += 1u;
                }
            }

            let s = source_of(n, contains, me, my_light);
            force += gravity(s, me);
            light += received_light(s, me);
        }
    }

    let magnitude = length(force);
    if (magnitude > params.max_force) {
        force *= params.max_force / magnitude;
    }
    forces[i] = ForceSample(force, visited, light, truncated);
}
"#;

/// Semi-implicit Euler with velocity damping.
pub const INTEGRATE_SHADER: &str = r#"
struct IntegrateParams {
    particle_count: u32,
    dt: f32,
    damping: f32,
    pad0: u32,
}

@group(0) @binding(0) var<storage, read_write> position_mass: array<PositionMass>;
@group(0) @binding(1) var<storage, read_write> velocity_radius: array<VelocityRadius>;
@group(0) @binding(2) var<storage, read> forces: array<ForceSample>;
@group(0) @binding(3) var<uniform> params: IntegrateParams;

@compute @workgroup_size(256)
fn integrate(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.particle_count) {
        return;
    }

    var pm = position_mass[i];
    var vr = velocity_radius[i];
    var acceleration = vec3<f32>(0.0);
    if (pm.mass > 0.0) {
        acceleration = forces[i].force / pm.mass;
    }
    vr.velocity = (vr.velocity + acceleration * params.dt) * (1.0 - params.damping);
    pm.position += vr.velocity * params.dt;

    position_mass[i] = pm;
    velocity_radius[i] = vr;
}
"#;

/// Prefix a stage's source with [`COMMON`].
pub fn compose(stage: &str) -> String {
    [COMMON, stage].concat()
}

/// Force shader with the traversal stack size filled in.
pub fn force_shader(stack_capacity: u32) -> String {
    compose(FORCE_SHADER).replace("__STACK_CAPACITY__", &stack_capacity.to_string())
}
