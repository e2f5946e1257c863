//! Built-in WGSL programs
//!
//! The forward programs share one parameter block and vertex stage
//! ([`FORWARD_PRELUDE`]); each light type appends its own fragment stage and
//! shadow map binding.

/// Uniform block, material texture, vertex stage and lighting helpers
pub const FORWARD_PRELUDE: &str = r#"
struct Params {
    g_model: mat4x4<f32>,
    g_view_proj: mat4x4<f32>,
    g_light_space: mat4x4<f32>,
    g_normal_matrix: mat3x3<f32>,
    g_eye_position: vec3<f32>,
    g_light_intensity: f32,
    g_ambient: vec3<f32>,
    g_light_range: f32,
    g_light_color: vec3<f32>,
    g_spot_cutoff: f32,
    g_light_position: vec3<f32>,
    g_shadow_far: f32,
    g_light_direction: vec3<f32>,
    g_shadow_bias: f32,
    g_attenuation: vec3<f32>,
    g_shadow_enabled: i32,
    mat_color: vec4<f32>,
    mat_specular_intensity: f32,
    mat_specular_power: f32,
    fs_variant: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(1) @binding(0) var mat_diffuse: texture_2d<f32>;
@group(1) @binding(1) var mat_diffuse_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) light_space: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    let world = params.g_model * vec4<f32>(input.position, 1.0);
    var out: VertexOutput;
    out.clip = params.g_view_proj * world;
    out.world_position = world.xyz;
    out.normal = normalize(params.g_normal_matrix * input.normal);
    out.uv = input.uv;
    out.light_space = params.g_light_space * world;
    return out;
}

fn material_albedo(uv: vec2<f32>) -> vec4<f32> {
    return textureSample(mat_diffuse, mat_diffuse_sampler, uv) * params.mat_color;
}

// `to_light` points from the surface toward the light.
fn blinn_phong(to_light: vec3<f32>, normal: vec3<f32>, world_position: vec3<f32>) -> vec3<f32> {
    let diffuse = max(dot(normal, to_light), 0.0);
    let view_dir = normalize(params.g_eye_position - world_position);
    let half_dir = normalize(to_light + view_dir);
    var specular = 0.0;
    if diffuse > 0.0 {
        specular = pow(max(dot(normal, half_dir), 0.0), params.mat_specular_power)
            * params.mat_specular_intensity;
    }
    return params.g_light_color * params.g_light_intensity * (diffuse + specular);
}

fn attenuate(dist: f32) -> f32 {
    let a = params.g_attenuation;
    return 1.0 / (a.x + a.y * dist + a.z * dist * dist + 0.0001);
}

fn show_normal(normal: vec3<f32>) -> vec4<f32> {
    return vec4<f32>(normal * 0.5 + 0.5, 1.0);
}
"#;

const AMBIENT_BODY: &str = r#"
@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = material_albedo(input.uv);
    if params.fs_variant == 1u {
        return show_normal(normalize(input.normal));
    }
    return vec4<f32>(albedo.rgb * params.g_ambient, 1.0);
}
"#;

const SHADOW_2D: &str = r#"
@group(1) @binding(2) var g_shadow_map: texture_depth_2d;
@group(1) @binding(3) var g_shadow_map_sampler: sampler_comparison;

fn shadow_factor(light_space: vec4<f32>) -> f32 {
    if params.g_shadow_enabled == 0 {
        return 1.0;
    }
    let ndc = light_space.xyz / light_space.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, ndc.y * -0.5 + 0.5);
    if any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) || ndc.z > 1.0 {
        return 1.0;
    }
    return textureSampleCompareLevel(g_shadow_map, g_shadow_map_sampler, uv, ndc.z - params.g_shadow_bias);
}
"#;

const DIRECTIONAL_BODY: &str = r#"
@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = material_albedo(input.uv);
    let normal = normalize(input.normal);
    if params.fs_variant == 1u {
        return show_normal(normal);
    }
    let light = blinn_phong(normalize(-params.g_light_direction), normal, input.world_position);
    return vec4<f32>(albedo.rgb * light * shadow_factor(input.light_space), 1.0);
}
"#;

const POINT_BODY: &str = r#"
@group(1) @binding(2) var g_shadow_map: texture_depth_cube;
@group(1) @binding(3) var g_shadow_map_sampler: sampler_comparison;

fn shadow_factor(world_position: vec3<f32>) -> f32 {
    if params.g_shadow_enabled == 0 {
        return 1.0;
    }
    let to_fragment = world_position - params.g_light_position;
    let depth = length(to_fragment) / params.g_shadow_far;
    return textureSampleCompareLevel(g_shadow_map, g_shadow_map_sampler, to_fragment, depth - params.g_shadow_bias);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = material_albedo(input.uv);
    let normal = normalize(input.normal);
    if params.fs_variant == 1u {
        return show_normal(normal);
    }
    let to_light = params.g_light_position - input.world_position;
    let dist = length(to_light);
    if dist > params.g_light_range {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }
    let light = blinn_phong(to_light / dist, normal, input.world_position) * attenuate(dist);
    return vec4<f32>(albedo.rgb * light * shadow_factor(input.world_position), 1.0);
}
"#;

const SPOT_BODY: &str = r#"
@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = material_albedo(input.uv);
    let normal = normalize(input.normal);
    if params.fs_variant == 1u {
        return show_normal(normal);
    }
    let to_light = params.g_light_position - input.world_position;
    let dist = length(to_light);
    let dir = to_light / dist;
    let spot = dot(-dir, normalize(params.g_light_direction));
    if spot <= params.g_spot_cutoff || dist > params.g_light_range {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }
    let edge = 1.0 - (1.0 - spot) / (1.0 - params.g_spot_cutoff);
    let light = blinn_phong(dir, normal, input.world_position) * attenuate(dist) * edge;
    return vec4<f32>(albedo.rgb * light * shadow_factor(input.light_space), 1.0);
}
"#;

const ALPHA_BODY: &str = r#"
@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = material_albedo(input.uv);
    let normal = normalize(input.normal);
    if params.fs_variant == 1u {
        return show_normal(normal);
    }
    let key = blinn_phong(normalize(-params.g_light_direction), normal, input.world_position);
    return vec4<f32>(albedo.rgb * (params.g_ambient + key), albedo.a);
}
"#;

const GBUFFER_BODY: &str = r#"
struct GBufferOutput {
    @location(0) position: vec4<f32>,
    @location(1) texcoord: vec4<f32>,
    @location(2) normal: vec4<f32>,
    @location(3) albedo_specular: vec4<f32>,
}

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    let albedo = material_albedo(input.uv);
    var out: GBufferOutput;
    out.position = vec4<f32>(input.world_position, 1.0);
    out.texcoord = vec4<f32>(input.uv, 0.0, 1.0);
    out.normal = vec4<f32>(normalize(input.normal), 0.0);
    out.albedo_specular = vec4<f32>(albedo.rgb, params.mat_specular_intensity);
    return out;
}
"#;

pub fn ambient() -> String {
    [FORWARD_PRELUDE, AMBIENT_BODY].concat()
}

pub fn directional() -> String {
    [FORWARD_PRELUDE, SHADOW_2D, DIRECTIONAL_BODY].concat()
}

pub fn point() -> String {
    [FORWARD_PRELUDE, POINT_BODY].concat()
}

pub fn spot() -> String {
    [FORWARD_PRELUDE, SHADOW_2D, SPOT_BODY].concat()
}

pub fn alpha() -> String {
    [FORWARD_PRELUDE, ALPHA_BODY].concat()
}

pub fn gbuffer() -> String {
    [FORWARD_PRELUDE, GBUFFER_BODY].concat()
}

/// Depth-only caster for directional and spot shadow maps
pub const SHADOW_DEPTH: &str = r#"
struct Params {
    g_model: mat4x4<f32>,
    g_light_view_proj: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return params.g_light_view_proj * params.g_model * vec4<f32>(position, 1.0);
}
"#;

/// Cube shadow caster writing linear distance to the light over the far plane
pub const SHADOW_DISTANCE: &str = r#"
struct Params {
    g_model: mat4x4<f32>,
    g_light_view_proj: mat4x4<f32>,
    g_light_position: vec3<f32>,
    g_shadow_far: f32,
}

@group(0) @binding(0) var<uniform> params: Params;

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) world_position: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    let world = params.g_model * vec4<f32>(position, 1.0);
    var out: VertexOutput;
    out.clip = params.g_light_view_proj * world;
    out.world_position = world.xyz;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @builtin(frag_depth) f32 {
    return clamp(length(input.world_position - params.g_light_position) / params.g_shadow_far, 0.0, 1.0);
}
"#;

/// Gradient sky drawn on a unit cube at the far plane
pub const SKYBOX: &str = r#"
struct Params {
    g_view_rotation_proj: mat4x4<f32>,
    g_sky_zenith: vec3<f32>,
    g_sky_horizon: vec3<f32>,
    g_sky_ground: vec3<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip = (params.g_view_rotation_proj * vec4<f32>(position, 1.0)).xyww;
    out.direction = position;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let t = normalize(input.direction).y;
    let up = mix(params.g_sky_horizon, params.g_sky_zenith, sqrt(max(t, 0.0)));
    let down = mix(params.g_sky_horizon, params.g_sky_ground, sqrt(max(-t, 0.0)));
    return vec4<f32>(select(down, up, t >= 0.0), 1.0);
}
"#;

/// Full-screen tone mapping of the HDR target.
///
/// `fs_variant` 0 tone maps, 1 passes HDR values through clamped.
pub const TONEMAP: &str = r#"
struct Params {
    exposure: f32,
    gamma: f32,
    tonemap_operator: u32,
    fs_variant: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(1) @binding(0) var hdr_texture: texture_2d<f32>;
@group(1) @binding(1) var hdr_texture_sampler: sampler;

fn aces_tonemap(color: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return saturate((color * (a * color + b)) / (color * (c * color + d) + e));
}

fn reinhard_tonemap(color: vec3<f32>) -> vec3<f32> {
    return color / (color + vec3<f32>(1.0));
}

fn uncharted2_curve(x: vec3<f32>) -> vec3<f32> {
    let a = 0.15;
    let b = 0.50;
    let c = 0.10;
    let d = 0.20;
    let e = 0.02;
    let f = 0.30;
    return ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f;
}

fn uncharted2_tonemap(color: vec3<f32>) -> vec3<f32> {
    let white = uncharted2_curve(vec3<f32>(11.2));
    return saturate(uncharted2_curve(color * 2.0) / white);
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    var color = textureSample(hdr_texture, hdr_texture_sampler, input.uv).rgb;
    if params.fs_variant == 1u {
        return vec4<f32>(saturate(color), 1.0);
    }
    color = color * params.exposure;

    var mapped: vec3<f32>;
    switch params.tonemap_operator {
        case 0u: { mapped = reinhard_tonemap(color); }
        case 1u: { mapped = aces_tonemap(color); }
        case 2u: { mapped = uncharted2_tonemap(color); }
        default: { mapped = saturate(color); }
    }

    return vec4<f32>(pow(mapped, vec3<f32>(1.0 / params.gamma)), 1.0);
}
"#;
