//! WGSL programs for every effect kind.
//!
//! Each kind contributes a fragment stage; the vertex stage, the binding
//! layout and helpers are shared. Parameters arrive packed in `u.params` in
//! schema order and are bound to `p_<name>` locals.

use super::catalog::EffectKind;

/// Shared bindings, vertex stage and helpers.
///
/// Binding layout: 0 input texture, 1 sampler, 2 uniforms, 3 history texture.
pub const PRELUDE: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coords: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

struct Uniforms {
    resolution: vec2<f32>,
    time: f32,
    pad: f32,
    params: vec4<f32>,
}

@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_sampler: sampler;
@group(0) @binding(2) var<uniform> u: Uniforms;
@group(0) @binding(3) var t_history: texture_2d<f32>;

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.tex_coords = in.tex_coords;
    return out;
}

fn rand(co: vec2<f32>) -> f32 {
    return fract(sin(dot(co, vec2<f32>(12.9898, 78.233))) * 43758.5453);
}
"#;

const RGB_SHIFT: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_intensity = u.params.x;
    let p_offset = u.params.y;
    let shift = vec2<f32>(p_offset * p_intensity, 0.0);
    let r = textureSample(t_input, s_sampler, uv + shift).r;
    let g = textureSample(t_input, s_sampler, uv).g;
    let b = textureSample(t_input, s_sampler, uv - shift).b;
    return vec4<f32>(r, g, b, 1.0);
}
"#;

const DIGITAL_NOISE: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_intensity = u.params.x;
    let p_grain = u.params.y;
    let color = textureSample(t_input, s_sampler, uv);
    let noise = rand(uv * p_grain + vec2<f32>(u.time)) * p_intensity;
    return vec4<f32>(color.rgb + vec3<f32>(noise), 1.0);
}
"#;

// timeEcho and trail share the blend; they stay separate kinds so presets keep
// their own defaults.
const HISTORY_BLEND: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_mix = u.params.x;
    let current = textureSample(t_input, s_sampler, uv);
    let previous = textureSample(t_history, s_sampler, uv);
    return mix(current, previous, vec4<f32>(p_mix));
}
"#;

const COLOR_SHIFT: &str = r#"
fn hue_rotation(angle: f32) -> mat3x3<f32> {
    let s = sin(angle);
    let c = cos(angle);
    return mat3x3<f32>(
        vec3<f32>(0.213 + c * 0.787 - s * 0.213, 0.715 - c * 0.715 - s * 0.715, 0.072 - c * 0.072 + s * 0.928),
        vec3<f32>(0.213 - c * 0.213 + s * 0.143, 0.715 + c * 0.285 + s * 0.14, 0.072 - c * 0.072 - s * 0.283),
        vec3<f32>(0.213 - c * 0.213 - s * 0.787, 0.715 - c * 0.715 + s * 0.715, 0.072 + c * 0.928 + s * 0.072),
    );
}

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_hue = u.params.x;
    let p_saturation = u.params.y;
    let source = textureSample(t_input, s_sampler, uv).rgb;
    let rotated = hue_rotation(p_hue * 6.28318) * source;
    let luma = dot(rotated, vec3<f32>(0.2126, 0.7152, 0.0722));
    let color = mix(vec3<f32>(luma), rotated, vec3<f32>(1.0 + p_saturation));
    return vec4<f32>(color, 1.0);
}
"#;

const POSTERIZE: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_levels = u.params.x;
    let source = textureSample(t_input, s_sampler, uv).rgb;
    let color = floor(source * p_levels) / p_levels;
    return vec4<f32>(color, 1.0);
}
"#;

const SOLARIZE: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_threshold = u.params.x;
    let source = textureSample(t_input, s_sampler, uv).rgb;
    let inverted = vec3<f32>(1.0) - source;
    let color = mix(source, inverted, step(vec3<f32>(p_threshold), source));
    return vec4<f32>(color, 1.0);
}
"#;

const BLUR: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_amount = u.params.x;
    let texel = vec2<f32>(1.0) / u.resolution;
    var color = textureSample(t_input, s_sampler, uv).rgb * 0.36;
    color += textureSample(t_input, s_sampler, uv + texel * p_amount).rgb * 0.16;
    color += textureSample(t_input, s_sampler, uv - texel * p_amount).rgb * 0.16;
    color += textureSample(t_input, s_sampler, uv + vec2<f32>(texel.x, -texel.y) * p_amount).rgb * 0.16;
    color += textureSample(t_input, s_sampler, uv + vec2<f32>(-texel.x, texel.y) * p_amount).rgb * 0.16;
    return vec4<f32>(color, 1.0);
}
"#;

const SHARPEN: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_amount = u.params.x;
    let texel = vec2<f32>(1.0) / u.resolution;
    let edge = p_amount * 0.25;
    var color = textureSample(t_input, s_sampler, uv).rgb * (1.0 + p_amount);
    color -= textureSample(t_input, s_sampler, uv + vec2<f32>(texel.x, 0.0)).rgb * edge;
    color -= textureSample(t_input, s_sampler, uv - vec2<f32>(texel.x, 0.0)).rgb * edge;
    color -= textureSample(t_input, s_sampler, uv + vec2<f32>(0.0, texel.y)).rgb * edge;
    color -= textureSample(t_input, s_sampler, uv - vec2<f32>(0.0, texel.y)).rgb * edge;
    return vec4<f32>(color, 1.0);
}
"#;

const ASCII: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_scale = u.params.x;
    let blocks = mix(20.0, 80.0, p_scale);
    let grid = floor(uv * blocks) / blocks;
    let color = textureSample(t_input, s_sampler, grid).rgb;
    let luma = dot(color, vec3<f32>(0.299, 0.587, 0.114));
    let lit = step(0.5, luma);
    return vec4<f32>(mix(vec3<f32>(0.05), color, vec3<f32>(lit)), 1.0);
}
"#;

const DOUBLE_EXPOSURE: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_mix = u.params.x;
    let current = textureSample(t_input, s_sampler, uv).rgb;
    let ghost = textureSample(t_history, s_sampler, uv).rgb;
    return vec4<f32>(mix(current, ghost, vec3<f32>(p_mix)), 1.0);
}
"#;

const PIXELATE: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let p_size = u.params.x;
    let p_jitter = u.params.y;
    let block_size = mix(0.005, 0.06, p_size);
    let grid = floor(uv / block_size) * block_size;
    let noise = rand(grid + vec2<f32>(u.time));
    let offset = vec2<f32>(noise * p_jitter * block_size);
    let color = textureSample(t_input, s_sampler, grid + offset).rgb;
    return vec4<f32>(color, 1.0);
}
"#;

// Plain copy, used to resample one surface into another.
const PASSTHROUGH: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(t_input, s_sampler, uv);
}
"#;

/// Fragment stage for a kind, without the prelude.
pub fn fragment_body(kind: EffectKind) -> &'static str {
    match kind {
        EffectKind::RgbShift => RGB_SHIFT,
        EffectKind::DigitalNoise => DIGITAL_NOISE,
        EffectKind::TimeEcho | EffectKind::Trail => HISTORY_BLEND,
        EffectKind::ColorShift => COLOR_SHIFT,
        EffectKind::Posterize => POSTERIZE,
        EffectKind::Solarize => SOLARIZE,
        EffectKind::Blur => BLUR,
        EffectKind::Sharpen => SHARPEN,
        EffectKind::Ascii => ASCII,
        EffectKind::DoubleExposure => DOUBLE_EXPOSURE,
        EffectKind::Pixelate => PIXELATE,
    }
}

pub fn module_source(kind: EffectKind) -> String {
    format!("{PRELUDE}\n{}", fragment_body(kind))
}

/// Module that copies its input unchanged.
pub fn passthrough_source() -> String {
    format!("{PRELUDE}\n{PASSTHROUGH}")
}
