//! Typed parameters and the per-pixel render function of every effect kind.
//!
//! These functions are the reference semantics of the WGSL programs in
//! [`super::wgsl`]; the software backend evaluates them directly.

use glam::{Mat3, Vec2, Vec3, Vec4, Vec4Swizzles};

use super::catalog::{EffectKind, ParamSpec};
use super::chain::ParamMap;

/// Anything that can be sampled with normalized coordinates.
pub trait Texture {
    fn sample(&self, uv: Vec2) -> Vec4;
}

/// Per-pass inputs that do not come from the effect's parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadeContext {
    pub uv: Vec2,
    pub resolution: Vec2,
    pub time: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RgbShift {
    pub intensity: f32,
    pub offset: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DigitalNoise {
    pub intensity: f32,
    pub grain: f32,
}

/// Blend between the current input and the previous composite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryBlend {
    pub mix: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorShift {
    pub hue: f32,
    pub saturation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posterize {
    pub levels: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solarize {
    pub threshold: f32,
}

/// Five-tap kernel strength, shared by blur and sharpen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kernel {
    pub amount: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ascii {
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pixelate {
    pub size: f32,
    pub jitter: f32,
}

/// Resolved parameters of one pass, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectParams {
    RgbShift(RgbShift),
    DigitalNoise(DigitalNoise),
    TimeEcho(HistoryBlend),
    Trail(HistoryBlend),
    ColorShift(ColorShift),
    Posterize(Posterize),
    Solarize(Solarize),
    Blur(Kernel),
    Sharpen(Kernel),
    Ascii(Ascii),
    DoubleExposure(HistoryBlend),
    Pixelate(Pixelate),
}

fn value_or_default(values: &ParamMap, spec: &ParamSpec) -> f32 {
    values.get(spec.name).copied().unwrap_or(spec.default)
}

impl EffectParams {
    /// Resolve typed parameters from an instance's value map. Missing keys fall
    /// back to the schema default, so any instance is renderable.
    pub fn resolve(kind: EffectKind, values: &ParamMap) -> Self {
        let schema = kind.schema();
        let p = |index: usize| value_or_default(values, &schema[index]);
        match kind {
            EffectKind::RgbShift => EffectParams::RgbShift(RgbShift { intensity: p(0), offset: p(1) }),
            EffectKind::DigitalNoise => {
                EffectParams::DigitalNoise(DigitalNoise { intensity: p(0), grain: p(1) })
            }
            EffectKind::TimeEcho => EffectParams::TimeEcho(HistoryBlend { mix: p(0) }),
            EffectKind::Trail => EffectParams::Trail(HistoryBlend { mix: p(0) }),
            EffectKind::ColorShift => {
                EffectParams::ColorShift(ColorShift { hue: p(0), saturation: p(1) })
            }
            EffectKind::Posterize => EffectParams::Posterize(Posterize { levels: p(0) }),
            EffectKind::Solarize => EffectParams::Solarize(Solarize { threshold: p(0) }),
            EffectKind::Blur => EffectParams::Blur(Kernel { amount: p(0) }),
            EffectKind::Sharpen => EffectParams::Sharpen(Kernel { amount: p(0) }),
            EffectKind::Ascii => EffectParams::Ascii(Ascii { scale: p(0) }),
            EffectKind::DoubleExposure => EffectParams::DoubleExposure(HistoryBlend { mix: p(0) }),
            EffectKind::Pixelate => EffectParams::Pixelate(Pixelate { size: p(0), jitter: p(1) }),
        }
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            EffectParams::RgbShift(_) => EffectKind::RgbShift,
            EffectParams::DigitalNoise(_) => EffectKind::DigitalNoise,
            EffectParams::TimeEcho(_) => EffectKind::TimeEcho,
            EffectParams::Trail(_) => EffectKind::Trail,
            EffectParams::ColorShift(_) => EffectKind::ColorShift,
            EffectParams::Posterize(_) => EffectKind::Posterize,
            EffectParams::Solarize(_) => EffectKind::Solarize,
            EffectParams::Blur(_) => EffectKind::Blur,
            EffectParams::Sharpen(_) => EffectKind::Sharpen,
            EffectParams::Ascii(_) => EffectKind::Ascii,
            EffectParams::DoubleExposure(_) => EffectKind::DoubleExposure,
            EffectParams::Pixelate(_) => EffectKind::Pixelate,
        }
    }

    /// Pack into the `params` vec4 of the WGSL uniform block, in schema order.
    pub fn pack(&self) -> [f32; 4] {
        match *self {
            EffectParams::RgbShift(RgbShift { intensity, offset }) => [intensity, offset, 0.0, 0.0],
            EffectParams::DigitalNoise(DigitalNoise { intensity, grain }) => [intensity, grain, 0.0, 0.0],
            EffectParams::TimeEcho(HistoryBlend { mix })
            | EffectParams::Trail(HistoryBlend { mix })
            | EffectParams::DoubleExposure(HistoryBlend { mix }) => [mix, 0.0, 0.0, 0.0],
            EffectParams::ColorShift(ColorShift { hue, saturation }) => [hue, saturation, 0.0, 0.0],
            EffectParams::Posterize(Posterize { levels }) => [levels, 0.0, 0.0, 0.0],
            EffectParams::Solarize(Solarize { threshold }) => [threshold, 0.0, 0.0, 0.0],
            EffectParams::Blur(Kernel { amount }) | EffectParams::Sharpen(Kernel { amount }) => {
                [amount, 0.0, 0.0, 0.0]
            }
            EffectParams::Ascii(Ascii { scale }) => [scale, 0.0, 0.0, 0.0],
            EffectParams::Pixelate(Pixelate { size, jitter }) => [size, jitter, 0.0, 0.0],
        }
    }

    /// Colour of one output pixel.
    pub fn shade<T: Texture + ?Sized>(&self, input: &T, history: &T, ctx: &ShadeContext) -> Vec4 {
        let uv = ctx.uv;
        match *self {
            EffectParams::RgbShift(p) => {
                let shift = Vec2::new(p.offset * p.intensity, 0.0);
                let r = input.sample(uv + shift).x;
                let g = input.sample(uv).y;
                let b = input.sample(uv - shift).z;
                Vec4::new(r, g, b, 1.0)
            }
            EffectParams::DigitalNoise(p) => {
                let color = input.sample(uv);
                let noise = rand(uv * p.grain + Vec2::splat(ctx.time)) * p.intensity;
                (color.xyz() + Vec3::splat(noise)).extend(1.0)
            }
            EffectParams::TimeEcho(p) | EffectParams::Trail(p) => {
                let current = input.sample(uv);
                let previous = history.sample(uv);
                current.lerp(previous, p.mix)
            }
            EffectParams::ColorShift(p) => {
                let rotated = hue_rotation(p.hue * 6.28318) * input.sample(uv).xyz();
                let luma = rotated.dot(Vec3::new(0.2126, 0.7152, 0.0722));
                Vec3::splat(luma).lerp(rotated, 1.0 + p.saturation).extend(1.0)
            }
            EffectParams::Posterize(p) => {
                let color = (input.sample(uv).xyz() * p.levels).floor() / p.levels;
                color.extend(1.0)
            }
            EffectParams::Solarize(p) => {
                let color = input.sample(uv).xyz();
                let inverted = Vec3::ONE - color;
                let mask = step(Vec3::splat(p.threshold), color);
                (color + (inverted - color) * mask).extend(1.0)
            }
            EffectParams::Blur(p) => {
                let texel = Vec2::ONE / ctx.resolution;
                let mut color = input.sample(uv).xyz() * 0.36;
                color += input.sample(uv + texel * p.amount).xyz() * 0.16;
                color += input.sample(uv - texel * p.amount).xyz() * 0.16;
                color += input.sample(uv + Vec2::new(texel.x, -texel.y) * p.amount).xyz() * 0.16;
                color += input.sample(uv + Vec2::new(-texel.x, texel.y) * p.amount).xyz() * 0.16;
                color.extend(1.0)
            }
            EffectParams::Sharpen(p) => {
                let texel = Vec2::ONE / ctx.resolution;
                let edge = p.amount * 0.25;
                let mut color = input.sample(uv).xyz() * (1.0 + p.amount);
                color -= input.sample(uv + Vec2::new(texel.x, 0.0)).xyz() * edge;
                color -= input.sample(uv - Vec2::new(texel.x, 0.0)).xyz() * edge;
                color -= input.sample(uv + Vec2::new(0.0, texel.y)).xyz() * edge;
                color -= input.sample(uv - Vec2::new(0.0, texel.y)).xyz() * edge;
                color.extend(1.0)
            }
            EffectParams::Ascii(p) => {
                let blocks = 20.0 + (80.0 - 20.0) * p.scale;
                let grid = (uv * blocks).floor() / blocks;
                let color = input.sample(grid).xyz();
                let luma = color.dot(Vec3::new(0.299, 0.587, 0.114));
                let lit = if luma >= 0.5 { 1.0 } else { 0.0 };
                Vec3::splat(0.05).lerp(color, lit).extend(1.0)
            }
            EffectParams::DoubleExposure(p) => {
                let current = input.sample(uv).xyz();
                let ghost = history.sample(uv).xyz();
                current.lerp(ghost, p.mix).extend(1.0)
            }
            EffectParams::Pixelate(p) => {
                let block_size = 0.005 + (0.06 - 0.005) * p.size;
                let grid = (uv / block_size).floor() * block_size;
                let noise = rand(grid + Vec2::splat(ctx.time));
                let offset = Vec2::splat(noise * p.jitter * block_size);
                input.sample(grid + offset).xyz().extend(1.0)
            }
        }
    }
}

/// Hash noise matching the WGSL `rand` helper.
pub fn rand(co: Vec2) -> f32 {
    let v = (co.dot(Vec2::new(12.9898, 78.233))).sin() * 43758.5453;
    v - v.floor()
}

fn step(edge: Vec3, x: Vec3) -> Vec3 {
    Vec3::select(x.cmpge(edge), Vec3::ONE, Vec3::ZERO)
}

fn hue_rotation(angle: f32) -> Mat3 {
    let s = angle.sin();
    let c = angle.cos();
    Mat3::from_cols(
        Vec3::new(0.213 + c * 0.787 - s * 0.213, 0.715 - c * 0.715 - s * 0.715, 0.072 - c * 0.072 + s * 0.928),
        Vec3::new(0.213 - c * 0.213 + s * 0.143, 0.715 + c * 0.285 + s * 0.14, 0.072 - c * 0.072 - s * 0.283),
        Vec3::new(0.213 - c * 0.213 - s * 0.787, 0.715 - c * 0.715 + s * 0.715, 0.072 + c * 0.928 + s * 0.072),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Same colour everywhere.
    struct Flat(Vec4);

    impl Texture for Flat {
        fn sample(&self, _uv: Vec2) -> Vec4 {
            self.0
        }
    }

    fn ctx() -> ShadeContext {
        ShadeContext { uv: Vec2::new(0.5, 0.5), resolution: Vec2::new(64.0, 64.0), time: 0.0 }
    }

    fn assert_close(actual: Vec4, expected: Vec4) {
        assert!(
            actual.abs_diff_eq(expected, 1e-5),
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn test_resolve_falls_back_to_schema_defaults() {
        let params = EffectParams::resolve(EffectKind::RgbShift, &ParamMap::new());
        assert_eq!(params, EffectParams::RgbShift(RgbShift { intensity: 0.35, offset: 0.004 }));

        let mut values = ParamMap::new();
        values.insert("offset".to_string(), 0.01);
        let params = EffectParams::resolve(EffectKind::RgbShift, &values);
        assert_eq!(params, EffectParams::RgbShift(RgbShift { intensity: 0.35, offset: 0.01 }));
    }

    #[test]
    fn test_resolve_keeps_out_of_range_values() {
        let mut values = ParamMap::new();
        values.insert("levels".to_string(), 40.0);
        let params = EffectParams::resolve(EffectKind::Posterize, &values);
        assert_eq!(params.pack(), [40.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_resolve_tags_every_kind() {
        for kind in EffectKind::ALL {
            let params = EffectParams::resolve(kind, &ParamMap::new());
            assert_eq!(params.kind(), kind);
            let packed = params.pack();
            for (slot, spec) in packed.iter().zip(kind.schema()) {
                assert_eq!(*slot, spec.default, "{kind}.{}", spec.name);
            }
        }
    }

    #[test]
    fn test_posterize_floors_to_levels() {
        let params = EffectParams::Posterize(Posterize { levels: 4.0 });
        let input = Flat(Vec4::new(0.3, 0.6, 0.99, 1.0));
        let out = params.shade(&input, &input, &ctx());
        assert_close(out, Vec4::new(0.25, 0.5, 0.75, 1.0));
    }

    #[test]
    fn test_solarize_inverts_above_threshold() {
        let params = EffectParams::Solarize(Solarize { threshold: 0.5 });
        let input = Flat(Vec4::new(0.2, 0.5, 0.8, 1.0));
        let out = params.shade(&input, &input, &ctx());
        assert_close(out, Vec4::new(0.2, 0.5, 0.2, 1.0));
    }

    #[test]
    fn test_history_blend_endpoints() {
        let current = Flat(Vec4::new(1.0, 0.0, 0.0, 1.0));
        let previous = Flat(Vec4::new(0.0, 0.0, 1.0, 1.0));
        let none = EffectParams::Trail(HistoryBlend { mix: 0.0 });
        let full = EffectParams::Trail(HistoryBlend { mix: 1.0 });
        assert_close(none.shade(&current, &previous, &ctx()), current.0);
        assert_close(full.shade(&current, &previous, &ctx()), previous.0);
    }

    #[test]
    fn test_zero_hue_rotation_is_identity() {
        let params = EffectParams::ColorShift(ColorShift { hue: 0.0, saturation: 0.0 });
        let input = Flat(Vec4::new(0.4, 0.7, 0.1, 1.0));
        let out = params.shade(&input, &input, &ctx());
        assert_close(out, input.0);
    }

    #[test]
    fn test_noise_only_brightens() {
        let params = EffectParams::DigitalNoise(DigitalNoise { intensity: 0.5, grain: 1.2 });
        let input = Flat(Vec4::new(0.2, 0.2, 0.2, 1.0));
        let out = params.shade(&input, &input, &ctx());
        assert!(out.x >= 0.2 && out.x <= 0.7);
        assert_eq!(out.x, out.y);
        assert_eq!(out.y, out.z);
    }

    #[test]
    fn test_rand_is_deterministic_and_unit_range() {
        for i in 0..100 {
            let co = Vec2::new(i as f32 * 0.37, i as f32 * 0.11);
            let v = rand(co);
            assert!((0.0..1.0).contains(&v));
            assert_eq!(v, rand(co));
        }
    }
}
