//! Static registry of effect kinds and their parameter schemas.

use std::fmt;

use super::wgsl;

/// Schema entry for one numeric effect parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl ParamSpec {
    const fn new(name: &'static str, default: f32, min: f32, max: f32, step: f32) -> Self {
        Self { name, default, min, max, step }
    }

    /// Integer-stepped parameters (e.g. posterize levels) are randomised and
    /// displayed as whole numbers.
    pub fn is_integer(&self) -> bool {
        self.step >= 1.0
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Every effect kind known to the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectKind {
    RgbShift,
    DigitalNoise,
    TimeEcho,
    Trail,
    ColorShift,
    Posterize,
    Solarize,
    Blur,
    Sharpen,
    Ascii,
    DoubleExposure,
    Pixelate,
}

const RGB_SHIFT: &[ParamSpec] = &[
    ParamSpec::new("intensity", 0.35, 0.0, 1.0, 0.01),
    ParamSpec::new("offset", 0.004, 0.001, 0.02, 0.001),
];
const DIGITAL_NOISE: &[ParamSpec] = &[
    ParamSpec::new("intensity", 0.3, 0.0, 1.0, 0.01),
    ParamSpec::new("grain", 1.2, 0.2, 3.0, 0.1),
];
const TIME_ECHO: &[ParamSpec] = &[ParamSpec::new("mix", 0.6, 0.0, 1.0, 0.01)];
const TRAIL: &[ParamSpec] = &[ParamSpec::new("mix", 0.55, 0.0, 1.0, 0.01)];
const COLOR_SHIFT: &[ParamSpec] = &[
    ParamSpec::new("hue", 0.2, 0.0, 1.0, 0.01),
    ParamSpec::new("saturation", 0.2, -1.0, 1.0, 0.01),
];
const POSTERIZE: &[ParamSpec] = &[ParamSpec::new("levels", 6.0, 2.0, 12.0, 1.0)];
const SOLARIZE: &[ParamSpec] = &[ParamSpec::new("threshold", 0.55, 0.0, 1.0, 0.01)];
const BLUR: &[ParamSpec] = &[ParamSpec::new("amount", 0.6, 0.0, 2.0, 0.05)];
const SHARPEN: &[ParamSpec] = &[ParamSpec::new("amount", 0.5, 0.0, 2.0, 0.05)];
const ASCII: &[ParamSpec] = &[ParamSpec::new("scale", 0.6, 0.2, 1.0, 0.05)];
const DOUBLE_EXPOSURE: &[ParamSpec] = &[ParamSpec::new("mix", 0.45, 0.0, 1.0, 0.01)];
const PIXELATE: &[ParamSpec] = &[
    ParamSpec::new("size", 0.015, 0.005, 0.05, 0.001),
    ParamSpec::new("jitter", 0.35, 0.0, 1.0, 0.01),
];

impl EffectKind {
    /// All kinds in catalog order.
    pub const ALL: [EffectKind; 12] = [
        EffectKind::RgbShift,
        EffectKind::DigitalNoise,
        EffectKind::TimeEcho,
        EffectKind::Trail,
        EffectKind::ColorShift,
        EffectKind::Posterize,
        EffectKind::Solarize,
        EffectKind::Blur,
        EffectKind::Sharpen,
        EffectKind::Ascii,
        EffectKind::DoubleExposure,
        EffectKind::Pixelate,
    ];

    /// Resolve a kind from its identifier string.
    pub fn lookup(id: &str) -> Option<EffectKind> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Stable identifier used in presets and configuration files.
    pub fn id(&self) -> &'static str {
        match self {
            EffectKind::RgbShift => "rgbShift",
            EffectKind::DigitalNoise => "digitalNoise",
            EffectKind::TimeEcho => "timeEcho",
            EffectKind::Trail => "trail",
            EffectKind::ColorShift => "colorShift",
            EffectKind::Posterize => "posterize",
            EffectKind::Solarize => "solarize",
            EffectKind::Blur => "blur",
            EffectKind::Sharpen => "sharpen",
            EffectKind::Ascii => "ascii",
            EffectKind::DoubleExposure => "doubleExposure",
            EffectKind::Pixelate => "pixelate",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            EffectKind::RgbShift => "RGB Shift",
            EffectKind::DigitalNoise => "Digital Noise",
            EffectKind::TimeEcho => "Time Echo",
            EffectKind::Trail => "Trails",
            EffectKind::ColorShift => "Hue Rotation",
            EffectKind::Posterize => "Posterize",
            EffectKind::Solarize => "Solarize",
            EffectKind::Blur => "Motion Blur",
            EffectKind::Sharpen => "Sharpen",
            EffectKind::Ascii => "ASCII Render",
            EffectKind::DoubleExposure => "Double Exposure",
            EffectKind::Pixelate => "Compression Artifacts",
        }
    }

    /// Parameter schema in uniform packing order.
    pub fn schema(&self) -> &'static [ParamSpec] {
        match self {
            EffectKind::RgbShift => RGB_SHIFT,
            EffectKind::DigitalNoise => DIGITAL_NOISE,
            EffectKind::TimeEcho => TIME_ECHO,
            EffectKind::Trail => TRAIL,
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

    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.schema().iter().find(|spec| spec.name == name)
    }

    /// Whether the kind samples the feedback (previous composite) surface.
    pub fn reads_history(&self) -> bool {
        matches!(
            self,
            EffectKind::TimeEcho | EffectKind::Trail | EffectKind::DoubleExposure
        )
    }

    /// Whether the kind animates with elapsed time.
    pub fn uses_time(&self) -> bool {
        matches!(self, EffectKind::DigitalNoise | EffectKind::Pixelate)
    }

    /// Complete WGSL module (shared prelude plus the kind's fragment stage).
    pub fn shader_source(&self) -> String {
        wgsl::module_source(*self)
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup_round_trips_every_id() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::lookup(kind.id()), Some(kind));
        }
        assert_eq!(EffectKind::lookup("vhsWobble"), None);
        assert_eq!(EffectKind::lookup("RGBSHIFT"), None);
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<_> = EffectKind::ALL.iter().map(|k| k.id()).collect();
        assert_eq!(ids.len(), EffectKind::ALL.len());
    }

    #[test]
    fn test_defaults_lie_within_schema_ranges() {
        for kind in EffectKind::ALL {
            assert!(!kind.schema().is_empty(), "{kind} has no parameters");
            assert!(kind.schema().len() <= 4, "{kind} overflows the uniform slot");
            for spec in kind.schema() {
                assert!(spec.min < spec.max, "{kind}.{}", spec.name);
                assert!(spec.contains(spec.default), "{kind}.{} default out of range", spec.name);
                assert!(spec.step > 0.0);
            }
        }
    }

    #[test]
    fn test_only_posterize_is_integer_stepped() {
        let integer: Vec<_> = EffectKind::ALL
            .iter()
            .flat_map(|k| k.schema().iter().map(move |s| (*k, s)))
            .filter(|(_, s)| s.is_integer())
            .map(|(k, s)| (k, s.name))
            .collect();
        assert_eq!(integer, vec![(EffectKind::Posterize, "levels")]);
    }

    #[test]
    fn test_param_lookup() {
        let spec = EffectKind::RgbShift.param("offset").unwrap();
        assert_eq!(spec.default, 0.004);
        assert!(EffectKind::RgbShift.param("mix").is_none());
    }
}
