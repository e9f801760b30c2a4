//! Software render backend.
//!
//! Evaluates each kind's per-pixel function directly. Slow, but exact and
//! deterministic, which makes it the backend the compositor is tested with.

use super::{PassUniforms, RenderBackend, RenderError};
use crate::effect::{EffectKind, ShadeContext, Texture};
use crate::frame::{PixelFormat, VideoFrame};
use glam::{Vec2, Vec4};

/// Float RGBA surface, rows top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuSurface {
    width: u32,
    height: u32,
    texels: Vec<Vec4>,
}

impl CpuSurface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![Vec4::new(0.0, 0.0, 0.0, 1.0); (width as usize) * (height as usize)],
        }
    }

    fn texel(&self, x: i64, y: i64) -> Vec4 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.texels[y * self.width as usize + x]
    }
}

impl Texture for CpuSurface {
    /// Bilinear filtering with clamp-to-edge addressing. Texel centres sit at
    /// `(i + 0.5) / size`, so sampling at a centre returns that texel exactly.
    fn sample(&self, uv: Vec2) -> Vec4 {
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let bottom = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }
}

/// Per-pixel shading on the CPU.
#[derive(Debug, Default)]
pub struct CpuBackend {
    max_dimension: Option<u32>,
    programs_compiled: usize,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse surfaces larger than `max` on either side, like a GPU texture limit.
    pub fn with_max_dimension(max: u32) -> Self {
        Self { max_dimension: Some(max), ..Self::default() }
    }

    pub fn set_max_dimension(&mut self, max: Option<u32>) {
        self.max_dimension = max;
    }

    /// Number of programs built so far.
    pub fn programs_compiled(&self) -> usize {
        self.programs_compiled
    }

    fn render(output: &mut CpuSurface, mut shade: impl FnMut(Vec2) -> Vec4) {
        let (w, h) = (output.width as usize, output.height as usize);
        for y in 0..h {
            for x in 0..w {
                let uv = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
                output.texels[y * w + x] = shade(uv).clamp(Vec4::ZERO, Vec4::ONE);
            }
        }
    }
}

impl RenderBackend for CpuBackend {
    type Surface = CpuSurface;
    type Program = EffectKind;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn create_surface(&mut self, width: u32, height: u32, label: &str) -> Result<CpuSurface, RenderError> {
        let too_large = self.max_dimension.is_some_and(|max| width > max || height > max);
        if width == 0 || height == 0 || too_large {
            return Err(RenderError::SurfaceAllocation {
                label: label.to_string(),
                width,
                height,
                reason: "dimensions outside the supported range".to_string(),
            });
        }
        Ok(CpuSurface::new(width, height))
    }

    fn surface_size(&self, surface: &CpuSurface) -> (u32, u32) {
        (surface.width, surface.height)
    }

    fn compile_program(&mut self, kind: EffectKind) -> Result<EffectKind, RenderError> {
        self.programs_compiled += 1;
        Ok(kind)
    }

    fn upload_frame(&mut self, frame: &VideoFrame, target: &mut CpuSurface) -> Result<(), RenderError> {
        if (frame.width, frame.height) != (target.width, target.height) {
            return Err(RenderError::SizeMismatch {
                frame_width: frame.width,
                frame_height: frame.height,
                surface_width: target.width,
                surface_height: target.height,
            });
        }
        let rgba = frame.to_rgba();
        for (texel, px) in target.texels.iter_mut().zip(rgba.data.chunks_exact(4)) {
            *texel = Vec4::new(px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32) / 255.0;
        }
        Ok(())
    }

    fn execute_pass(
        &mut self,
        program: &EffectKind,
        uniforms: &PassUniforms,
        input: &CpuSurface,
        history: &CpuSurface,
        output: &mut CpuSurface,
    ) -> Result<(), RenderError> {
        if uniforms.params.kind() != *program {
            return Err(RenderError::ProgramCreation {
                kind: program.id(),
                reason: format!("bound to {} parameters", uniforms.params.kind()),
            });
        }
        Self::render(output, |uv| {
            let ctx = ShadeContext { uv, resolution: uniforms.resolution, time: uniforms.time };
            uniforms.params.shade(input, history, &ctx)
        });
        Ok(())
    }

    fn blit(&mut self, source: &CpuSurface, target: &mut CpuSurface) -> Result<(), RenderError> {
        if (source.width, source.height) == (target.width, target.height) {
            target.texels.copy_from_slice(&source.texels);
        } else {
            Self::render(target, |uv| source.sample(uv));
        }
        Ok(())
    }

    fn read_back(&mut self, surface: &CpuSurface) -> Result<VideoFrame, RenderError> {
        let data = surface
            .texels
            .iter()
            .flat_map(|t| (t.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round().to_array())
            .map(|c| c as u8)
            .collect();
        Ok(VideoFrame::from_data(surface.width, surface.height, PixelFormat::Rgba, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_read_back_is_lossless() {
        let mut backend = CpuBackend::new();
        let frame = VideoFrame::from_fn(5, 3, |x, y| [x as u8 * 50, y as u8 * 100, 7, 255]);
        let mut surface = backend.create_surface(5, 3, "test").unwrap();
        backend.upload_frame(&frame, &mut surface).unwrap();
        assert_eq!(backend.read_back(&surface).unwrap(), frame);
    }

    #[test]
    fn test_new_surfaces_are_opaque_black() {
        let mut backend = CpuBackend::new();
        let surface = backend.create_surface(2, 2, "black").unwrap();
        let frame = backend.read_back(&surface).unwrap();
        assert!(frame.data.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn test_sampling_at_texel_centres_is_exact() {
        let mut backend = CpuBackend::new();
        let frame = VideoFrame::from_fn(4, 4, |x, y| [(x * 60) as u8, (y * 60) as u8, 0, 255]);
        let mut surface = backend.create_surface(4, 4, "s").unwrap();
        backend.upload_frame(&frame, &mut surface).unwrap();

        let c = surface.sample(Vec2::new(2.5 / 4.0, 1.5 / 4.0));
        assert!((c.x - 120.0 / 255.0).abs() < 1e-6);
        assert!((c.y - 60.0 / 255.0).abs() < 1e-6);

        // Halfway between two texels.
        let mid = surface.sample(Vec2::new(2.0 / 4.0, 1.5 / 4.0));
        assert!((mid.x - 90.0 / 255.0).abs() < 1e-6);

        // Clamped beyond the edge.
        let edge = surface.sample(Vec2::new(1.5, -0.5));
        assert!((edge.x - 180.0 / 255.0).abs() < 1e-6);
        assert_eq!(edge.y, 0.0);
    }

    #[test]
    fn test_upload_rejects_mismatched_size() {
        let mut backend = CpuBackend::new();
        let mut surface = backend.create_surface(4, 4, "s").unwrap();
        let frame = VideoFrame::solid(3, 4, [1, 2, 3, 255]);
        assert!(matches!(
            backend.upload_frame(&frame, &mut surface),
            Err(RenderError::SizeMismatch { frame_width: 3, .. })
        ));
    }

    #[test]
    fn test_allocation_limit() {
        let mut backend = CpuBackend::with_max_dimension(16);
        assert!(backend.create_surface(16, 16, "ok").is_ok());
        assert!(matches!(
            backend.create_surface(17, 4, "big"),
            Err(RenderError::SurfaceAllocation { width: 17, .. })
        ));
        assert!(backend.create_surface(0, 4, "empty").is_err());
    }

    #[test]
    fn test_blit_resamples_solid_colour() {
        let mut backend = CpuBackend::new();
        let mut small = backend.create_surface(2, 2, "small").unwrap();
        backend.upload_frame(&VideoFrame::solid(2, 2, [40, 80, 120, 255]), &mut small).unwrap();
        let mut large = backend.create_surface(6, 3, "large").unwrap();
        backend.blit(&small, &mut large).unwrap();
        let frame = backend.read_back(&large).unwrap();
        assert!(frame.data.chunks_exact(4).all(|px| px == [40, 80, 120, 255]));
    }
}
