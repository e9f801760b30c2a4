//! Effect-chain rendering: backends, program cache, buffers and the compositor.

mod buffers;
mod compositor;
mod cpu;
mod gpu_context;
mod program_cache;
mod wgpu_backend;

pub use buffers::{BufferManager, PassTargets};
pub use compositor::Compositor;
pub use cpu::{CpuBackend, CpuSurface};
pub use gpu_context::GpuContext;
pub use program_cache::{CompiledProgram, ProgramCache};
pub use wgpu_backend::{GpuProgram, GpuSurface, WgpuBackend};

use crate::effect::{EffectKind, EffectParams};
use crate::frame::VideoFrame;
use glam::Vec2;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to allocate {width}x{height} surface '{label}': {reason}")]
    SurfaceAllocation {
        label: String,
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("failed to build program for '{kind}': {reason}")]
    ProgramCreation { kind: &'static str, reason: String },
    #[error("frame is {frame_width}x{frame_height} but the surface is {surface_width}x{surface_height}")]
    SizeMismatch {
        frame_width: u32,
        frame_height: u32,
        surface_width: u32,
        surface_height: u32,
    },
    #[error("{width}x{height} frame carries {len} bytes")]
    MalformedFrame { width: u32, height: u32, len: usize },
    #[error("no render surfaces allocated; resize the compositor first")]
    NotSized,
    #[error("readback failed: {0}")]
    Readback(String),
}

/// Per-pass inputs bound next to the two textures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassUniforms {
    pub resolution: Vec2,
    pub time: f32,
    pub params: EffectParams,
}

/// A place effect passes can run.
///
/// Surfaces are 2D RGBA buffers that can be both rendered to and sampled.
/// Programs are compiled once per effect instance and reused every frame.
pub trait RenderBackend {
    type Surface;
    type Program;

    fn name(&self) -> &'static str;

    /// Allocate a surface cleared to opaque black.
    fn create_surface(&mut self, width: u32, height: u32, label: &str) -> Result<Self::Surface, RenderError>;

    fn surface_size(&self, surface: &Self::Surface) -> (u32, u32);

    fn compile_program(&mut self, kind: EffectKind) -> Result<Self::Program, RenderError>;

    /// Copy a frame of exactly the surface's size into it.
    fn upload_frame(&mut self, frame: &VideoFrame, target: &mut Self::Surface) -> Result<(), RenderError>;

    /// Run one effect pass: sample `input` and `history`, write every pixel of `output`.
    fn execute_pass(
        &mut self,
        program: &Self::Program,
        uniforms: &PassUniforms,
        input: &Self::Surface,
        history: &Self::Surface,
        output: &mut Self::Surface,
    ) -> Result<(), RenderError>;

    /// Copy `source` into `target`, resampling when the sizes differ.
    fn blit(&mut self, source: &Self::Surface, target: &mut Self::Surface) -> Result<(), RenderError>;

    fn read_back(&mut self, surface: &Self::Surface) -> Result<VideoFrame, RenderError>;
}
