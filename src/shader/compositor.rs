//! Per-frame execution of the effect chain.

use std::collections::HashSet;
use std::time::Instant;

use glam::Vec2;
use tracing::{debug, warn};

use super::{BufferManager, PassUniforms, ProgramCache, RenderBackend, RenderError};
use crate::effect::{Chain, InstanceId};
use crate::frame::VideoFrame;
use crate::utils::FrameClock;

/// Runs a chain over a source frame and keeps the feedback history.
///
/// Each compositor owns its own buffers and program cache, so several can
/// run side by side.
pub struct Compositor<B: RenderBackend> {
    backend: B,
    buffers: BufferManager<B::Surface>,
    programs: ProgramCache<B::Program>,
    source: Option<B::Surface>,
    clock: FrameClock,
    unresolved: HashSet<InstanceId>,
}

impl<B: RenderBackend> Compositor<B> {
    /// The first frame allocates `width` x `height` surfaces.
    pub fn new(backend: B, width: u32, height: u32) -> Self {
        let mut buffers = BufferManager::new();
        buffers.resize(width, height);
        Self {
            backend,
            buffers,
            programs: ProgramCache::new(),
            source: None,
            clock: FrameClock::default(),
            unresolved: HashSet::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Request a new viewport. Applied before the next frame renders; a
    /// repeated request for the current size changes nothing.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        let changed = self.buffers.resize(width, height);
        if changed {
            debug!("Viewport resize to {}x{} queued", width, height);
        }
        changed
    }

    /// Size the last frame rendered at.
    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.buffers.size()
    }

    pub fn fps(&self) -> f32 {
        self.clock.fps()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.clock.total_frames()
    }

    pub fn cached_programs(&self) -> usize {
        self.programs.len()
    }

    /// Render one frame.
    ///
    /// On error nothing is committed: the feedback surface still holds the
    /// previous composite and the caller keeps presenting its last frame.
    /// The next call retries from scratch.
    pub fn render_frame(
        &mut self,
        chain: &Chain,
        source: &VideoFrame,
        elapsed: f32,
    ) -> Result<VideoFrame, RenderError> {
        let start = Instant::now();
        self.buffers.apply_pending(&mut self.backend)?;
        let (width, height) = self.buffers.size().ok_or(RenderError::NotSized)?;

        let evicted = self.programs.retain_live(chain);
        if evicted > 0 {
            debug!("Released {} cached program(s)", evicted);
        }
        self.unresolved.retain(|id| chain.position(*id).is_some());

        self.load_source(source)?;

        let resolution = Vec2::new(width as f32, height as f32);
        for instance in chain.iter() {
            let Some(kind) = instance.kind() else {
                if self.unresolved.insert(instance.id()) {
                    warn!(
                        "Skipping effect {} of unknown kind '{}'; its input passes through",
                        instance.id(),
                        instance.kind_id()
                    );
                }
                continue;
            };

            let compiled = self.programs.get_or_create(&mut self.backend, instance, kind)?;
            let uniforms = PassUniforms { resolution, time: elapsed, params: *compiled.params() };
            let targets = self.buffers.acquire_ping_pong()?;
            self.backend
                .execute_pass(compiled.program(), &uniforms, targets.read, targets.history, targets.write)?;
            self.buffers.swap();
        }

        let composite = self.backend.read_back(self.buffers.read_surface()?)?;
        self.buffers.commit_feedback(&mut self.backend)?;

        if let Some(fps) = self.clock.tick(elapsed) {
            debug!(
                "[Perf] {} backend: {:.1} fps, {} pass(es), last frame {:?}",
                self.backend.name(),
                fps,
                chain.len(),
                start.elapsed()
            );
        }
        Ok(composite)
    }

    /// Current contents of the feedback surface.
    pub fn read_feedback(&mut self) -> Result<VideoFrame, RenderError> {
        self.backend.read_back(self.buffers.feedback_surface()?)
    }

    /// Upload the source at its own size, then resample it into the first
    /// pass's input.
    fn load_source(&mut self, frame: &VideoFrame) -> Result<(), RenderError> {
        if !frame.is_well_formed() || frame.width == 0 || frame.height == 0 {
            return Err(RenderError::MalformedFrame {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
            });
        }
        let size = (frame.width, frame.height);
        let surface = match self.source.take() {
            Some(surface) if self.backend.surface_size(&surface) == size => surface,
            _ => self.backend.create_surface(frame.width, frame.height, "source")?,
        };
        let surface = self.source.insert(surface);
        self.backend.upload_frame(frame, surface)?;
        self.backend.blit(surface, self.buffers.read_surface_mut()?)
    }
}
