//! Ping-pong and feedback surfaces sized to the viewport.

use super::{RenderBackend, RenderError};

struct SurfaceSet<S> {
    ping_pong: [S; 2],
    read: usize,
    feedback: S,
    width: u32,
    height: u32,
}

/// Surfaces for one pass: the previous pass's output, the surface to
/// render into and last frame's composite.
pub struct PassTargets<'a, S> {
    pub read: &'a S,
    pub write: &'a mut S,
    pub history: &'a S,
}

/// Owns the three render surfaces.
///
/// Resizes are requests; they take effect in [`BufferManager::apply_pending`],
/// which the compositor calls only at a frame boundary. All three surfaces are
/// replaced together or not at all.
pub struct BufferManager<S> {
    surfaces: Option<SurfaceSet<S>>,
    pending: Option<(u32, u32)>,
}

impl<S> Default for BufferManager<S> {
    fn default() -> Self {
        Self { surfaces: None, pending: None }
    }
}

impl<S> BufferManager<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the allocated surfaces, if any.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.surfaces.as_ref().map(|set| (set.width, set.height))
    }

    pub fn pending(&self) -> Option<(u32, u32)> {
        self.pending
    }

    /// Request new surface dimensions. Returns whether anything will change.
    /// Zero-sized requests (a minimised window) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        if self.size() == Some((width, height)) {
            self.pending = None;
            return false;
        }
        if self.pending == Some((width, height)) {
            return false;
        }
        self.pending = Some((width, height));
        true
    }

    /// Reallocate for a pending resize. Feedback history is not carried over.
    /// On failure the previous surfaces and the request are both kept, so the
    /// next frame retries.
    pub fn apply_pending<B>(&mut self, backend: &mut B) -> Result<bool, RenderError>
    where
        B: RenderBackend<Surface = S>,
    {
        let Some((width, height)) = self.pending else {
            return Ok(false);
        };
        let ping = backend.create_surface(width, height, "ping")?;
        let pong = backend.create_surface(width, height, "pong")?;
        let feedback = backend.create_surface(width, height, "feedback")?;

        self.surfaces = Some(SurfaceSet { ping_pong: [ping, pong], read: 0, feedback, width, height });
        self.pending = None;
        tracing::info!("Allocated render surfaces at {}x{}", width, height);
        Ok(true)
    }

    fn set(&self) -> Result<&SurfaceSet<S>, RenderError> {
        self.surfaces.as_ref().ok_or(RenderError::NotSized)
    }

    fn set_mut(&mut self) -> Result<&mut SurfaceSet<S>, RenderError> {
        self.surfaces.as_mut().ok_or(RenderError::NotSized)
    }

    pub fn acquire_ping_pong(&mut self) -> Result<PassTargets<'_, S>, RenderError> {
        let set = self.set_mut()?;
        let [a, b] = &mut set.ping_pong;
        let (read, write) = if set.read == 0 { (&*a, b) } else { (&*b, a) };
        Ok(PassTargets { read, write, history: &set.feedback })
    }

    /// Make the surface just written the next pass's input.
    pub fn swap(&mut self) {
        if let Some(set) = self.surfaces.as_mut() {
            set.read = 1 - set.read;
        }
    }

    /// Current pass input; after the last pass, the frame's composite.
    pub fn read_surface(&self) -> Result<&S, RenderError> {
        let set = self.set()?;
        Ok(&set.ping_pong[set.read])
    }

    pub fn read_surface_mut(&mut self) -> Result<&mut S, RenderError> {
        let set = self.set_mut()?;
        Ok(&mut set.ping_pong[set.read])
    }

    pub fn feedback_surface(&self) -> Result<&S, RenderError> {
        Ok(&self.set()?.feedback)
    }

    /// Copy the current read surface (the composite) into the feedback surface.
    pub fn commit_feedback<B>(&mut self, backend: &mut B) -> Result<(), RenderError>
    where
        B: RenderBackend<Surface = S>,
    {
        let set = self.set_mut()?;
        let composite = &set.ping_pong[set.read];
        backend.blit(composite, &mut set.feedback)
    }
}
