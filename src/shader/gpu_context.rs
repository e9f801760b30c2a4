//! Shared GPU context for wgpu resources.

use std::sync::Arc;
use anyhow::{anyhow, Result};
use winit::window::Window;

/// Device and queue plus the adapter they came from.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
}

impl GpuContext {
    /// Context for offscreen rendering.
    pub fn headless() -> Result<Self> {
        let instance = Self::create_instance();
        Self::with_adapter(instance, None)
    }

    /// Context whose adapter can present to `window`, plus the window's surface.
    pub fn for_window(window: &Arc<Window>) -> Result<(Self, wgpu::Surface<'static>)> {
        let instance = Self::create_instance();
        let surface = instance.create_surface(window.clone())?;
        let context = Self::with_adapter(instance, Some(&surface))?;
        Ok((context, surface))
    }

    fn create_instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    }

    fn with_adapter(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        }))
        .map_err(|e| anyhow!("Failed to obtain GPU adapter: {:?}", e))?;

        tracing::info!("Using GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Afterimage Device"),
                required_features: wgpu::Features::empty(),
                required_limits: if surface.is_some() {
                    wgpu::Limits::default()
                } else {
                    wgpu::Limits::downlevel_defaults()
                },
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            },
        ))?;

        Ok(Self {
            device,
            queue,
            instance,
            adapter,
        })
    }
}
