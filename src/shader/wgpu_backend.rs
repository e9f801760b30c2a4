//! wgpu render backend.

use super::{GpuContext, PassUniforms, RenderBackend, RenderError};
use crate::effect::{wgsl, EffectKind};
use crate::frame::{PixelFormat, QuadVertex, VideoFrame};
use anyhow::Result;
use bytemuck::Zeroable;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::borrow::Cow;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Uniform block shared by every effect program.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Uniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub pad: f32,
    pub params: [f32; 4],
}

impl From<&PassUniforms> for Uniforms {
    fn from(pass: &PassUniforms) -> Self {
        Self {
            resolution: pass.resolution.to_array(),
            time: pass.time,
            pad: 0.0,
            params: pass.params.pack(),
        }
    }
}

/// Render target texture with its default view.
pub struct GpuSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// One effect instance's pipeline and uniform buffer.
pub struct GpuProgram {
    kind: EffectKind,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
}

/// Effect passes on a headless wgpu device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    blit_pipeline: wgpu::RenderPipeline,
    blit_uniforms: wgpu::Buffer,
}

impl WgpuBackend {
    /// Backend on its own offscreen device.
    pub fn headless() -> Result<Self> {
        let context = GpuContext::headless()?;
        Ok(Self::new(context.device, context.queue)?)
    }

    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Result<Self, RenderError> {
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        // 0 input, 1 sampler, 2 uniforms, 3 history
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Effect Bind Group Layout"),
            entries: &[
                texture_entry(0),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(3),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Effect Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Index Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Effect Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let (blit_pipeline, blit_uniforms) = Self::build_pipeline(&device, &pipeline_layout, "Blit", wgsl::passthrough_source())
            .map_err(|reason| RenderError::ProgramCreation { kind: "passthrough", reason })?;

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            pipeline_layout,
            vertex_buffer,
            index_buffer,
            sampler,
            blit_pipeline,
            blit_uniforms,
        })
    }

    /// Parse and validate WGSL before handing it to the device, so a broken
    /// module becomes an error instead of a device-lost panic.
    fn validate(source: &str) -> Result<(), String> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        validator.validate(&module).map_err(|e| format!("{:?}", e))?;
        Ok(())
    }

    fn build_pipeline(
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        label: &str,
        source: String,
    ) -> Result<(wgpu::RenderPipeline, wgpu::Buffer), String> {
        Self::validate(&source)?;

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[QuadVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: SURFACE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&[Uniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Ok((pipeline, uniform_buffer))
    }

    /// Draw the full-screen quad with `pipeline` into `output`.
    #[allow(clippy::too_many_arguments)]
    fn draw(
        &self,
        pipeline: &wgpu::RenderPipeline,
        uniform_buffer: &wgpu::Buffer,
        uniforms: Uniforms,
        input: &GpuSurface,
        history: &GpuSurface,
        output: &GpuSurface,
        label: &str,
    ) {
        self.queue.write_buffer(uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&input.view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: uniform_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(&history.view) },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output.view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: wgpu::StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            render_pass.draw_indexed(0..QuadVertex::INDICES.len() as u32, 0, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn extent(width: u32, height: u32) -> wgpu::Extent3d {
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 }
    }
}

impl RenderBackend for WgpuBackend {
    type Surface = GpuSurface;
    type Program = GpuProgram;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_surface(&mut self, width: u32, height: u32, label: &str) -> Result<GpuSurface, RenderError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::SurfaceAllocation {
                label: label.to_string(),
                width,
                height,
                reason: format!("device supports 1..={} per side", max),
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: Self::extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SURFACE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Clear to opaque black so the first frame's history is defined.
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: wgpu::StoreOp::Store },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        self.queue.submit(std::iter::once(encoder.finish()));

        debug!("Created {}x{} surface '{}'", width, height, label);
        Ok(GpuSurface { texture, view, width, height })
    }

    fn surface_size(&self, surface: &GpuSurface) -> (u32, u32) {
        (surface.width, surface.height)
    }

    fn compile_program(&mut self, kind: EffectKind) -> Result<GpuProgram, RenderError> {
        let (pipeline, uniform_buffer) =
            Self::build_pipeline(&self.device, &self.pipeline_layout, kind.id(), kind.shader_source())
                .map_err(|reason| RenderError::ProgramCreation { kind: kind.id(), reason })?;
        info!("Built render pipeline for {}", kind.display_name());
        Ok(GpuProgram { kind, pipeline, uniform_buffer })
    }

    fn upload_frame(&mut self, frame: &VideoFrame, target: &mut GpuSurface) -> Result<(), RenderError> {
        if (frame.width, frame.height) != (target.width, target.height) {
            return Err(RenderError::SizeMismatch {
                frame_width: frame.width,
                frame_height: frame.height,
                surface_width: target.width,
                surface_height: target.height,
            });
        }
        let rgba = frame.to_rgba();
        self.queue.write_texture(
            target.texture.as_image_copy(),
            &rgba.data,
            wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(rgba.width * 4), rows_per_image: Some(rgba.height) },
            Self::extent(rgba.width, rgba.height),
        );
        Ok(())
    }

    fn execute_pass(
        &mut self,
        program: &GpuProgram,
        uniforms: &PassUniforms,
        input: &GpuSurface,
        history: &GpuSurface,
        output: &mut GpuSurface,
    ) -> Result<(), RenderError> {
        if uniforms.params.kind() != program.kind {
            return Err(RenderError::ProgramCreation {
                kind: program.kind.id(),
                reason: format!("bound to {} parameters", uniforms.params.kind()),
            });
        }
        self.draw(
            &program.pipeline,
            &program.uniform_buffer,
            Uniforms::from(uniforms),
            input,
            history,
            output,
            program.kind.id(),
        );
        Ok(())
    }

    fn blit(&mut self, source: &GpuSurface, target: &mut GpuSurface) -> Result<(), RenderError> {
        if (source.width, source.height) == (target.width, target.height) {
            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Copy") });
            encoder.copy_texture_to_texture(
                source.texture.as_image_copy(),
                target.texture.as_image_copy(),
                Self::extent(source.width, source.height),
            );
            self.queue.submit(std::iter::once(encoder.finish()));
        } else {
            let uniforms = Uniforms {
                resolution: [target.width as f32, target.height as f32],
                time: 0.0,
                pad: 0.0,
                params: [0.0; 4],
            };
            self.draw(&self.blit_pipeline, &self.blit_uniforms, uniforms, source, source, target, "Blit");
        }
        Ok(())
    }

    fn read_back(&mut self, surface: &GpuSurface) -> Result<VideoFrame, RenderError> {
        let unpadded = surface.width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded * surface.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback") });
        encoder.copy_texture_to_buffer(
            surface.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(padded), rows_per_image: Some(surface.height) },
            },
            Self::extent(surface.width, surface.height),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
            .map_err(|e| RenderError::Readback(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let mut data = Vec::with_capacity((unpadded * surface.height) as usize);
        {
            let mapped = buffer_slice.get_mapped_range();
            for row in mapped.chunks_exact(padded as usize) {
                data.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();

        Ok(VideoFrame::from_data(surface.width, surface.height, PixelFormat::Rgba, data))
    }
}
