//! Video frame types and pixel format conversions.

use bytemuck::{Pod, Zeroable};

/// Pixel formats frames arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel)
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel)
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// A video frame containing image data.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format of the frame data
    pub format: PixelFormat,
    /// Timestamp in microseconds (if available)
    pub timestamp_us: Option<u64>,
    /// Raw pixel data, rows top to bottom
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Creates a black frame with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data: vec![0; size],
        }
    }

    /// Creates a video frame from existing data.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data,
        }
    }

    /// RGBA frame filled with a single colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat((width as usize) * (height as usize));
        Self::from_data(width, height, PixelFormat::Rgba, data)
    }

    /// RGBA frame whose pixels are produced by `f(x, y)`.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width as usize) * (height as usize) * 4);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self::from_data(width, height, PixelFormat::Rgba, data)
    }

    /// Whether `data` holds exactly one frame's worth of bytes.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == (self.width as usize) * (self.height as usize) * self.format.bytes_per_pixel()
    }

    /// RGBA value at `(x, y)`; `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let i = ((y as usize) * (self.width as usize) + x as usize) * bpp;
        let px = self.data.get(i..i + bpp)?;
        Some(match self.format {
            PixelFormat::Rgb => [px[0], px[1], px[2], 255],
            PixelFormat::Rgba => [px[0], px[1], px[2], px[3]],
        })
    }

    /// Converts this frame to RGBA format.
    pub fn to_rgba(&self) -> VideoFrame {
        if self.format == PixelFormat::Rgba {
            return self.clone();
        }

        let pixel_count = (self.width as usize) * (self.height as usize);
        let mut rgba_data = Vec::with_capacity(pixel_count * 4);
        for rgb in self.data.chunks_exact(3).take(pixel_count) {
            rgba_data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba,
            timestamp_us: self.timestamp_us,
            data: rgba_data,
        }
    }

    /// Resize to exactly `width` x `height`, converting to RGBA.
    pub fn resized(&self, width: u32, height: u32) -> Option<VideoFrame> {
        let rgba = self.to_rgba();
        if rgba.width == width && rgba.height == height {
            return Some(rgba);
        }
        let img = image::RgbaImage::from_raw(rgba.width, rgba.height, rgba.data)?;
        let resized = image::imageops::resize(&img, width, height, image::imageops::FilterType::Triangle);
        Some(VideoFrame {
            width,
            height,
            format: PixelFormat::Rgba,
            timestamp_us: self.timestamp_us,
            data: resized.into_raw(),
        })
    }

    /// The frame as an `image` buffer, for encoding to disk.
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        let rgba = self.to_rgba();
        image::RgbaImage::from_raw(rgba.width, rgba.height, rgba.data)
    }
}

/// Vertex for rendering a full-screen quad.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
}

impl QuadVertex {
    /// Vertices for a full-screen quad. Texture row 0 is the top of the image.
    pub const VERTICES: &'static [QuadVertex] = &[
        QuadVertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
        QuadVertex { position: [1.0, -1.0], tex_coords: [1.0, 1.0] },
        QuadVertex { position: [1.0, 1.0], tex_coords: [1.0, 0.0] },
        QuadVertex { position: [-1.0, 1.0], tex_coords: [0.0, 0.0] },
    ];

    /// Indices for the quad (two triangles).
    pub const INDICES: &'static [u16] = &[0, 1, 2, 2, 3, 0];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}
