use serde::{Deserialize, Serialize};
use thiserror::Error;

mod offscreen;
mod slot;

pub use offscreen::{
    CpuFrame, CpuPixelFormat, OffscreenSurface, SurfaceCanvas, TextureImage, WgpuBackend,
};
pub use slot::FrameSlot;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("WGPU error: {0}")]
    Wgpu(#[from] wgpu::Error),
    #[error("Request device error: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("No suitable adapter found")]
    NoAdapter,
    #[error("Buffer async error")]
    BufferAsync,
    #[error("Invalid surface size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("Image {width}x{height} exceeds surface {surface_width}x{surface_height}")]
    ImageOutOfBounds {
        width: u32,
        height: u32,
        surface_width: u32,
        surface_height: u32,
    },
    #[error("Image encode error: {0}")]
    Image(#[from] image::ImageError),
}

/// A GPU handle released by consuming it, so it cannot be touched afterwards.
pub trait Dispose {
    fn dispose(self);
}

/// Size of a render target in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Converts logical units to device pixels, rounding to the nearest pixel.
    pub fn from_logical(width: f32, height: f32, pixel_density: f32) -> Self {
        Self {
            width: (width * pixel_density).round() as u32,
            height: (height * pixel_density).round() as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Offscreen render target reused across frames.
pub trait RenderSurface {
    /// Drawing context handed to the draw routine.
    type Canvas;
    /// Texture-backed snapshot of the surface contents.
    type Image: Dispose;

    fn size(&self) -> SurfaceSize;

    /// Prepares the canvas for a new frame.
    fn begin_frame(&mut self) -> Result<&mut Self::Canvas, RendererError>;

    /// Submits everything recorded on the canvas since `begin_frame`.
    fn flush(&mut self);

    /// Materializes an image from the surface texture at `width`x`height`.
    fn make_image(&mut self, width: u32, height: u32) -> Result<Self::Image, RendererError>;
}

/// Allocates render surfaces.
pub trait RenderBackend {
    type Surface: RenderSurface;

    fn create_surface(&mut self, size: SurfaceSize) -> Result<Self::Surface, RendererError>;
}
