use std::path::Path;
use std::sync::mpsc::{channel, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span, instrument};

use crate::{Dispose, RenderBackend, RenderSurface, RendererError, SurfaceSize};

const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Allocates offscreen surfaces on a shared wgpu device.
#[derive(Clone)]
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Creates a backend on a device of its own, without a presentation surface.
    pub async fn headless() -> Result<Self, RendererError> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RendererError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("offscreen.device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        info!(adapter = ?adapter.get_info().name, "offscreen backend initialized");
        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }
}

impl RenderBackend for WgpuBackend {
    type Surface = OffscreenSurface;

    #[instrument(
        name = "offscreen.create_surface",
        skip_all,
        fields(width = size.width, height = size.height)
    )]
    fn create_surface(&mut self, size: SurfaceSize) -> Result<OffscreenSurface, RendererError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if size.is_empty() || size.width > max || size.height > max {
            return Err(RendererError::InvalidSize {
                width: size.width,
                height: size.height,
            });
        }

        let texture = capture_errors(&self.device, || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("offscreen.render-target"),
                size: extent(size),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        debug!("offscreen surface allocated");
        Ok(OffscreenSurface {
            canvas: SurfaceCanvas {
                device: Arc::clone(&self.device),
                queue: Arc::clone(&self.queue),
                texture,
                view,
                encoder: None,
                size,
            },
        })
    }
}

/// Drawing context over the offscreen render target.
///
/// Draw routines record into `encoder()` against `view()`; the recorded work
/// is submitted when the surface is flushed.
pub struct SurfaceCanvas {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    encoder: Option<wgpu::CommandEncoder>,
    size: SurfaceSize,
}

impl SurfaceCanvas {
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        TARGET_FORMAT
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("offscreen.frame-encoder"),
                })
        })
    }

    /// Records a pass clearing the whole target to `color`.
    pub fn clear(&mut self, color: wgpu::Color) {
        let view = &self.view;
        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("offscreen.frame-encoder"),
                })
        });
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("offscreen.clear-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(color),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }
}

/// Offscreen render target created once and reused for every frame.
pub struct OffscreenSurface {
    canvas: SurfaceCanvas,
}

impl OffscreenSurface {
    pub fn canvas(&self) -> &SurfaceCanvas {
        &self.canvas
    }
}

impl RenderSurface for OffscreenSurface {
    type Canvas = SurfaceCanvas;
    type Image = TextureImage;

    fn size(&self) -> SurfaceSize {
        self.canvas.size
    }

    fn begin_frame(&mut self) -> Result<&mut SurfaceCanvas, RendererError> {
        // Work left over from a frame that never reached flush is discarded.
        self.canvas.encoder = None;
        Ok(&mut self.canvas)
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.canvas.encoder.take() {
            self.canvas.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn make_image(&mut self, width: u32, height: u32) -> Result<TextureImage, RendererError> {
        let surface = self.canvas.size;
        if width == 0 || height == 0 || width > surface.width || height > surface.height {
            return Err(RendererError::ImageOutOfBounds {
                width,
                height,
                surface_width: surface.width,
                surface_height: surface.height,
            });
        }

        let size = SurfaceSize::new(width, height);
        let canvas = &self.canvas;
        let texture = capture_errors(&canvas.device, || {
            let texture = canvas.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("offscreen.published-image"),
                size: extent(size),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let mut encoder = canvas
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("offscreen.snapshot-encoder"),
                });
            encoder.copy_texture_to_texture(
                wgpu::ImageCopyTexture {
                    texture: &canvas.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                extent(size),
            );
            canvas.queue.submit(std::iter::once(encoder.finish()));
            texture
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(TextureImage {
            texture,
            view,
            size,
        })
    }
}

/// Texture-backed snapshot of one rendered frame.
pub struct TextureImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: SurfaceSize,
}

impl TextureImage {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    /// Copies the image back to host memory.
    #[instrument(
        name = "offscreen.readback",
        skip_all,
        fields(width = self.size.width, height = self.size.height)
    )]
    pub fn read_pixels(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<CpuFrame, RendererError> {
        let SurfaceSize { width, height } = self.size;
        let row_pitch = align_to(width * 4, COPY_ALIGNMENT);
        let buffer_size = row_pitch as u64 * height as u64;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen.readback-staging"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("offscreen.readback-encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(row_pitch),
                    rows_per_image: Some(height),
                },
            },
            extent(self.size),
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        {
            let _span = info_span!("offscreen.readback.map").entered();
            loop {
                match rx.try_recv() {
                    Ok(Ok(())) => break,
                    Ok(Err(_)) => return Err(RendererError::BufferAsync),
                    Err(TryRecvError::Empty) => {
                        let _ = device.poll(wgpu::Maintain::Poll);
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(TryRecvError::Disconnected) => return Err(RendererError::BufferAsync),
                }
            }
        }

        let mapped = slice.get_mapped_range();
        let row_stride = width as usize * 4;
        let mut pixels = vec![0u8; row_stride * height as usize];
        for row in 0..height as usize {
            let src_offset = row * row_pitch as usize;
            let dst_offset = row * row_stride;
            pixels[dst_offset..dst_offset + row_stride]
                .copy_from_slice(&mapped[src_offset..src_offset + row_stride]);
        }
        drop(mapped);
        staging.unmap();

        Ok(CpuFrame {
            pixels,
            width,
            height,
            bytes_per_row: width * 4,
            format: CpuPixelFormat::Rgba8,
        })
    }
}

impl Dispose for TextureImage {
    fn dispose(self) {
        self.texture.destroy();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuPixelFormat {
    Rgba8,
}

#[derive(Debug, Clone)]
pub struct CpuFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub format: CpuPixelFormat,
}

impl CpuFrame {
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), RendererError> {
        image::save_buffer_with_format(
            path,
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
            image::ImageFormat::Png,
        )?;
        Ok(())
    }
}

/// Runs `f` inside validation and out-of-memory error scopes and reports the
/// first error raised by the device.
fn capture_errors<R>(device: &wgpu::Device, f: impl FnOnce() -> R) -> Result<R, RendererError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    match validation.or(out_of_memory) {
        Some(err) => Err(err.into()),
        None => Ok(value),
    }
}

fn extent(size: SurfaceSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    if value == 0 {
        return alignment;
    }
    ((value + alignment - 1) / alignment) * alignment
}
