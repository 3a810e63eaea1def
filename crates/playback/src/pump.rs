use std::sync::Arc;

use composition_engine::CompositionEngine;
use renderer::{FrameSlot, RenderBackend, RenderSurface, SurfaceSize};
use tracing::{debug, trace, warn};

pub type SurfaceOf<B> = <B as RenderBackend>::Surface;
pub type CanvasOf<B> = <SurfaceOf<B> as RenderSurface>::Canvas;
pub type ImageOf<B> = <SurfaceOf<B> as RenderSurface>::Image;

/// What the draw routine gets for one frame.
#[derive(Debug, Clone)]
pub struct FrameInfo<C, F> {
    pub composition: Arc<C>,
    /// Engine time in seconds when the frame was pulled.
    pub current_time: f64,
    pub frames: F,
    /// Device-pixel size of the canvas.
    pub width: u32,
    pub height: u32,
}

/// Caller-supplied draw routine.
///
/// `before_draw_frame` may produce a per-frame context which is lent to
/// `draw_frame` and handed back to `after_draw_frame`. The after hook runs
/// for every frame whose before hook ran, whether or not an image was
/// published.
pub trait FrameDrawer<C, F, K> {
    type Context;

    fn before_draw_frame(&mut self) -> Option<Self::Context> {
        None
    }

    fn draw_frame(
        &mut self,
        canvas: &mut K,
        context: Option<&mut Self::Context>,
        info: FrameInfo<C, F>,
    );

    fn after_draw_frame(&mut self, _context: Option<Self::Context>) {}
}

/// Adapts a plain closure into a `FrameDrawer` without hooks.
pub struct DrawFn<G>(pub G);

impl<C, F, K, G> FrameDrawer<C, F, K> for DrawFn<G>
where
    G: FnMut(&mut K, FrameInfo<C, F>),
{
    type Context = ();

    fn draw_frame(&mut self, canvas: &mut K, _context: Option<&mut ()>, info: FrameInfo<C, F>) {
        (self.0)(canvas, info)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No engine or composition; nothing was drawn.
    Idle,
    /// The render target or its canvas could not be obtained this tick.
    SurfaceUnavailable,
    /// A new image was committed to the slot.
    Published,
    /// The frame was drawn but the image could not be materialized.
    ImageFailed,
}

/// Per-refresh rendering pump.
///
/// Owns the backend and the lazily created render target. The target is
/// reused across ticks and only recreated when the device-pixel size
/// changes; a failed frame never causes recreation.
pub struct FramePump<B: RenderBackend> {
    backend: B,
    surface: Option<B::Surface>,
    size: SurfaceSize,
    allocations: u64,
}

impl<B: RenderBackend> FramePump<B> {
    pub fn new(backend: B, size: SurfaceSize) -> Self {
        Self {
            backend,
            surface: None,
            size,
            allocations: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    /// Takes effect on the next tick.
    pub fn set_size(&mut self, size: SurfaceSize) {
        if size != self.size {
            debug!(width = size.width, height = size.height, "render size changed");
            self.size = size;
        }
    }

    pub fn surface(&self) -> Option<&B::Surface> {
        self.surface.as_ref()
    }

    /// Number of render targets allocated so far.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn release_surface(&mut self) -> bool {
        let released = self.surface.take().is_some();
        if released {
            debug!("render surface released");
        }
        released
    }

    pub fn tick<C, E, D>(
        &mut self,
        engine: Option<&E>,
        composition: Option<&Arc<C>>,
        slot: &mut FrameSlot<ImageOf<B>>,
        drawer: &mut D,
    ) -> TickOutcome
    where
        E: CompositionEngine,
        D: FrameDrawer<C, E::Frames, CanvasOf<B>>,
    {
        let (Some(engine), Some(composition)) = (engine, composition) else {
            return TickOutcome::Idle;
        };
        let size = self.size;
        if size.is_empty() {
            trace!("render size is empty, skipping frame");
            return TickOutcome::SurfaceUnavailable;
        }

        if self.surface.as_ref().map(RenderSurface::size) != Some(size) {
            self.surface = None;
            match self.backend.create_surface(size) {
                Ok(surface) => {
                    self.allocations += 1;
                    debug!(
                        width = size.width,
                        height = size.height,
                        allocations = self.allocations,
                        "render surface allocated"
                    );
                    self.surface = Some(surface);
                }
                Err(err) => {
                    warn!(error = %err, "render surface allocation failed");
                    return TickOutcome::SurfaceUnavailable;
                }
            }
        }
        let Some(surface) = self.surface.as_mut() else {
            return TickOutcome::SurfaceUnavailable;
        };

        let canvas = match surface.begin_frame() {
            Ok(canvas) => canvas,
            Err(err) => {
                warn!(error = %err, "could not begin frame");
                return TickOutcome::SurfaceUnavailable;
            }
        };

        let mut context = drawer.before_draw_frame();
        let info = FrameInfo {
            composition: Arc::clone(composition),
            current_time: engine.current_time(),
            frames: engine.decode_composition_frames(),
            width: size.width,
            height: size.height,
        };
        drawer.draw_frame(canvas, context.as_mut(), info);
        surface.flush();

        let outcome = match surface.make_image(size.width, size.height) {
            Ok(image) => {
                slot.publish(image);
                trace!(generation = slot.generation(), "frame published");
                TickOutcome::Published
            }
            Err(err) => {
                warn!(error = %err, "image materialization failed, keeping previous frame");
                TickOutcome::ImageFailed
            }
        };

        drawer.after_draw_frame(context);
        outcome
    }
}
