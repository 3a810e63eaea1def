//! In-memory engine, backend and drawer used by the player scenarios.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use composition_engine::{
    CompositionEngine, EngineError, EngineEvent, EngineEvents, EngineFactory,
};
use parking_lot::Mutex;
use playback::{FrameDrawer, FrameInfo, Player, PlayerConfig};
use renderer::{Dispose, RenderBackend, RenderSurface, RendererError, SurfaceSize};

pub type Log = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub name: &'static str,
}

pub fn timeline(name: &'static str) -> Arc<Timeline> {
    Arc::new(Timeline { name })
}

/// Observations on one engine instance, shared with the test.
#[derive(Debug, Default)]
pub struct EngineRecord {
    pub serial: usize,
    pub prepares: AtomicUsize,
    pub plays: AtomicUsize,
    pub disposes: AtomicUsize,
    pub looping: AtomicBool,
    pub looping_at_prepare: Mutex<Option<bool>>,
    pub playing: AtomicBool,
    pub time: Mutex<f64>,
}

impl EngineRecord {
    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn disposes(&self) -> usize {
        self.disposes.load(Ordering::SeqCst)
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    record: Arc<EngineRecord>,
    events: EngineEvents,
    fail_prepare: Arc<AtomicBool>,
}

impl FakeEngine {
    pub fn record(&self) -> &Arc<EngineRecord> {
        &self.record
    }

    pub fn emit_error(&self, err: EngineError) -> bool {
        self.events.emit(&EngineEvent::Error(&err))
    }

    pub fn emit_ready(&self) -> bool {
        self.events.emit(&EngineEvent::Ready)
    }

    pub fn emit_complete(&self) -> bool {
        self.record.playing.store(false, Ordering::SeqCst);
        self.events.emit(&EngineEvent::Complete)
    }
}

impl CompositionEngine for FakeEngine {
    /// Serial of the instance that produced the frame.
    type Frames = usize;

    fn prepare(&self) {
        self.record.prepares.fetch_add(1, Ordering::SeqCst);
        *self.record.looping_at_prepare.lock() = Some(self.record.is_looping());
        if self.fail_prepare.load(Ordering::SeqCst) {
            self.emit_error(EngineError::Decode("unsupported codec".into()));
        }
    }

    fn play(&self) {
        self.record.plays.fetch_add(1, Ordering::SeqCst);
        self.record.playing.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.record.playing.store(false, Ordering::SeqCst);
    }

    fn seek_to(&self, time: f64) {
        *self.record.time.lock() = time;
    }

    fn is_looping(&self) -> bool {
        self.record.is_looping()
    }

    fn set_looping(&self, looping: bool) {
        self.record.looping.store(looping, Ordering::SeqCst);
    }

    fn current_time(&self) -> f64 {
        *self.record.time.lock()
    }

    fn is_playing(&self) -> bool {
        self.record.playing.load(Ordering::SeqCst)
    }

    fn decode_composition_frames(&self) -> usize {
        self.record.serial
    }

    fn dispose(&self) {
        self.record.disposes.fetch_add(1, Ordering::SeqCst);
        self.record.playing.store(false, Ordering::SeqCst);
    }

    fn events(&self) -> &EngineEvents {
        &self.events
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub records: Arc<Mutex<Vec<Arc<EngineRecord>>>>,
    pub fail: Arc<AtomicBool>,
    pub fail_prepare: Arc<AtomicBool>,
}

impl EngineFactory<Timeline> for FakeFactory {
    type Engine = FakeEngine;

    fn create(&self, composition: &Arc<Timeline>) -> Result<FakeEngine, EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Creation(format!(
                "cannot open {}",
                composition.name
            )));
        }
        let mut records = self.records.lock();
        let record = Arc::new(EngineRecord {
            serial: records.len() + 1,
            ..EngineRecord::default()
        });
        records.push(Arc::clone(&record));
        Ok(FakeEngine {
            record,
            events: EngineEvents::new(),
            fail_prepare: Arc::clone(&self.fail_prepare),
        })
    }
}

#[derive(Debug, Default)]
pub struct FakeCanvas {
    pub draws: usize,
}

pub struct FakeImage {
    pub id: u32,
    log: Log,
}

impl Dispose for FakeImage {
    fn dispose(self) {
        self.log.lock().push(format!("dispose {}", self.id));
    }
}

pub struct FakeSurface {
    size: SurfaceSize,
    canvas: FakeCanvas,
    log: Log,
    fail_images: Arc<AtomicBool>,
    next_image: Arc<AtomicU32>,
}

impl RenderSurface for FakeSurface {
    type Canvas = FakeCanvas;
    type Image = FakeImage;

    fn size(&self) -> SurfaceSize {
        self.size
    }

    fn begin_frame(&mut self) -> Result<&mut FakeCanvas, RendererError> {
        Ok(&mut self.canvas)
    }

    fn flush(&mut self) {
        self.log.lock().push("flush".into());
    }

    fn make_image(&mut self, width: u32, height: u32) -> Result<FakeImage, RendererError> {
        if self.fail_images.load(Ordering::SeqCst) {
            self.log.lock().push("make failed".into());
            return Err(RendererError::BufferAsync);
        }
        assert_eq!((width, height), (self.size.width, self.size.height));
        let id = self.next_image.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().push(format!("make {id}"));
        Ok(FakeImage {
            id,
            log: Arc::clone(&self.log),
        })
    }
}

pub struct FakeBackend {
    log: Log,
    allocations: Arc<Mutex<Vec<SurfaceSize>>>,
    fail_images: Arc<AtomicBool>,
    next_image: Arc<AtomicU32>,
}

impl RenderBackend for FakeBackend {
    type Surface = FakeSurface;

    fn create_surface(&mut self, size: SurfaceSize) -> Result<FakeSurface, RendererError> {
        self.allocations.lock().push(size);
        Ok(FakeSurface {
            size,
            canvas: FakeCanvas::default(),
            log: Arc::clone(&self.log),
            fail_images: Arc::clone(&self.fail_images),
            next_image: Arc::clone(&self.next_image),
        })
    }
}

/// Records hook order; the per-frame context is a sequence number.
pub struct RecordingDrawer {
    log: Log,
    frames: u32,
    pub last_info: Option<(f64, usize, u32, u32)>,
}

impl FrameDrawer<Timeline, usize, FakeCanvas> for RecordingDrawer {
    type Context = u32;

    fn before_draw_frame(&mut self) -> Option<u32> {
        self.frames += 1;
        self.log.lock().push(format!("before {}", self.frames));
        Some(self.frames)
    }

    fn draw_frame(
        &mut self,
        canvas: &mut FakeCanvas,
        context: Option<&mut u32>,
        info: FrameInfo<Timeline, usize>,
    ) {
        canvas.draws += 1;
        let seq = context.map_or(0, |seq| *seq);
        self.log.lock().push(format!("draw {seq}"));
        self.last_info = Some((info.current_time, info.frames, info.width, info.height));
    }

    fn after_draw_frame(&mut self, context: Option<u32>) {
        self.log
            .lock()
            .push(format!("after {}", context.unwrap_or_default()));
    }
}

pub type TestPlayer = Player<Timeline, FakeFactory, FakeBackend, RecordingDrawer>;

pub struct Harness {
    pub log: Log,
    pub records: Arc<Mutex<Vec<Arc<EngineRecord>>>>,
    pub fail_creation: Arc<AtomicBool>,
    pub fail_prepare: Arc<AtomicBool>,
    pub fail_images: Arc<AtomicBool>,
    pub allocations: Arc<Mutex<Vec<SurfaceSize>>>,
}

impl Harness {
    pub fn record(&self, serial: usize) -> Arc<EngineRecord> {
        Arc::clone(&self.records.lock()[serial - 1])
    }

    pub fn engines_created(&self) -> usize {
        self.records.lock().len()
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.lock().len()
    }

    /// Drains the event log.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }
}

pub fn player(config: PlayerConfig) -> (TestPlayer, Harness) {
    let log: Log = Arc::default();
    let factory = FakeFactory::default();
    let fail_images = Arc::new(AtomicBool::new(false));
    let allocations: Arc<Mutex<Vec<SurfaceSize>>> = Arc::default();
    let backend = FakeBackend {
        log: Arc::clone(&log),
        allocations: Arc::clone(&allocations),
        fail_images: Arc::clone(&fail_images),
        next_image: Arc::default(),
    };
    let drawer = RecordingDrawer {
        log: Arc::clone(&log),
        frames: 0,
        last_info: None,
    };
    let harness = Harness {
        log: Arc::clone(&log),
        records: Arc::clone(&factory.records),
        fail_creation: Arc::clone(&factory.fail),
        fail_prepare: Arc::clone(&factory.fail_prepare),
        fail_images,
        allocations,
    };

    let mut player = Player::new(config, factory, backend, drawer);
    let commits = Arc::clone(&log);
    player.on_publish(move |generation| commits.lock().push(format!("commit {generation}")));
    (player, harness)
}

pub fn config() -> PlayerConfig {
    PlayerConfig {
        width: 160.0,
        height: 90.0,
        pixel_density: 2.0,
        ..PlayerConfig::default()
    }
}
