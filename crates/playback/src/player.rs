use std::sync::Arc;
use std::time::Instant;

use composition_engine::{CompositionEngine, EngineFactory};
use renderer::{FrameSlot, RenderBackend, SurfaceSize};
use tracing::{debug, info};

use crate::config::PlayerConfig;
use crate::controller::PlaybackController;
use crate::events::{EventBridge, PlaybackFlags, PlayerCallbacks};
use crate::lifecycle::{EngineId, ExtractorLifecycleManager, LifecycleChange};
use crate::pump::{CanvasOf, FrameDrawer, FramePump, ImageOf, TickOutcome};
use crate::recovery::{ErrorRecoveryController, RetryHandle};
use crate::scheduler::PreparationScheduler;
use crate::state::{EngineState, StateInputs};

type EngineOf<C, F> = <F as EngineFactory<C>>::Engine;

/// Composition player driven by the host's display refresh.
///
/// The host calls `on_frame` once per refresh on its render thread and
/// displays `published_image()`. Everything that touches the engine's
/// lifecycle or the GPU happens inside `sync`/`on_frame`; engine events only
/// flip atomics and call the host callbacks.
pub struct Player<C, F, B, D>
where
    F: EngineFactory<C>,
    B: RenderBackend,
{
    composition: Option<Arc<C>>,
    looping: bool,
    auto_play: bool,
    pixel_density: f32,
    callbacks: PlayerCallbacks,
    lifecycle: ExtractorLifecycleManager<C, F>,
    scheduler: PreparationScheduler,
    flags: Arc<PlaybackFlags>,
    bridge: EventBridge<EngineOf<C, F>>,
    recovery: ErrorRecoveryController,
    prepared: Option<EngineId>,
    pump: FramePump<B>,
    slot: FrameSlot<ImageOf<B>>,
    drawer: D,
}

impl<C, F, B, D> Player<C, F, B, D>
where
    F: EngineFactory<C>,
    B: RenderBackend,
{
    pub fn new(config: PlayerConfig, factory: F, backend: B, drawer: D) -> Self {
        let flags = Arc::new(PlaybackFlags::new());
        info!(
            width = config.width,
            height = config.height,
            pixel_density = config.pixel_density,
            "player created"
        );
        Self {
            composition: None,
            looping: config.looping,
            auto_play: config.auto_play,
            pixel_density: config.pixel_density,
            callbacks: PlayerCallbacks::default(),
            lifecycle: ExtractorLifecycleManager::new(factory),
            scheduler: PreparationScheduler::new(config.preparation_delay()),
            bridge: EventBridge::new(Arc::clone(&flags)),
            flags,
            recovery: ErrorRecoveryController::new(),
            prepared: None,
            pump: FramePump::new(backend, config.surface_size()),
            slot: FrameSlot::new(),
            drawer,
        }
    }

    pub fn composition(&self) -> Option<&Arc<C>> {
        self.composition.as_ref()
    }

    /// Takes effect at the next `sync`. Replacing the composition with a
    /// different `Arc` recreates the engine, even if the contents are equal.
    pub fn set_composition(&mut self, composition: Option<Arc<C>>) {
        self.composition = composition;
    }

    /// Resizes the render target. Never recreates the engine.
    pub fn set_size(&mut self, width: f32, height: f32) {
        self.pump
            .set_size(SurfaceSize::from_logical(width, height, self.pixel_density));
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
        if let Some(engine) = self.lifecycle.engine() {
            engine.set_looping(looping);
        }
    }

    pub fn set_auto_play(&mut self, auto_play: bool) {
        self.auto_play = auto_play;
    }

    pub fn set_callbacks(&mut self, callbacks: PlayerCallbacks) {
        self.recovery.set_callback(callbacks.on_error.clone());
        self.callbacks = callbacks;
        if let (Some(id), Some(engine)) = (self.lifecycle.engine_id(), self.lifecycle.engine()) {
            if let Err(err) = self
                .bridge
                .attach(id, engine, &self.callbacks, &self.recovery)
            {
                self.recovery.handle_error(&err);
            }
        }
    }

    /// Called with the generation of every image committed to the slot.
    pub fn on_publish(&mut self, hook: impl FnMut(u64) + Send + 'static) {
        self.slot.on_commit(hook);
    }

    /// Lets pending and future preparations fire on the next poll instead of
    /// waiting for the fallback delay.
    pub fn notify_render_context_ready(&mut self) {
        self.scheduler.signal_context_ready();
    }

    /// Reconciles the engine with the current composition and error state,
    /// then fires a due preparation.
    pub fn sync(&mut self, now: Instant) {
        match self
            .lifecycle
            .sync(self.composition.as_ref(), self.recovery.is_errored())
        {
            LifecycleChange::Unchanged => {}
            LifecycleChange::Created(id) => {
                // The surface and the published image outlive the instance;
                // the next published frame replaces the image.
                self.unbind_engine();
                self.bind_engine(id, now);
            }
            LifecycleChange::Removed => self.discard_frame_state(),
            LifecycleChange::CreationFailed(err) => {
                self.discard_frame_state();
                self.recovery.handle_error(&err);
            }
        }

        if let Some(id) = self.scheduler.poll(self.lifecycle.engine_id(), now) {
            self.prepare(id);
        }
    }

    pub fn published_image(&self) -> Option<&ImageOf<B>> {
        self.slot.current()
    }

    pub fn published_generation(&self) -> u64 {
        self.slot.generation()
    }

    pub fn controller(&self) -> PlaybackController<'_, EngineOf<C, F>> {
        PlaybackController::new(self.lifecycle.engine().map(Arc::as_ref), &self.flags)
    }

    pub fn state(&self) -> EngineState {
        let engine = self.lifecycle.engine();
        EngineState::derive(StateInputs {
            errored: self.recovery.is_errored(),
            has_engine: engine.is_some(),
            prepare_pending: self.scheduler.is_pending(),
            prepare_fired: self.prepared.is_some() && self.prepared == self.lifecycle.engine_id(),
            ready: self.flags.is_ready(),
            completed: self.flags.is_completed(),
            started: self.flags.has_started(),
            playing: engine.is_some_and(|engine| engine.is_playing()),
        })
    }

    pub fn retry_handle(&self) -> RetryHandle {
        self.recovery.retry_handle()
    }

    pub fn is_errored(&self) -> bool {
        self.recovery.is_errored()
    }

    pub fn engine(&self) -> Option<&Arc<EngineOf<C, F>>> {
        self.lifecycle.engine()
    }

    pub fn engine_id(&self) -> Option<EngineId> {
        self.lifecycle.engine_id()
    }

    pub fn flags(&self) -> &PlaybackFlags {
        &self.flags
    }

    pub fn pump(&self) -> &FramePump<B> {
        &self.pump
    }

    pub fn drawer(&self) -> &D {
        &self.drawer
    }

    pub fn drawer_mut(&mut self) -> &mut D {
        &mut self.drawer
    }

    /// Releases the engine, the published image and the render target, and
    /// forgets the composition. Safe to call more than once.
    pub fn teardown(&mut self) {
        self.composition = None;
        self.discard_frame_state();
        if self.lifecycle.teardown() {
            info!("player torn down");
        }
    }

    fn bind_engine(&mut self, id: EngineId, now: Instant) {
        let Some(engine) = self.lifecycle.engine() else {
            return;
        };
        engine.set_looping(self.looping);
        if let Err(err) = self
            .bridge
            .attach(id, engine, &self.callbacks, &self.recovery)
        {
            self.recovery.handle_error(&err);
            return;
        }
        self.scheduler.schedule(id, now);
    }

    fn prepare(&mut self, id: EngineId) {
        let Some(engine) = self.lifecycle.engine() else {
            return;
        };
        debug!(engine = %id, looping = self.looping, "preparing engine");
        self.prepared = Some(id);
        engine.prepare();
        if self.auto_play && !self.recovery.is_errored() {
            debug!(engine = %id, "auto-play");
            self.flags.mark_started();
            engine.play();
        }
    }

    fn unbind_engine(&mut self) {
        self.bridge.detach();
        self.scheduler.cancel();
        self.prepared = None;
    }

    /// Releases everything held for display once no engine remains.
    fn discard_frame_state(&mut self) {
        self.unbind_engine();
        self.slot.clear();
        self.pump.release_surface();
    }
}

impl<C, F, B, D> Player<C, F, B, D>
where
    F: EngineFactory<C>,
    B: RenderBackend,
    D: FrameDrawer<C, <EngineOf<C, F> as CompositionEngine>::Frames, CanvasOf<B>>,
{
    /// Runs one display refresh: `sync`, then one pump tick.
    ///
    /// An error raised while `sync` prepared the engine tears it down before
    /// anything is drawn.
    pub fn on_frame(&mut self, now: Instant) -> TickOutcome {
        self.sync(now);
        if self.recovery.is_errored() {
            self.sync(now);
            return TickOutcome::Idle;
        }
        let engine = self.lifecycle.engine().map(Arc::as_ref);
        self.pump.tick(
            engine,
            self.composition.as_ref(),
            &mut self.slot,
            &mut self.drawer,
        )
    }
}

impl<C, F, B, D> Drop for Player<C, F, B, D>
where
    F: EngineFactory<C>,
    B: RenderBackend,
{
    fn drop(&mut self) {
        self.teardown();
    }
}
