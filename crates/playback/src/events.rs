use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use composition_engine::{
    CompositionEngine, EngineError, EngineEvent, EngineEventKind, EngineListener, ListenerId,
};
use tracing::{debug, trace};

use crate::lifecycle::EngineId;
use crate::recovery::{ErrorCallback, ErrorRecoveryController, RetryHandle};

pub type EventCallback = Arc<dyn Fn() + Send + Sync>;

/// Host callbacks fired from the engine's event thread.
#[derive(Clone, Default)]
pub struct PlayerCallbacks {
    pub on_ready: Option<EventCallback>,
    pub on_complete: Option<EventCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl PlayerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_ready(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&EngineError, RetryHandle) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for PlayerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerCallbacks")
            .field("on_ready", &self.on_ready.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Observable playback state written by engine listeners.
///
/// Only atomics: listeners run on the engine's thread while the render
/// thread reads these.
#[derive(Debug, Default)]
pub struct PlaybackFlags {
    active: AtomicU64,
    ready: AtomicBool,
    completed: AtomicBool,
    started: AtomicBool,
}

impl PlaybackFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine whose events are currently accepted.
    pub fn active_engine(&self) -> Option<EngineId> {
        EngineId::from_raw(self.active.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether playback was started on the active engine.
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn activate(&self, engine: Option<EngineId>) {
        self.ready.store(false, Ordering::Release);
        self.completed.store(false, Ordering::Release);
        self.started.store(false, Ordering::Release);
        self.active
            .store(engine.map_or(0, EngineId::get), Ordering::Release);
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
        self.completed.store(false, Ordering::Release);
    }

    pub(crate) fn clear_completed(&self) {
        self.completed.store(false, Ordering::Release);
    }

    fn accepts(&self, engine: EngineId) -> bool {
        self.active_engine() == Some(engine)
    }
}

struct Binding<E: CompositionEngine> {
    engine_id: EngineId,
    engine: Arc<E>,
    listeners: Vec<(EngineEventKind, ListenerId)>,
}

impl<E: CompositionEngine> Drop for Binding<E> {
    fn drop(&mut self) {
        for (kind, id) in self.listeners.drain(..) {
            self.engine.events().unsubscribe(kind, id);
        }
        trace!(engine = %self.engine_id, "event bridge detached");
    }
}

/// Subscribes one listener per event kind on the active engine and forwards
/// events to the host callbacks, the error recovery controller and the
/// shared `PlaybackFlags`.
pub struct EventBridge<E: CompositionEngine> {
    flags: Arc<PlaybackFlags>,
    binding: Option<Binding<E>>,
}

impl<E: CompositionEngine> EventBridge<E> {
    pub fn new(flags: Arc<PlaybackFlags>) -> Self {
        Self {
            flags,
            binding: None,
        }
    }

    pub fn flags(&self) -> &Arc<PlaybackFlags> {
        &self.flags
    }

    pub fn bound_engine(&self) -> Option<EngineId> {
        self.binding.as_ref().map(|binding| binding.engine_id)
    }

    /// Binds to `engine`, replacing any previous binding.
    ///
    /// Fails when a listener of some kind is already registered on the
    /// engine; nothing stays subscribed in that case.
    pub fn attach(
        &mut self,
        engine_id: EngineId,
        engine: &Arc<E>,
        callbacks: &PlayerCallbacks,
        recovery: &ErrorRecoveryController,
    ) -> Result<(), EngineError> {
        let rebinding = self.bound_engine() == Some(engine_id);
        self.binding = None;
        if !rebinding {
            self.flags.activate(Some(engine_id));
        }

        let mut binding = Binding {
            engine_id,
            engine: Arc::clone(engine),
            listeners: Vec::with_capacity(EngineEventKind::ALL.len()),
        };
        for kind in EngineEventKind::ALL {
            let listener = self.listener(kind, engine_id, callbacks, recovery);
            // Dropping the partial binding unsubscribes what was registered.
            let id = engine.events().subscribe(kind, listener)?;
            binding.listeners.push((kind, id));
        }

        debug!(engine = %engine_id, "event bridge attached");
        self.binding = Some(binding);
        Ok(())
    }

    pub fn detach(&mut self) {
        if self.binding.take().is_some() {
            self.flags.activate(None);
        }
    }

    fn listener(
        &self,
        kind: EngineEventKind,
        engine_id: EngineId,
        callbacks: &PlayerCallbacks,
        recovery: &ErrorRecoveryController,
    ) -> EngineListener {
        let flags = Arc::clone(&self.flags);
        match kind {
            EngineEventKind::Ready => {
                let on_ready = callbacks.on_ready.clone();
                Arc::new(move |_event| {
                    if !flags.accepts(engine_id) {
                        trace!(engine = %engine_id, "stale ready event dropped");
                        return;
                    }
                    flags.ready.store(true, Ordering::Release);
                    debug!(engine = %engine_id, "engine ready");
                    if let Some(on_ready) = &on_ready {
                        on_ready();
                    }
                })
            }
            EngineEventKind::Complete => {
                let on_complete = callbacks.on_complete.clone();
                Arc::new(move |_event| {
                    if !flags.accepts(engine_id) {
                        trace!(engine = %engine_id, "stale complete event dropped");
                        return;
                    }
                    flags.completed.store(true, Ordering::Release);
                    debug!(engine = %engine_id, "playback complete");
                    if let Some(on_complete) = &on_complete {
                        on_complete();
                    }
                })
            }
            EngineEventKind::Error => {
                let recovery = recovery.clone();
                Arc::new(move |event| {
                    if !flags.accepts(engine_id) {
                        trace!(engine = %engine_id, "stale error event dropped");
                        return;
                    }
                    if let EngineEvent::Error(err) = event {
                        recovery.handle_error(err);
                    }
                })
            }
        }
    }
}

impl<E: CompositionEngine> Drop for EventBridge<E> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use composition_engine::{ClockEngine, CompositionSpec, TrackSpec};
    use std::sync::atomic::AtomicUsize;

    fn engine() -> Arc<ClockEngine> {
        Arc::new(ClockEngine::new(Arc::new(CompositionSpec {
            tracks: vec![TrackSpec {
                id: "t".into(),
                source: None,
                start: 0.0,
                duration: 1.0,
                in_offset: 0.0,
            }],
            duration: None,
        })))
    }

    fn id(raw: u64) -> EngineId {
        EngineId::from_raw(raw).unwrap()
    }

    #[test]
    fn attach_registers_one_listener_per_kind() {
        let engine = engine();
        let mut bridge = EventBridge::new(Arc::new(PlaybackFlags::new()));
        bridge
            .attach(
                id(1),
                &engine,
                &PlayerCallbacks::new(),
                &ErrorRecoveryController::new(),
            )
            .unwrap();
        assert_eq!(engine.events().listener_count(), 3);

        // Re-attaching replaces rather than duplicates.
        bridge
            .attach(
                id(1),
                &engine,
                &PlayerCallbacks::new(),
                &ErrorRecoveryController::new(),
            )
            .unwrap();
        assert_eq!(engine.events().listener_count(), 3);

        bridge.detach();
        assert_eq!(engine.events().listener_count(), 0);
        assert_eq!(bridge.flags().active_engine(), None);
    }

    #[test]
    fn foreign_listener_blocks_attach_without_leaking() {
        let engine = engine();
        engine
            .events()
            .subscribe(EngineEventKind::Complete, Arc::new(|_event| {}))
            .unwrap();
        let mut bridge = EventBridge::new(Arc::new(PlaybackFlags::new()));
        let err = bridge
            .attach(
                id(1),
                &engine,
                &PlayerCallbacks::new(),
                &ErrorRecoveryController::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::ListenerAlreadyRegistered(EngineEventKind::Complete)
        );
        assert_eq!(engine.events().listener_count(), 1);
        assert_eq!(bridge.bound_engine(), None);
    }

    #[test]
    fn events_update_flags_and_callbacks() {
        let engine = engine();
        let flags = Arc::new(PlaybackFlags::new());
        let readies = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&readies);
        let callbacks = PlayerCallbacks::new().on_ready(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        let recovery = ErrorRecoveryController::new();
        let mut bridge = EventBridge::new(Arc::clone(&flags));
        bridge.attach(id(4), &engine, &callbacks, &recovery).unwrap();

        engine.events().emit(&EngineEvent::Ready);
        engine.events().emit(&EngineEvent::Complete);
        engine
            .events()
            .emit(&EngineEvent::Error(&EngineError::Decode("x".into())));

        assert!(flags.is_ready());
        assert!(flags.is_completed());
        assert_eq!(readies.load(Ordering::SeqCst), 1);
        assert!(recovery.is_errored());
    }

    #[test]
    fn events_from_inactive_engine_are_dropped() {
        let engine = engine();
        let flags = Arc::new(PlaybackFlags::new());
        let recovery = ErrorRecoveryController::new();
        let mut bridge = EventBridge::new(Arc::clone(&flags));
        bridge
            .attach(id(1), &engine, &PlayerCallbacks::new(), &recovery)
            .unwrap();

        // A newer instance became active while this listener was in flight.
        flags.activate(Some(id(2)));
        engine.events().emit(&EngineEvent::Ready);
        engine
            .events()
            .emit(&EngineEvent::Error(&EngineError::Decode("late".into())));

        assert!(!flags.is_ready());
        assert!(!recovery.is_errored());
    }
}
