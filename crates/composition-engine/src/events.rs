use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEventKind {
    Ready,
    Complete,
    Error,
}

impl EngineEventKind {
    pub const ALL: [EngineEventKind; 3] = [
        EngineEventKind::Ready,
        EngineEventKind::Complete,
        EngineEventKind::Error,
    ];

    fn index(self) -> usize {
        match self {
            EngineEventKind::Ready => 0,
            EngineEventKind::Complete => 1,
            EngineEventKind::Error => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EngineEvent<'a> {
    Ready,
    Complete,
    Error(&'a EngineError),
}

impl EngineEvent<'_> {
    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::Ready => EngineEventKind::Ready,
            EngineEvent::Complete => EngineEventKind::Complete,
            EngineEvent::Error(_) => EngineEventKind::Error,
        }
    }
}

pub type EngineListener = Arc<dyn Fn(&EngineEvent<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener table embedded in every engine instance.
///
/// Holds at most one listener per event kind; a second `subscribe` for the
/// same kind is rejected until the first one is removed. Listeners are called
/// with the table unlocked, so a listener may unsubscribe itself.
#[derive(Default)]
pub struct EngineEvents {
    slots: Mutex<[Option<(ListenerId, EngineListener)>; 3]>,
    next_id: AtomicU64,
}

impl EngineEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        kind: EngineEventKind,
        listener: EngineListener,
    ) -> Result<ListenerId, EngineError> {
        let mut slots = self.slots.lock();
        let slot = &mut slots[kind.index()];
        if slot.is_some() {
            return Err(EngineError::ListenerAlreadyRegistered(kind));
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        *slot = Some((id, listener));
        trace!(?kind, listener = id.0, "engine listener subscribed");
        Ok(id)
    }

    /// Removes the listener for `kind` if it is still the one identified by `id`.
    pub fn unsubscribe(&self, kind: EngineEventKind, id: ListenerId) -> bool {
        let mut slots = self.slots.lock();
        let slot = &mut slots[kind.index()];
        match slot {
            Some((current, _)) if *current == id => {
                *slot = None;
                trace!(?kind, listener = id.0, "engine listener removed");
                true
            }
            _ => false,
        }
    }

    /// Delivers `event` to its listener. Returns whether one was registered.
    pub fn emit(&self, event: &EngineEvent<'_>) -> bool {
        let listener = self.slots.lock()[event.kind().index()]
            .as_ref()
            .map(|(_, listener)| Arc::clone(listener));
        match listener {
            Some(listener) => {
                listener(event);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, kind: EngineEventKind) -> bool {
        self.slots.lock()[kind.index()].is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }

    /// Drops every listener. Engines call this from `dispose`.
    pub fn clear(&self) {
        *self.slots.lock() = Default::default();
    }
}

impl fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        let registered: Vec<EngineEventKind> = EngineEventKind::ALL
            .into_iter()
            .filter(|kind| slots[kind.index()].is_some())
            .collect();
        f.debug_struct("EngineEvents")
            .field("registered", &registered)
            .finish()
    }
}
