use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::lifecycle::EngineId;

pub const DEFAULT_PREPARATION_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
struct Pending {
    engine: EngineId,
    due: Instant,
}

/// Defers `prepare()` of a freshly created engine until the render context
/// can serve it.
///
/// Polled from the render thread. A preparation fires once its delay has
/// elapsed, or on the first poll after the host signalled that the render
/// context is ready, whichever comes first.
#[derive(Debug)]
pub struct PreparationScheduler {
    delay: Duration,
    pending: Option<Pending>,
    context_ready: bool,
}

impl Default for PreparationScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PREPARATION_DELAY)
    }
}

impl PreparationScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            context_ready: false,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_engine(&self) -> Option<EngineId> {
        self.pending.map(|pending| pending.engine)
    }

    pub fn is_context_ready(&self) -> bool {
        self.context_ready
    }

    /// Arms the preparation of `engine`, replacing any earlier one.
    pub fn schedule(&mut self, engine: EngineId, now: Instant) {
        if let Some(previous) = self.pending.replace(Pending {
            engine,
            due: now + self.delay,
        }) {
            debug!(engine = %previous.engine, "pending preparation superseded");
        }
        trace!(engine = %engine, delay_ms = self.delay.as_millis() as u64, "preparation scheduled");
    }

    pub fn signal_context_ready(&mut self) {
        if !self.context_ready {
            debug!("render context ready");
        }
        self.context_ready = true;
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(engine = %pending.engine, "pending preparation cancelled");
        }
    }

    /// Returns the engine to prepare now, if any.
    ///
    /// A preparation armed for an engine other than `current` is dropped.
    pub fn poll(&mut self, current: Option<EngineId>, now: Instant) -> Option<EngineId> {
        let pending = self.pending?;
        if current != Some(pending.engine) {
            self.cancel();
            return None;
        }
        if self.context_ready || now >= pending.due {
            self.pending = None;
            return Some(pending.engine);
        }
        None
    }
}
