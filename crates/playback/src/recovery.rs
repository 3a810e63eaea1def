use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use composition_engine::EngineError;
use tracing::{info, warn};

/// Receives every engine error together with the handle that clears it.
pub type ErrorCallback = Arc<dyn Fn(&EngineError, RetryHandle) + Send + Sync>;

/// Clears the errored state so the next reconciliation recreates the engine.
#[derive(Clone)]
pub struct RetryHandle {
    errored: Arc<AtomicBool>,
}

impl RetryHandle {
    pub fn retry(&self) {
        if self.errored.swap(false, Ordering::AcqRel) {
            info!("retry requested");
        }
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }
}

impl fmt::Debug for RetryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHandle")
            .field("errored", &self.is_errored())
            .finish()
    }
}

/// Error/retry state machine.
///
/// The controller never retries by itself. `handle_error` hands the error and
/// a `RetryHandle` to the caller and then marks the state errored; the caller
/// decides when to call `retry`. A retry issued synchronously from inside the
/// callback is overridden by the errored flag set right after it returns, so
/// callers that want an immediate retry defer it to the next frame.
#[derive(Clone, Default)]
pub struct ErrorRecoveryController {
    errored: Arc<AtomicBool>,
    on_error: Option<ErrorCallback>,
}

impl ErrorRecoveryController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&mut self, on_error: Option<ErrorCallback>) {
        self.on_error = on_error;
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    pub fn retry_handle(&self) -> RetryHandle {
        RetryHandle {
            errored: Arc::clone(&self.errored),
        }
    }

    pub fn handle_error(&self, err: &EngineError) {
        warn!(error = %err, "engine error");
        if let Some(on_error) = &self.on_error {
            on_error(err, self.retry_handle());
        }
        self.errored.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ErrorRecoveryController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRecoveryController")
            .field("errored", &self.is_errored())
            .field("has_callback", &self.on_error.is_some())
            .finish()
    }
}
