//! Decoding engine contract for composition playback
//!
//! The player core never decodes anything itself. It drives an engine that
//! owns demuxing, decoding and compositing of a multi-track composition and
//! exposes the decoded per-track frames valid at its current time.
//! This crate defines that contract, the listener registry engines use to
//! publish `ready`/`complete`/`error`, and a wall-clock reference engine.

use std::sync::Arc;

use thiserror::Error;

mod clock;
mod composition;
mod events;

pub use clock::{ClockEngine, ClockEngineFactory, FrameSet, TrackFrame};
pub use composition::{CompositionLoadError, CompositionSpec, TrackSpec};
pub use events::{EngineEvent, EngineEventKind, EngineEvents, EngineListener, ListenerId};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("compose failed: {0}")]
    Compose(String),
    #[error("engine creation failed: {0}")]
    Creation(String),
    #[error("a {0:?} listener is already registered on this engine")]
    ListenerAlreadyRegistered(EngineEventKind),
}

/// Decoding/compositing engine driven by the player.
///
/// Every method takes `&self`: the engine is shared between the render thread
/// (which reads `current_time` and pulls frames every refresh) and whatever
/// thread issues transport commands, so implementations synchronize their own
/// state.
pub trait CompositionEngine: Send + Sync {
    /// Per-track frame data handed to the draw routine.
    type Frames;

    /// Start loading. Called once per instance, after construction.
    fn prepare(&self);

    fn play(&self);

    fn pause(&self);

    /// Seek to `time` seconds.
    fn seek_to(&self, time: f64);

    fn is_looping(&self) -> bool;

    fn set_looping(&self, looping: bool);

    /// Playback position in seconds.
    fn current_time(&self) -> f64;

    fn is_playing(&self) -> bool;

    /// Decoded frames for every track active at `current_time`.
    fn decode_composition_frames(&self) -> Self::Frames;

    /// Release all native resources. Must be idempotent.
    fn dispose(&self);

    /// Event source for `ready`, `complete` and `error`.
    fn events(&self) -> &EngineEvents;
}

/// Builds engine instances for a composition.
pub trait EngineFactory<C>: Send + Sync {
    type Engine: CompositionEngine;

    fn create(&self, composition: &Arc<C>) -> Result<Self::Engine, EngineError>;
}
