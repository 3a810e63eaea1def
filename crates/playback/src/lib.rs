//! Composition playback core
//!
//! Drives a `CompositionEngine` from the host's display refresh: creates and
//! disposes engine instances as the composition and error state change,
//! defers `prepare()` until the render context can serve it, bridges engine
//! events into observable state, and pumps one frame per refresh into a
//! GPU-backed offscreen surface whose snapshot is published for display.

pub mod config;
pub mod controller;
pub mod events;
pub mod lifecycle;
pub mod player;
pub mod pump;
pub mod recovery;
pub mod scheduler;
pub mod state;

pub use config::{ConfigError, PlayerConfig};
pub use controller::PlaybackController;
pub use events::{EventBridge, EventCallback, PlaybackFlags, PlayerCallbacks};
pub use lifecycle::{EngineId, ExtractorLifecycleManager, LifecycleChange};
pub use player::Player;
pub use pump::{CanvasOf, DrawFn, FrameDrawer, FrameInfo, FramePump, ImageOf, TickOutcome};
pub use recovery::{ErrorCallback, ErrorRecoveryController, RetryHandle};
pub use scheduler::{PreparationScheduler, DEFAULT_PREPARATION_DELAY};
pub use state::{EngineState, StateInputs};
