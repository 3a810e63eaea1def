use composition_engine::CompositionEngine;
use tracing::debug;

use crate::events::PlaybackFlags;

/// Transport commands and reads against the live engine.
///
/// Borrowed from the player for the duration of a call site; without an
/// engine every read returns its idle value and every command is ignored.
pub struct PlaybackController<'a, E: CompositionEngine> {
    engine: Option<&'a E>,
    flags: &'a PlaybackFlags,
}

impl<'a, E: CompositionEngine> PlaybackController<'a, E> {
    pub fn new(engine: Option<&'a E>, flags: &'a PlaybackFlags) -> Self {
        Self { engine, flags }
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn current_time(&self) -> f64 {
        self.engine.map_or(0.0, CompositionEngine::current_time)
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_some_and(CompositionEngine::is_playing)
    }

    pub fn is_looping(&self) -> bool {
        self.engine.is_some_and(CompositionEngine::is_looping)
    }

    pub fn play(&self) {
        match self.engine {
            Some(engine) => {
                self.flags.mark_started();
                engine.play();
            }
            None => debug!("play ignored: no engine"),
        }
    }

    pub fn pause(&self) {
        match self.engine {
            Some(engine) => engine.pause(),
            None => debug!("pause ignored: no engine"),
        }
    }

    pub fn seek_to(&self, time: f64) {
        match self.engine {
            Some(engine) => {
                self.flags.clear_completed();
                engine.seek_to(time);
            }
            None => debug!(time, "seek ignored: no engine"),
        }
    }
}
