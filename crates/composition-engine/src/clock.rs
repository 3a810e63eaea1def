//! Wall-clock reference engine
//!
//! `ClockEngine` does not decode pixels. It advances a playback clock over a
//! `CompositionSpec` and reports, for every track active at the current time,
//! the track-local timestamp a real decoder would have to produce. It honors
//! looping and emits the same `ready`/`complete`/`error` events a hardware
//! engine would, which makes it a drop-in for headless runs and demos.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    CompositionEngine, CompositionSpec, EngineError, EngineEvent, EngineEvents, EngineFactory,
};

/// Frame data for one active track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFrame {
    pub track_id: String,
    pub source: Option<String>,
    /// Position inside the track's source, in seconds.
    pub local_time: f64,
}

/// Frames valid at `time` for every active track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSet {
    pub time: f64,
    pub frames: Vec<TrackFrame>,
}

impl FrameSet {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug, Clone)]
struct PlaybackClock {
    playing: bool,
    rate: f64,
    anchor_instant: Option<Instant>,
    anchor_sec: f64,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self {
            playing: false,
            rate: 1.0,
            anchor_instant: None,
            anchor_sec: 0.0,
        }
    }
}

impl PlaybackClock {
    fn play(&mut self) {
        self.anchor_sec = self.now();
        self.anchor_instant = Some(Instant::now());
        self.playing = true;
    }

    fn pause(&mut self, at_sec: f64) {
        self.playing = false;
        self.anchor_sec = at_sec;
        self.anchor_instant = None;
    }

    fn seek_to(&mut self, sec: f64) {
        self.anchor_sec = sec;
        if self.playing {
            self.anchor_instant = Some(Instant::now());
        }
    }

    fn now(&self) -> f64 {
        match (self.playing, self.anchor_instant) {
            (true, Some(anchor)) => self.anchor_sec + anchor.elapsed().as_secs_f64() * self.rate,
            _ => self.anchor_sec,
        }
    }
}

#[derive(Debug, Default)]
struct ClockState {
    clock: PlaybackClock,
    looping: bool,
    prepared: bool,
    disposed: bool,
}

pub struct ClockEngine {
    composition: Arc<CompositionSpec>,
    duration: f64,
    state: Mutex<ClockState>,
    events: EngineEvents,
}

impl ClockEngine {
    pub fn new(composition: Arc<CompositionSpec>) -> Self {
        let duration = composition.duration();
        Self {
            composition,
            duration,
            state: Mutex::new(ClockState::default()),
            events: EngineEvents::new(),
        }
    }

    pub fn composition(&self) -> &Arc<CompositionSpec> {
        &self.composition
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_prepared(&self) -> bool {
        self.state.lock().prepared
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Reads the clock, handling the end of the composition. Emits `complete`
    /// (outside the state lock) when playback crosses the end.
    fn advance(&self) -> f64 {
        let (time, completed) = {
            let mut state = self.state.lock();
            let now = state.clock.now();
            if state.disposed || !state.clock.playing || self.duration <= 0.0 {
                (now, false)
            } else if now >= self.duration {
                if state.looping {
                    let wrapped = now % self.duration;
                    state.clock.seek_to(wrapped);
                    (wrapped, true)
                } else {
                    state.clock.pause(self.duration);
                    (self.duration, true)
                }
            } else {
                (now, false)
            }
        };
        if completed {
            debug!(duration = self.duration, "clock engine reached end of composition");
            self.events.emit(&EngineEvent::Complete);
        }
        time
    }
}

impl CompositionEngine for ClockEngine {
    type Frames = FrameSet;

    fn prepare(&self) {
        {
            let mut state = self.state.lock();
            if state.disposed {
                warn!("prepare called on disposed clock engine");
                return;
            }
            if state.prepared {
                debug!("clock engine already prepared");
                return;
            }
            if !self.composition.tracks.is_empty() {
                state.prepared = true;
            }
        }
        if self.composition.tracks.is_empty() {
            let err = EngineError::Compose("composition has no tracks".into());
            self.events.emit(&EngineEvent::Error(&err));
            return;
        }
        info!(
            tracks = self.composition.tracks.len(),
            duration = self.duration,
            "clock engine prepared"
        );
        self.events.emit(&EngineEvent::Ready);
    }

    fn play(&self) {
        let mut state = self.state.lock();
        if state.disposed || state.clock.playing {
            return;
        }
        if !state.looping && state.clock.now() >= self.duration {
            state.clock.seek_to(0.0);
        }
        state.clock.play();
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        let now = state.clock.now().min(self.duration.max(0.0));
        state.clock.pause(now);
    }

    fn seek_to(&self, time: f64) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.clock.seek_to(time.clamp(0.0, self.duration.max(0.0)));
    }

    fn is_looping(&self) -> bool {
        self.state.lock().looping
    }

    fn set_looping(&self, looping: bool) {
        self.state.lock().looping = looping;
    }

    fn current_time(&self) -> f64 {
        self.advance()
    }

    fn is_playing(&self) -> bool {
        self.advance();
        self.state.lock().clock.playing
    }

    fn decode_composition_frames(&self) -> FrameSet {
        let time = self.advance();
        let frames = self
            .composition
            .active_tracks(time)
            .map(|track| TrackFrame {
                track_id: track.id.clone(),
                source: track.source.clone(),
                local_time: time - track.start + track.in_offset,
            })
            .collect();
        FrameSet { time, frames }
    }

    fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            let now = state.clock.now();
            state.clock.pause(now);
        }
        self.events.clear();
        debug!("clock engine disposed");
    }

    fn events(&self) -> &EngineEvents {
        &self.events
    }
}

/// Builds a `ClockEngine` per composition.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockEngineFactory;

impl EngineFactory<CompositionSpec> for ClockEngineFactory {
    type Engine = ClockEngine;

    fn create(&self, composition: &Arc<CompositionSpec>) -> Result<ClockEngine, EngineError> {
        let duration = composition.duration();
        if !duration.is_finite() || duration < 0.0 {
            return Err(EngineError::Creation(format!(
                "composition duration must be finite and non-negative, got {duration}"
            )));
        }
        Ok(ClockEngine::new(Arc::clone(composition)))
    }
}
