use serde::Serialize;

/// Observable engine state, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No composition, or no instance created yet.
    Uninstantiated,
    /// Instance exists and `prepare()` has not fired yet.
    PreparePending,
    /// `prepare()` fired, playback not started.
    Prepared,
    Playing,
    Paused,
    Completed,
    /// An error was reported and no retry has been requested.
    Errored,
}

/// Inputs the state is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateInputs {
    pub errored: bool,
    pub has_engine: bool,
    pub prepare_pending: bool,
    pub prepare_fired: bool,
    pub ready: bool,
    pub completed: bool,
    pub started: bool,
    pub playing: bool,
}

impl EngineState {
    pub fn derive(inputs: StateInputs) -> Self {
        if inputs.errored {
            return EngineState::Errored;
        }
        if !inputs.has_engine {
            return EngineState::Uninstantiated;
        }
        if inputs.prepare_pending || !inputs.prepare_fired {
            return EngineState::PreparePending;
        }
        if inputs.completed {
            EngineState::Completed
        } else if inputs.playing {
            EngineState::Playing
        } else if inputs.started && inputs.ready {
            EngineState::Paused
        } else {
            EngineState::Prepared
        }
    }

    pub fn has_engine(self) -> bool {
        !matches!(self, EngineState::Uninstantiated | EngineState::Errored)
    }
}
