use std::fmt;
use std::sync::Arc;

use composition_engine::{CompositionEngine, EngineError, EngineFactory};
use tracing::{debug, info};

/// Tag of one engine instance. Strictly increasing per lifecycle manager,
/// starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(u64);

impl EngineId {
    pub const fn get(self) -> u64 {
        self.0
    }

    pub(crate) const fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleChange {
    Unchanged,
    Created(EngineId),
    Removed,
    CreationFailed(EngineError),
}

/// Owns the engine instance for the current composition.
///
/// The instance is recomputed only when the composition identity
/// (`Arc::ptr_eq`) or the errored flag changes. The previous instance is
/// always disposed before its reference is dropped.
pub struct ExtractorLifecycleManager<C, F: EngineFactory<C>> {
    factory: F,
    composition: Option<Arc<C>>,
    errored: bool,
    engine: Option<(EngineId, Arc<F::Engine>)>,
    last_id: u64,
}

impl<C, F: EngineFactory<C>> ExtractorLifecycleManager<C, F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            composition: None,
            errored: false,
            engine: None,
            last_id: 0,
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn engine(&self) -> Option<&Arc<F::Engine>> {
        self.engine.as_ref().map(|(_, engine)| engine)
    }

    pub fn engine_id(&self) -> Option<EngineId> {
        self.engine.as_ref().map(|(id, _)| *id)
    }

    pub fn sync(&mut self, composition: Option<&Arc<C>>, errored: bool) -> LifecycleChange {
        let same_composition = match (&self.composition, composition) {
            (None, None) => true,
            (Some(current), Some(next)) => Arc::ptr_eq(current, next),
            _ => false,
        };
        if same_composition && errored == self.errored {
            return LifecycleChange::Unchanged;
        }

        debug!(
            composition_changed = !same_composition,
            errored, "reconciling engine instance"
        );
        self.composition = composition.cloned();
        self.errored = errored;
        let removed = self.release();

        let composition = match composition {
            Some(composition) if !errored => composition,
            _ => {
                return if removed {
                    LifecycleChange::Removed
                } else {
                    LifecycleChange::Unchanged
                };
            }
        };

        match self.factory.create(composition) {
            Ok(engine) => {
                self.last_id += 1;
                let id = EngineId(self.last_id);
                self.engine = Some((id, Arc::new(engine)));
                info!(engine = %id, "engine instance created");
                LifecycleChange::Created(id)
            }
            Err(err) => LifecycleChange::CreationFailed(err),
        }
    }

    /// Disposes the active instance and forgets the composition, so the next
    /// `sync` with a composition creates a fresh instance.
    pub fn teardown(&mut self) -> bool {
        self.composition = None;
        self.release()
    }

    fn release(&mut self) -> bool {
        match self.engine.take() {
            Some((id, engine)) => {
                engine.dispose();
                info!(engine = %id, "engine instance disposed");
                true
            }
            None => false,
        }
    }
}

impl<C, F: EngineFactory<C>> Drop for ExtractorLifecycleManager<C, F> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use composition_engine::{ClockEngineFactory, CompositionSpec, TrackSpec};

    fn composition() -> Arc<CompositionSpec> {
        Arc::new(CompositionSpec {
            tracks: vec![TrackSpec {
                id: "main".into(),
                source: None,
                start: 0.0,
                duration: 4.0,
                in_offset: 0.0,
            }],
            duration: None,
        })
    }

    #[test]
    fn null_composition_is_a_no_op() {
        let mut manager = ExtractorLifecycleManager::new(ClockEngineFactory);
        assert_eq!(manager.sync(None, false), LifecycleChange::Unchanged);
        assert_eq!(manager.sync(None, true), LifecycleChange::Unchanged);
        assert!(manager.engine().is_none());
    }

    #[test]
    fn same_identity_keeps_the_instance() {
        let mut manager = ExtractorLifecycleManager::new(ClockEngineFactory);
        let composition = composition();
        let first = manager.sync(Some(&composition), false);
        assert_eq!(first, LifecycleChange::Created(EngineId(1)));
        assert_eq!(
            manager.sync(Some(&composition), false),
            LifecycleChange::Unchanged
        );
        assert_eq!(manager.engine_id(), Some(EngineId(1)));
    }

    #[test]
    fn equal_but_distinct_composition_recreates() {
        let mut manager = ExtractorLifecycleManager::new(ClockEngineFactory);
        let a = composition();
        let b = Arc::new((*a).clone());
        manager.sync(Some(&a), false);
        let old = Arc::clone(manager.engine().unwrap());

        assert_eq!(
            manager.sync(Some(&b), false),
            LifecycleChange::Created(EngineId(2))
        );
        assert!(old.is_disposed());
        assert!(!manager.engine().unwrap().is_disposed());
    }

    #[test]
    fn errored_removes_and_clearing_recreates() {
        let mut manager = ExtractorLifecycleManager::new(ClockEngineFactory);
        let composition = composition();
        manager.sync(Some(&composition), false);
        let old = Arc::clone(manager.engine().unwrap());

        assert_eq!(
            manager.sync(Some(&composition), true),
            LifecycleChange::Removed
        );
        assert!(old.is_disposed());
        assert!(manager.engine().is_none());

        assert_eq!(
            manager.sync(Some(&composition), false),
            LifecycleChange::Created(EngineId(2))
        );
    }

    #[test]
    fn factory_failure_is_reported() {
        let mut manager = ExtractorLifecycleManager::new(ClockEngineFactory);
        let broken = Arc::new(CompositionSpec {
            tracks: Vec::new(),
            duration: Some(f64::INFINITY),
        });
        assert!(matches!(
            manager.sync(Some(&broken), false),
            LifecycleChange::CreationFailed(EngineError::Creation(_))
        ));
        assert!(manager.engine().is_none());
    }

    #[test]
    fn teardown_disposes_once() {
        let mut manager = ExtractorLifecycleManager::new(ClockEngineFactory);
        let composition = composition();
        manager.sync(Some(&composition), false);
        let engine = Arc::clone(manager.engine().unwrap());

        assert!(manager.teardown());
        assert!(!manager.teardown());
        assert!(engine.is_disposed());

        // Forgotten composition means the same Arc creates a new instance.
        assert_eq!(
            manager.sync(Some(&composition), false),
            LifecycleChange::Created(EngineId(2))
        );
    }
}
