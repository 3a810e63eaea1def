use std::fmt;

use tracing::trace;

use crate::Dispose;

/// Single-occupancy slot holding the image currently on display.
///
/// `publish` commits the replacement first and only then disposes the image it
/// displaced, so readers never observe a disposed handle and an image is never
/// released before its successor is in place.
pub struct FrameSlot<I: Dispose> {
    current: Option<I>,
    generation: u64,
    on_commit: Option<Box<dyn FnMut(u64) + Send>>,
}

impl<I: Dispose> FrameSlot<I> {
    pub fn new() -> Self {
        Self {
            current: None,
            generation: 0,
            on_commit: None,
        }
    }

    /// Registers a hook invoked with the new generation each time the slot
    /// content changes, before any displaced image is disposed.
    pub fn on_commit(&mut self, hook: impl FnMut(u64) + Send + 'static) {
        self.on_commit = Some(Box::new(hook));
    }

    pub fn current(&self) -> Option<&I> {
        self.current.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Bumped on every commit and clear.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn publish(&mut self, image: I) {
        let previous = self.current.replace(image);
        self.commit();
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    /// Empties the slot, disposing its image. Returns whether one was held.
    pub fn clear(&mut self) -> bool {
        match self.current.take() {
            Some(image) => {
                self.commit();
                image.dispose();
                true
            }
            None => false,
        }
    }

    fn commit(&mut self) {
        self.generation += 1;
        trace!(generation = self.generation, "frame slot committed");
        if let Some(hook) = self.on_commit.as_mut() {
            hook(self.generation);
        }
    }
}

impl<I: Dispose> Default for FrameSlot<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Dispose> Drop for FrameSlot<I> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<I: Dispose> fmt::Debug for FrameSlot<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSlot")
            .field("occupied", &self.current.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct TestImage {
        id: u32,
        log: Log,
    }

    impl Dispose for TestImage {
        fn dispose(self) {
            self.log.lock().unwrap().push(format!("dispose {}", self.id));
        }
    }

    fn slot_with_log() -> (FrameSlot<TestImage>, Log) {
        let log: Log = Arc::default();
        let mut slot = FrameSlot::new();
        let sink = Arc::clone(&log);
        slot.on_commit(move |generation| {
            sink.lock().unwrap().push(format!("commit {generation}"));
        });
        (slot, log)
    }

    #[test]
    fn previous_image_is_disposed_after_commit() {
        let (mut slot, log) = slot_with_log();
        slot.publish(TestImage {
            id: 1,
            log: log.clone(),
        });
        slot.publish(TestImage {
            id: 2,
            log: log.clone(),
        });

        assert_eq!(slot.current().map(|image| image.id), Some(2));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["commit 1", "commit 2", "dispose 1"]
        );
    }

    #[test]
    fn clear_disposes_and_empties() {
        let (mut slot, log) = slot_with_log();
        assert!(!slot.clear());
        slot.publish(TestImage {
            id: 7,
            log: log.clone(),
        });
        assert!(slot.clear());
        assert!(slot.is_empty());
        assert_eq!(slot.generation(), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["commit 1", "commit 2", "dispose 7"]
        );
    }

    #[test]
    fn drop_releases_held_image() {
        let log: Log = Arc::default();
        {
            let mut slot = FrameSlot::new();
            slot.publish(TestImage {
                id: 3,
                log: log.clone(),
            });
        }
        assert_eq!(*log.lock().unwrap(), vec!["dispose 3"]);
    }
}
