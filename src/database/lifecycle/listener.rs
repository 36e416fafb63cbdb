//! Lifecycle listener
//!
//! A single observer of primary-database transitions. There is at most one
//! listener per coordinator; setting a new one drops the old one.

use crate::database::core::DatabaseHandle;

use super::migration::{Transition, TransitionKind};

/// Callbacks fired after a primary open sequence succeeds
///
/// All methods default to doing nothing. `on_open` fires after every
/// successful open, following the transition callback (if any).
pub trait LifecycleListener: Send {
    fn on_create(&mut self, _handle: &DatabaseHandle) {}

    /// Fired once per version hop, in ascending order
    fn on_upgrade(&mut self, _handle: &DatabaseHandle, _from: u32, _to: u32) {}

    fn on_downgrade(&mut self, _handle: &DatabaseHandle, _from: u32, _to: u32) {}

    fn on_open(&mut self, _handle: &DatabaseHandle) {}
}

/// Replay a finished transition to `listener` in callback order
pub(crate) fn notify(listener: &mut dyn LifecycleListener, handle: &DatabaseHandle, transition: &Transition) {
    match transition.kind {
        TransitionKind::Create => listener.on_create(handle),
        TransitionKind::Upgrade => {
            for &(from, to) in &transition.hops {
                listener.on_upgrade(handle, from, to);
            }
        }
        TransitionKind::Downgrade => {
            listener.on_downgrade(handle, transition.from_version, transition.to_version)
        }
        TransitionKind::NoOp => {}
    }
    listener.on_open(handle);
}

/// Lifecycle event as recorded by [`RecordingListener`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Create,
    Upgrade { from: u32, to: u32 },
    Downgrade { from: u32, to: u32 },
    Open,
}

/// Listener that appends every callback to a shared log
///
/// Handy for tests and for callers that want to inspect what an open did.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: std::sync::Arc<std::sync::Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl LifecycleListener for RecordingListener {
    fn on_create(&mut self, _handle: &DatabaseHandle) {
        self.push(LifecycleEvent::Create);
    }

    fn on_upgrade(&mut self, _handle: &DatabaseHandle, from: u32, to: u32) {
        self.push(LifecycleEvent::Upgrade { from, to });
    }

    fn on_downgrade(&mut self, _handle: &DatabaseHandle, from: u32, to: u32) {
        self.push(LifecycleEvent::Downgrade { from, to });
    }

    fn on_open(&mut self, _handle: &DatabaseHandle) {
        self.push(LifecycleEvent::Open);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{ConnectionOptions, Role};

    #[test]
    fn test_notify_order() {
        let handle = DatabaseHandle::open(None, Role::Primary, &ConnectionOptions::default()).unwrap();
        let recorder = RecordingListener::new();
        let mut listener = recorder.clone();

        let transition = Transition {
            kind: TransitionKind::Upgrade,
            from_version: 1,
            to_version: 3,
            hops: vec![(1, 2), (2, 3)],
            applied: vec![2, 3],
        };
        notify(&mut listener, &handle, &transition);

        assert_eq!(
            recorder.events(),
            vec![
                LifecycleEvent::Upgrade { from: 1, to: 2 },
                LifecycleEvent::Upgrade { from: 2, to: 3 },
                LifecycleEvent::Open,
            ]
        );
    }
}
