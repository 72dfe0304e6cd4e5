/// Ordered registry of watch callbacks
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::stats::WatchStatsTracker;
use crate::types::GameServer;

/// Callback receiving every snapshot delivered after its registration
pub type WatchCallback = Box<dyn FnMut(Arc<GameServer>) + Send + 'static>;

/// Identifier of a registered callback, unique within one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of fanning one snapshot out to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Broadcast {
    pub delivered: usize,
    pub failed: usize,
    /// Teardown began before every callback was reached
    pub interrupted: bool,
}

/// Callbacks kept in registration order
///
/// Not synchronized: owned by the watch task and only touched from there.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: Vec<(SubscriberId, WatchCallback)>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback. Ids must be increasing so order follows registration.
    pub fn insert(&mut self, id: SubscriberId, callback: WatchCallback) {
        self.entries.push((id, callback));
    }

    /// Remove a callback, returns whether it was registered
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke every callback in order with the same snapshot
    ///
    /// `closed` is checked before each callback: once teardown has begun the remaining
    /// callbacks are skipped. A panicking callback is logged and counted at once; the
    /// following callbacks still run.
    pub fn broadcast(
        &mut self,
        snapshot: &Arc<GameServer>,
        closed: &AtomicBool,
        stats: &WatchStatsTracker,
    ) -> Broadcast {
        let mut outcome = Broadcast::default();
        for (id, callback) in self.entries.iter_mut() {
            if closed.load(Ordering::Acquire) {
                outcome.interrupted = true;
                break;
            }
            let snapshot = Arc::clone(snapshot);
            match catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
                Ok(()) => outcome.delivered += 1,
                Err(payload) => {
                    outcome.failed += 1;
                    stats.add_callback_failures(1);
                    tracing::error!(
                        "Watch callback {} panicked: {}",
                        id,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        outcome
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field(
                "subscribers",
                &self.entries.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
