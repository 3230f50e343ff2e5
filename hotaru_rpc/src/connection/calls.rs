//! The outstanding call table (§3): maps an allocated `MessageId` to the
//! pending RMI call waiting on it, generalized from the teacher's
//! `ClientRegistry` (a `RwLock<HashMap<...>>` behind process-wide access)
//! down to a single connection's lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::RwLock;
use tokio::sync::oneshot;

use crate::error::ControllerErrorKind;

/// What a pending call is eventually resolved with.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Result(serde_json::Value),
    Exception(ControllerErrorKind),
}

/// Per-connection table of in-flight RMI calls (§3's "Outstanding call
/// table"). `MessageId` allocation is monotonic and starts at 1 (0 is
/// reserved as "none", per the connection-wide invariant).
pub struct CallTable {
    next_id: AtomicI32,
    entries: RwLock<HashMap<i32, oneshot::Sender<CallOutcome>>>,
}

impl CallTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn allocate_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Inserts a new waiter for `id` and returns the receiving half it
    /// should await. Panics if `id` is already registered — the caller
    /// always pairs this with a freshly allocated id.
    pub fn register(&self, id: i32) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.write();
        let previous = entries.insert(id, tx);
        debug_assert!(previous.is_none(), "MessageId {id} reused while still in flight");
        rx
    }

    /// Matches a response to its waiter by id, consuming the table entry.
    /// Returns `false` (and drops the outcome) if no such call is
    /// in-flight — the response is late, duplicated, or for an id this
    /// connection never issued, and is logged by the caller, never
    /// matched twice.
    pub fn complete(&self, id: i32, outcome: CallOutcome) -> bool {
        let sender = self.entries.write().remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Removes a call's entry without resolving it further (used after a
    /// waiter observes its own oneshot was already fulfilled).
    pub fn remove(&self, id: i32) {
        self.entries.write().remove(&id);
    }

    /// Drains every outstanding call with `OperationCancelled`, as
    /// required on entering `Closed`/`Broken` (§4.2.4).
    pub fn cancel_all(&self) {
        let mut entries = self.entries.write();
        for (_, sender) in entries.drain() {
            let _ = sender.send(CallOutcome::Exception(ControllerErrorKind::OperationCancelled));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for CallTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let table = CallTable::new();
        assert_eq!(table.allocate_id(), 1);
        assert_eq!(table.allocate_id(), 2);
        assert_eq!(table.allocate_id(), 3);
    }

    #[tokio::test]
    async fn complete_resolves_the_matching_waiter_exactly_once() {
        let table = CallTable::new();
        let id = table.allocate_id();
        let rx = table.register(id);
        assert!(table.complete(id, CallOutcome::Result(serde_json::json!(42))));
        assert!(!table.complete(id, CallOutcome::Result(serde_json::json!(43))));
        match rx.await.unwrap() {
            CallOutcome::Result(v) => assert_eq!(v, serde_json::json!(42)),
            _ => panic!("expected a result"),
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_releases_every_waiter() {
        let table = CallTable::new();
        let id_a = table.allocate_id();
        let id_b = table.allocate_id();
        let rx_a = table.register(id_a);
        let rx_b = table.register(id_b);
        table.cancel_all();
        assert!(matches!(
            rx_a.await.unwrap(),
            CallOutcome::Exception(ControllerErrorKind::OperationCancelled)
        ));
        assert!(matches!(
            rx_b.await.unwrap(),
            CallOutcome::Exception(ControllerErrorKind::OperationCancelled)
        ));
        assert!(table.is_empty());
    }
}
