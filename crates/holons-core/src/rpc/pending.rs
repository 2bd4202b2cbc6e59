//! Correlation table for outbound calls.
//!
//! Each in-flight `invoke` owns one entry keyed by its correlation id. The
//! read loop resolves entries as responses arrive; the caller removes its own
//! entry on timeout; a dying connection generation fails every entry at once.

use crate::{HolonError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

struct PendingCall {
    slot: oneshot::Sender<Result<Value>>,
    deadline: Instant,
    timeout: Duration,
}

/// In-flight calls of one connection generation.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls").field("len", &self.len()).finish()
    }
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a call and return the receiver its outcome is delivered on.
    ///
    /// Fails if `id` is already in flight.
    pub fn register(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut calls = self.lock();
        if calls.contains_key(id) {
            return Err(HolonError::Other(format!("correlation id {} already in flight", id)));
        }
        let (slot, rx) = oneshot::channel();
        calls.insert(
            id.to_string(),
            PendingCall {
                slot,
                deadline: Instant::now() + timeout,
                timeout,
            },
        );
        Ok(rx)
    }

    /// Deliver an outcome to the call waiting on `id`.
    ///
    /// Returns `false` when nothing is waiting (late or unknown response).
    pub fn resolve(&self, id: &str, outcome: Result<Value>) -> bool {
        match self.lock().remove(id) {
            Some(call) => call.slot.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Drop the entry for `id` without delivering anything.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Fail every in-flight call and clear the table.
    pub fn fail_all(&self, error: impl Fn() -> HolonError) -> usize {
        let drained: Vec<PendingCall> = self.lock().drain().map(|(_, call)| call).collect();
        let count = drained.len();
        for call in drained {
            let _ = call.slot.send(Err(error()));
        }
        count
    }

    /// Fail calls whose deadline has passed, including calls whose caller
    /// went away without cleaning up.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<PendingCall> = {
            let mut calls = self.lock();
            let ids: Vec<String> = calls
                .iter()
                .filter(|(_, call)| call.deadline <= now || call.slot.is_closed())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| calls.remove(id)).collect()
        };
        let count = expired.len();
        for call in expired {
            let _ = call.slot.send(Err(HolonError::Timeout(call.timeout)));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_delivers_result() {
        let pending = PendingCalls::new();
        let rx = pending.register("c1", Duration::from_secs(5)).unwrap();

        assert!(pending.resolve("c1", Ok(json!({"message": "hello"}))));
        assert_eq!(rx.await.unwrap().unwrap(), json!({"message": "hello"}));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let pending = PendingCalls::new();
        let _rx = pending.register("c1", Duration::from_secs(5)).unwrap();
        assert!(pending.register("c1", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_unmatched_resolve_returns_false() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve("ghost", Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_fail_all_clears_table() {
        let pending = PendingCalls::new();
        let rx1 = pending.register("c1", Duration::from_secs(5)).unwrap();
        let rx2 = pending.register("c2", Duration::from_secs(5)).unwrap();

        assert_eq!(pending.fail_all(|| HolonError::Disconnected), 2);
        assert!(pending.is_empty());
        assert!(matches!(rx1.await.unwrap(), Err(HolonError::Disconnected)));
        assert!(matches!(rx2.await.unwrap(), Err(HolonError::Disconnected)));
    }

    #[tokio::test]
    async fn test_sweep_removes_abandoned_calls() {
        let pending = PendingCalls::new();
        let rx = pending.register("c1", Duration::from_secs(60)).unwrap();
        let _live = pending.register("c2", Duration::from_secs(60)).unwrap();
        drop(rx);

        assert_eq!(pending.sweep_expired(), 1);
        assert_eq!(pending.len(), 1);
    }
}
