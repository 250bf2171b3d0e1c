//! In-flight request bookkeeping
//!
//! Each connection owns one [`AwaitingRegistry`]. Entries are removed
//! exactly once: by a matching response, by the timeout sweep, or by
//! close. Completion callbacks always run after the lock is released.

use courier_core::{CourierError, MessageId, Response, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Completion callback for one request
pub type Completion = Box<dyn FnOnce(Result<Option<Value>>) + Send>;

/// A request that has been written and not yet answered
pub struct AwaitingRequest {
    id: MessageId,
    method: String,
    sent_at: Instant,
    complete: Completion,
}

impl AwaitingRequest {
    pub fn new(id: MessageId, method: impl Into<String>, complete: Completion) -> Self {
        Self {
            id,
            method: method.into(),
            sent_at: Instant::now(),
            complete,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }

    /// Finish with the peer's response
    pub fn resolve(self, response: Response) {
        (self.complete)(response.into_outcome());
    }

    /// Finish with a local failure
    pub fn fail(self, err: CourierError) {
        (self.complete)(Err(err));
    }
}

/// Concurrency-safe table of awaiting requests
#[derive(Default)]
pub struct AwaitingRegistry {
    entries: Mutex<HashMap<MessageId, AwaitingRequest>>,
}

impl AwaitingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MessageId, AwaitingRequest>> {
        // Callbacks never run under the lock, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an entry. Returns `false`, leaving the table untouched, if a
    /// request with the same id is already waiting.
    pub fn insert(&self, entry: AwaitingRequest) -> bool {
        match self.lock().entry(entry.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Remove and return the entry for `id`
    pub fn take(&self, id: &MessageId) -> Option<AwaitingRequest> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Instant at which the oldest entry expires
    pub fn earliest_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.lock()
            .values()
            .map(|entry| entry.sent_at + timeout)
            .min()
    }

    /// Fail every entry at least `timeout` old; returns how many expired
    pub fn sweep(&self, timeout: Duration) -> usize {
        let expired: Vec<AwaitingRequest> = {
            let mut entries = self.lock();
            let ids: Vec<MessageId> = entries
                .values()
                .filter(|entry| entry.elapsed() >= timeout)
                .map(|entry| entry.id)
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        let count = expired.len();
        for entry in expired {
            let elapsed = entry.elapsed();
            debug!(
                "Request {} ({}) timed out after {}ms",
                entry.id,
                entry.method,
                elapsed.as_millis()
            );
            let id = entry.id;
            entry.fail(CourierError::Timeout { id, elapsed });
        }
        count
    }

    /// Fail and remove every entry
    pub fn fail_all(&self, err: &CourierError) -> usize {
        let drained: Vec<AwaitingRequest> = self.lock().drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            entry.fail(err.clone());
        }
        count
    }
}
