//! Duplicate call suppression for concurrent loads of the same key.
//!
//! The first caller for a key becomes the leader: the load runs in a
//! spawned task so that a caller dropping its request never cancels a load
//! other callers are waiting on. The in-flight entry is removed from the
//! map before waiters are woken, so a caller arriving after completion
//! always starts a fresh load instead of observing a finished one.

use meshcache_common::{ByteView, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

struct Call {
    notify: Notify,
    result: OnceLock<Result<ByteView>>,
}

impl Call {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            result: OnceLock::new(),
        }
    }

    async fn wait(&self) -> Result<ByteView> {
        loop {
            // Register before checking, so a publish between the check and
            // the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }
            notified.await;
        }
    }
}

/// Collapses concurrent calls for one key into a single execution.
#[derive(Default)]
pub struct SingleFlight {
    calls: Arc<Mutex<HashMap<String, Arc<Call>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` for `key`, unless a call for the same key is already in
    /// flight, in which case wait for it and share its result.
    pub async fn do_call<F>(&self, key: &str, fut: F) -> Result<ByteView>
    where
        F: Future<Output = Result<ByteView>> + Send + 'static,
    {
        let call = match self.join_or_register(key) {
            Ok(existing) => return existing.wait().await,
            Err(call) => call,
        };

        let calls = self.calls.clone();
        let key = key.to_string();
        let publisher = call.clone();
        tokio::spawn(async move {
            let result = fut.await;
            // Delete-then-signal: the entry must be gone before any waiter
            // resumes, so late arrivals start a fresh call.
            calls.lock().remove(&key);
            let _ = publisher.result.set(result);
            publisher.notify.notify_waiters();
        });

        call.wait().await
    }

    /// Returns the existing in-flight call for `key`, or registers and
    /// returns a new one. Kept synchronous so the mutex guard never
    /// lives across an `.await` point.
    fn join_or_register(&self, key: &str) -> std::result::Result<Arc<Call>, Arc<Call>> {
        let mut calls = self.calls.lock();
        if let Some(existing) = calls.get(key) {
            return Ok(existing.clone());
        }
        let call = Arc::new(Call::new());
        calls.insert(key.to_string(), call.clone());
        Err(call)
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}
