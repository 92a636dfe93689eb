//! Keyed debouncing of delayed async work.
//!
//! Each schedule stamps its key with a fresh generation and spawns a timer.
//! When the timer fires, the task runs only if its generation is still the
//! latest for the key; a newer schedule or a cancel makes it a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Default)]
struct Pending {
    // generations come from one counter so a stale value is never reused
    next: AtomicU64,
    latest: Mutex<HashMap<String, u64>>,
}

impl Pending {
    fn stamp(&self, key: &str) -> u64 {
        let generation = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), generation);
        generation
    }

    /// Clear `key` if `generation` is still its latest; true when it was.
    fn take_if_current(&self, key: &str, generation: u64) -> bool {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        if latest.get(key) == Some(&generation) {
            latest.remove(key);
            true
        } else {
            false
        }
    }

    fn cancel(&self, key: &str) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }

    fn len(&self) -> usize {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct Debouncer {
    delay: Duration,
    pending: Arc<Pending>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Pending::default()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the delay unless `key` is scheduled again or cancelled first.
    ///
    /// The handle resolves to `None` when the task was superseded.
    pub fn schedule<F, Fut>(&self, key: &str, task: F) -> JoinHandle<Option<Fut::Output>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let generation = self.pending.stamp(key);
        let pending = Arc::clone(&self.pending);
        let key = key.to_string();
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !pending.take_if_current(&key, generation) {
                tracing::debug!(key = %key, generation, "debounced task superseded");
                return None;
            }
            tracing::debug!(key = %key, generation, "debounced task firing");
            Some(task().await)
        })
    }

    /// Drop the pending task for `key`; true if one was waiting.
    pub fn cancel(&self, key: &str) -> bool {
        self.pending.cancel(key)
    }

    /// Number of keys with a task still waiting on its timer.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
