//! TTL cache with single-flight coalescing.
//!
//! At most one `loader` runs per key at a time: concurrent callers for a
//! missing key subscribe to the same in-flight [`Pending`] slot and all
//! observe its eventual result. A failed load is never cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::ClientError;

/// A cache key, built by the request pipeline from a URL and its merged
/// headers (see `cache_key`).
pub type CacheKey = String;

enum Slot<V> {
    Ready { value: V, expires_at: Instant },
    Pending(Arc<PendingState<V>>),
}

struct PendingState<V> {
    notify: Notify,
    result: Mutex<Option<Result<V, Arc<ClientError>>>>,
}

/// Deterministic cache key: `[url, [[name, value], ...]]` as a JSON tuple,
/// header names lowercased and sorted, per §4.7 and the Open Question
/// resolution in DESIGN.md (deterministic form over a hash, for portability).
pub fn cache_key(url: &str, headers: &HashMap<String, String>) -> CacheKey {
    let mut pairs: Vec<(String, String)> = headers.iter().map(|(k, v)| (k.to_lowercase(), v.clone())).collect();
    pairs.sort();
    let tuple = serde_json::json!([url, pairs]);
    tuple.to_string()
}

/// Keyed TTL store with single-flight coalescing and a background sweep.
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    slots: Arc<Mutex<HashMap<CacheKey, Slot<V>>>>,
    ttl: Arc<Mutex<Duration>>,
    sweep_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let cache = Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ttl: Arc::new(Mutex::new(ttl)),
            sweep_handle: Mutex::new(None),
        };
        cache.start_sweep(sweep_interval);
        cache
    }

    fn start_sweep(&self, interval: Duration) {
        let slots = Arc::clone(&self.slots);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                slots.lock().unwrap().retain(|_, slot| match slot {
                    Slot::Ready { expires_at, .. } => *expires_at > now,
                    Slot::Pending(_) => true,
                });
            }
        });
        *self.sweep_handle.lock().unwrap() = Some(handle);
    }

    /// Fetch `key`, running `loader` at most once across all concurrent
    /// callers. `ttl_override` replaces the cache's default TTL for this
    /// entry only.
    pub async fn get<F, Fut>(&self, key: CacheKey, loader: F, ttl_override: Option<Duration>) -> Result<V, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, ClientError>>,
    {
        let pending = {
            let mut slots = self.slots.lock().unwrap();
            match slots.get(&key) {
                Some(Slot::Ready { value, expires_at }) if *expires_at > Instant::now() => {
                    return Ok(value.clone());
                }
                Some(Slot::Pending(state)) => Some(Arc::clone(state)),
                _ => {
                    let state = Arc::new(PendingState { notify: Notify::new(), result: Mutex::new(None) });
                    slots.insert(key.clone(), Slot::Pending(Arc::clone(&state)));
                    None
                }
            }
        };

        if let Some(state) = pending {
            return Self::await_pending(state).await;
        }

        let outcome = loader().await;
        let ttl = ttl_override.unwrap_or_else(|| *self.ttl.lock().unwrap());

        let state = {
            let mut slots = self.slots.lock().unwrap();
            match slots.remove(&key) {
                Some(Slot::Pending(state)) => state,
                _ => Arc::new(PendingState { notify: Notify::new(), result: Mutex::new(None) }),
            }
        };

        match outcome {
            Ok(value) => {
                self.slots.lock().unwrap().insert(key, Slot::Ready { value: value.clone(), expires_at: Instant::now() + ttl });
                *state.result.lock().unwrap() = Some(Ok(value.clone()));
                state.notify.notify_waiters();
                Ok(value)
            }
            Err(err) => {
                // A failed load is never cached (§4.7) — the slot was
                // already removed above, leaving the key absent.
                let shared = Arc::new(err);
                *state.result.lock().unwrap() = Some(Err(Arc::clone(&shared)));
                state.notify.notify_waiters();
                Err(ClientError::Shared(shared))
            }
        }
    }

    async fn await_pending(state: Arc<PendingState<V>>) -> Result<V, ClientError> {
        loop {
            // Register as a waiter *before* re-checking the result: `Notify`'s
            // `notify_waiters` only wakes tasks already enrolled, so enabling
            // the future first closes the window where the loader could
            // finish and notify between our check and the `.await` below.
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let result = state.result.lock().unwrap();
                if let Some(outcome) = result.as_ref() {
                    return outcome.clone().map_err(ClientError::Shared);
                }
            }

            notified.await;
        }
    }

    /// Reconfigure the cache. Changing `ttl` invalidates all current entries
    /// (cached and pending, per §4.7); `sweep_interval` alone does not.
    pub fn configure(&self, ttl: Option<Duration>, sweep_interval: Option<Duration>) {
        if let Some(ttl) = ttl {
            *self.ttl.lock().unwrap() = ttl;
            self.slots.lock().unwrap().clear();
        }
        if let Some(interval) = sweep_interval {
            if let Some(handle) = self.sweep_handle.lock().unwrap().take() {
                handle.abort();
            }
            self.start_sweep(interval);
        }
    }

    /// Stop the sweep timer and drop all entries.
    pub fn dispose(&self) {
        if let Some(handle) = self.sweep_handle.lock().unwrap().take() {
            handle.abort();
        }
        self.slots.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Send + Sync + 'static> Drop for TtlCache<V> {
    fn drop(&mut self) {
        self.dispose();
    }
}
