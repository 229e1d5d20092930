//! Cancellation composer.
//!
//! [`CancelToken`] is a one-shot, reason-carrying, shareable cancel source.
//! [`timeout_token`] builds one that fires after a duration; [`merge`]
//! combines several into one that fires on whichever input fires first,
//! preserving that input's reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{AbortError, ClientError, TimeoutError};

/// Why a [`CancelToken`] fired.
#[derive(Debug, Clone)]
pub enum CancelReason {
    /// A per-attempt timeout elapsed.
    Timeout(Duration),
    /// The caller aborted, optionally carrying a JSON-serializable reason.
    User(Option<serde_json::Value>),
    /// The owning client was disposed.
    ClientDisposed,
}

impl CancelReason {
    /// Render this reason as the [`ClientError`] a consumer should see.
    pub fn into_error(self) -> ClientError {
        match self {
            CancelReason::Timeout(d) => ClientError::from(TimeoutError::new(d)),
            CancelReason::User(Some(reason)) => {
                ClientError::from(AbortError::with_reason("error request aborted", reason))
            }
            CancelReason::User(None) => ClientError::from(AbortError::new("error request aborted")),
            CancelReason::ClientDisposed => ClientError::from(AbortError::new("error client was disposed")),
        }
    }
}

struct Inner {
    aborted: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    notify: Notify,
}

/// A one-shot, reason-carrying cancel source with a subscriber list.
///
/// Cloning a `CancelToken` shares the same underlying state — all clones see
/// the same abort/reason, which is how a single token can be handed to a
/// retry loop, a transport call, and an SSE reader at once.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Transition to aborted with `reason`, if not already aborted. Wakes
    /// every subscriber currently waiting in [`cancelled`](Self::cancelled).
    /// A second call is a no-op: the first reason to arrive wins.
    pub fn fire(&self, reason: CancelReason) {
        if self
            .inner
            .aborted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.inner.reason.lock().unwrap() = Some(reason);
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.lock().unwrap().clone()
    }

    /// Resolve once this token is aborted. Resolves immediately if it
    /// already is. Used in `tokio::select!` to race against a sleep or a
    /// stream read.
    pub async fn cancelled(&self) {
        loop {
            if self.is_aborted() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after subscribing to avoid missing a fire() that
            // happened between the first is_aborted() check and here.
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Build a timeout cancel source. Returns `None` when `millis` is `None` or
/// `0` (the "false"/disabled case from the spec).
pub fn timeout_token(millis: Option<u64>) -> Option<CancelToken> {
    let millis = match millis {
        Some(0) | None => return None,
        Some(m) => m,
    };
    let token = CancelToken::new();
    let task_token = token.clone();
    let duration = Duration::from_millis(millis);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                task_token.fire(CancelReason::Timeout(duration));
            }
            _ = task_token.cancelled() => {
                // Aborted by some other means before the timer elapsed;
                // nothing further to do, the sleep future is simply dropped.
            }
        }
    });
    Some(token)
}

/// Merge N cancel tokens into one that fires with the *first* input's
/// reason. Drops `None`s; returns the sole survivor unchanged when there is
/// exactly one; returns `None` when there are none.
pub fn merge(tokens: Vec<Option<CancelToken>>) -> Option<CancelToken> {
    let mut tokens: Vec<CancelToken> = tokens.into_iter().flatten().collect();
    match tokens.len() {
        0 => None,
        1 => tokens.pop(),
        _ => {
            let merged = CancelToken::new();
            let task_merged = merged.clone();
            tokio::spawn(async move {
                let waiters = tokens.iter().map(|t| Box::pin(t.cancelled()));
                let (_, idx, _) = futures::future::select_all(waiters).await;
                let reason = tokens[idx]
                    .reason()
                    .unwrap_or_else(|| CancelReason::User(None));
                task_merged.fire(reason);
                // Subscribers on the individual input tokens are untouched —
                // each one is independently owned and may still be consulted
                // by its original creator (e.g. a caller-supplied token that
                // outlives this particular call).
            });
            Some(merged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_token_none_for_disabled() {
        assert!(timeout_token(None).is_none());
        assert!(timeout_token(Some(0)).is_none());
    }

    #[tokio::test]
    async fn timeout_token_fires_after_duration() {
        let token = timeout_token(Some(20)).expect("should build a token");
        assert!(!token.is_aborted());
        token.cancelled().await;
        assert!(token.is_aborted());
        assert!(matches!(token.reason(), Some(CancelReason::Timeout(_))));
    }

    #[tokio::test]
    async fn merge_empty_is_none() {
        assert!(merge(vec![None, None]).is_none());
    }

    #[tokio::test]
    async fn merge_single_returns_same_token() {
        let token = CancelToken::new();
        let merged = merge(vec![Some(token.clone()), None]).unwrap();
        merged.fire(CancelReason::ClientDisposed);
        assert!(token.is_aborted());
    }

    #[tokio::test]
    async fn merge_fires_with_first_reason() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        let merged = merge(vec![Some(a.clone()), Some(b.clone())]).unwrap();

        a.fire(CancelReason::User(Some(serde_json::json!("user-cancelled"))));
        merged.cancelled().await;

        match merged.reason() {
            Some(CancelReason::User(Some(v))) => assert_eq!(v, serde_json::json!("user-cancelled")),
            other => panic!("unexpected reason: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fire_is_idempotent_first_reason_wins() {
        let token = CancelToken::new();
        token.fire(CancelReason::Timeout(Duration::from_millis(5)));
        token.fire(CancelReason::ClientDisposed);
        assert!(matches!(token.reason(), Some(CancelReason::Timeout(_))));
    }
}
