//! The retry engine: a bounded, fixed-delay retry loop with predicate-driven
//! classification of transient vs. terminal failures.
//!
//! Total tries = `max_attempts + 1`. The delay between attempts is fixed —
//! no exponential backoff, no jitter — per §4.6 of the spec this crate
//! implements. `max_attempts = 0` means "try once, do not retry."

use std::collections::HashSet;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{AbortError, ClientError, HttpError, RetryExhaustedError, RetrySuppressedError, TimeoutError};

/// What the classifier decided to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Try again (subject to `max_attempts`).
    Retry,
    /// Give up now, regardless of remaining attempts.
    Stop,
}

/// The `{max_attempts, delay, classify}` triple governing the retry loop.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Number of retries *after* the first attempt. Total tries = this + 1.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// HTTP statuses that should be retried.
    pub retry_status_codes: HashSet<u16>,
    /// HTTP statuses that should immediately stop retrying, overriding
    /// `retry_status_codes`.
    pub ignore_status_codes: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_millis(1000),
            retry_status_codes: [408, 429, 500, 501, 502, 503, 504].into_iter().collect(),
            ignore_status_codes: HashSet::new(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_ignore_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.ignore_status_codes = codes.into_iter().collect();
        self
    }
}

/// The default classifier used by the request pipeline (§4.6), applied in
/// order, first match wins:
/// 1. [`TimeoutError`] → retry.
/// 2. [`AbortError`] → stop (caller-driven cancellation is authoritative).
/// 3. A transport-level failure (no HTTP response at all) → retry.
/// 4. [`HttpError`]: ignore-set → stop; retry-set → retry; else stop.
/// 5. Anything else → stop.
pub fn default_classifier(policy: &RetryPolicy) -> impl Fn(&ClientError) -> Classification + '_ {
    move |err: &ClientError| {
        let as_err: &(dyn std::error::Error + 'static) = err;
        if crate::error::is::<TimeoutError>(as_err) {
            return Classification::Retry;
        }
        if crate::error::is::<AbortError>(as_err) {
            return Classification::Stop;
        }
        if let Some(http) = crate::error::unwrap::<HttpError>(as_err) {
            let status = http.status();
            if policy.ignore_status_codes.contains(&status) {
                return Classification::Stop;
            }
            if policy.retry_status_codes.contains(&status) {
                return Classification::Retry;
            }
            return Classification::Stop;
        }
        if matches!(err, ClientError::Transport { .. }) {
            return Classification::Retry;
        }
        Classification::Stop
    }
}

/// Run `f` under `policy`, classifying each failure with `classify`.
///
/// - On success, returns `Ok(value)`.
/// - If `classify` returns [`Classification::Stop`], returns
///   [`RetrySuppressedError`] wrapping the triggering error.
/// - If attempts are exhausted (and `classify` kept saying `Retry`), returns
///   [`RetryExhaustedError`].
/// - If `cancel` fires while sleeping between attempts, the sleep wakes
///   immediately and no further attempts are made.
pub async fn retry<F, Fut, T>(
    mut f: F,
    policy: &RetryPolicy,
    classify: impl Fn(&ClientError) -> Classification,
    cancel: Option<&CancelToken>,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ClientError>>,
{
    let mut attempt: u32 = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::debug!(attempt, error = %err, "retry: attempt failed");
                match classify(&err) {
                    Classification::Stop => {
                        tracing::warn!(attempt, "retry: suppressed by classifier");
                        return Err(ClientError::from(RetrySuppressedError { attempts: attempt, cause: Box::new(err) }));
                    }
                    Classification::Retry => {
                        if attempt > policy.max_attempts {
                            tracing::warn!(attempt, "retry: attempts exhausted");
                            return Err(ClientError::from(RetryExhaustedError { attempts: attempt, cause: Box::new(err) }));
                        }
                        if let Some(token) = cancel {
                            tokio::select! {
                                _ = tokio::time::sleep(policy.delay) => {}
                                _ = token.cancelled() => {
                                    return Err(token
                                        .reason()
                                        .map(crate::cancel::CancelReason::into_error)
                                        .unwrap_or_else(|| ClientError::from(AbortError::unknown_reason())));
                                }
                            }
                        } else {
                            tokio::time::sleep(policy.delay).await;
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn always_retry(_: &ClientError) -> Classification {
        Classification::Retry
    }

    fn stop_on_first(_: &ClientError) -> Classification {
        Classification::Stop
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts_plus_one_calls() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2).with_delay(Duration::from_millis(1));

        let result: Result<(), ClientError> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Other("always fails".into())) }
            },
            &policy,
            always_retry,
            None,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3); // max_attempts + 1
        assert!(matches!(result, Err(ClientError::RetryExhausted(_))));
    }

    #[tokio::test]
    async fn stop_on_first_invokes_fn_exactly_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5).with_delay(Duration::from_millis(1));

        let result: Result<(), ClientError> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Other("boom".into())) }
            },
            &policy,
            stop_on_first,
            None,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ClientError::RetrySuppressed(_))));
    }

    #[tokio::test]
    async fn succeeds_without_retrying_after_recovery() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2).with_delay(Duration::from_millis(1));

        let result = retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ClientError::Other("transient".into()))
                    } else {
                        Ok(42)
                    }
                }
            },
            &policy,
            always_retry,
            None,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn default_classifier_retries_timeout_and_transport() {
        let policy = RetryPolicy::default();
        let classify = default_classifier(&policy);

        let timeout_err = ClientError::from(TimeoutError::new(Duration::from_secs(1)));
        assert_eq!(classify(&timeout_err), Classification::Retry);

        let transport_err = ClientError::transport("connect failed", std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(classify(&transport_err), Classification::Retry);
    }

    #[tokio::test]
    async fn default_classifier_stops_on_abort() {
        let policy = RetryPolicy::default();
        let classify = default_classifier(&policy);
        let abort_err = ClientError::from(AbortError::new("cancelled"));
        assert_eq!(classify(&abort_err), Classification::Stop);
    }

    #[tokio::test]
    async fn default_classifier_honors_ignore_set_over_retry_set() {
        let policy = RetryPolicy::default().with_ignore_status_codes([429]);
        let classify = default_classifier(&policy);
        let http_err = ClientError::from(HttpError::new(429, "rate limited"));
        assert_eq!(classify(&http_err), Classification::Stop);
    }

    #[tokio::test]
    async fn default_classifier_retries_known_status_and_stops_on_unknown() {
        let policy = RetryPolicy::default();
        let classify = default_classifier(&policy);
        assert_eq!(classify(&ClientError::from(HttpError::new(503, "unavailable"))), Classification::Retry);
        assert_eq!(classify(&ClientError::from(HttpError::new(400, "bad request"))), Classification::Stop);
    }

    #[tokio::test]
    async fn cancellation_wakes_backoff_sleep_immediately() {
        let policy = RetryPolicy::new(5).with_delay(Duration::from_secs(30));
        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.fire(crate::cancel::CancelReason::User(None));
        });

        let start = std::time::Instant::now();
        let result: Result<(), ClientError> = retry(
            || async { Err(ClientError::Other("transient".into())) },
            &policy,
            always_retry,
            Some(&cancel),
        )
        .await;

        assert!(start.elapsed() < Duration::from_secs(1), "should not wait out the full 30s delay");
        assert!(matches!(result, Err(ClientError::Abort(_))));
    }

    #[test]
    fn max_attempts_zero_means_try_once() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts, 0);
    }
}
