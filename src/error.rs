//! Error taxonomy and cause-chain unwrapping.
//!
//! Six named error types carry the "why" of a failed call. Every layer of
//! the request pipeline wraps the error it received in a new
//! [`ClientError`] whose message names the layer and whose `source()`
//! points at the underlying error, so the full chain can always be walked
//! back down to the originating typed error with [`unwrap`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// A single schema-validation issue, as returned by a [`SchemaValidator`](crate::validate::SchemaValidator).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Issue {
    /// Path to the offending field, e.g. `["user", "email"]`.
    pub path: Vec<String>,
    /// Human-readable description of the failure.
    pub message: String,
}

impl Issue {
    pub fn new(path: impl IntoIterator<Item = impl Into<String>>, message: impl Into<String>) -> Self {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }
}

/// Minimal information about a non-2xx HTTP response, enough to classify and
/// report on without forcing callers to hold the original `reqwest::Response`.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: u16,
    pub body: String,
}

impl fmt::Display for ResponseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.body)
    }
}

/// Non-2xx HTTP outcome.
#[derive(Debug, Error)]
#[error("HTTP {}", self.response.status)]
pub struct HttpError {
    pub response: ResponseInfo,
}

impl HttpError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            response: ResponseInfo { status, body: body.into() },
        }
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }
}

/// A timeout cancel source fired.
#[derive(Debug, Error)]
#[error("error request timed out after {millis}ms")]
pub struct TimeoutError {
    pub millis: u64,
}

impl TimeoutError {
    pub fn new(duration: Duration) -> Self {
        Self { millis: duration.as_millis() as u64 }
    }
}

/// Caller-provided cancel source fired, or an abort with no more-specific cause.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AbortError {
    pub message: String,
    pub reason: Option<serde_json::Value>,
}

impl AbortError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), reason: None }
    }

    pub fn with_reason(message: impl Into<String>, reason: serde_json::Value) -> Self {
        Self { message: message.into(), reason: Some(reason) }
    }

    pub fn unknown_reason() -> Self {
        Self::new("error signal triggered with unknown reason")
    }
}

/// A schema rejected a payload.
#[derive(Debug, Error)]
#[error("validation failed with {} issue(s)", issues.len())]
pub struct ValidationError {
    pub issues: Vec<Issue>,
}

impl ValidationError {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self { issues }
    }
}

/// The classifier decided not to retry.
#[derive(Debug, Error)]
#[error("retry suppressed after {attempts} attempt(s): {cause}")]
pub struct RetrySuppressedError {
    pub attempts: u32,
    #[source]
    pub cause: Box<ClientError>,
}

/// Bounded retries were depleted.
#[derive(Debug, Error)]
#[error("retry exhausted after {attempts} attempt(s): {cause}")]
pub struct RetryExhaustedError {
    pub attempts: u32,
    #[source]
    pub cause: Box<ClientError>,
}

/// JSON parsing of a response body failed.
#[derive(Debug, Error)]
#[error("parse json")]
pub struct DecodeError {
    #[source]
    pub cause: serde_json::Error,
}

/// Malformed path template, or a required path substitution was missing.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConstructUrlError(pub String);

/// The top-level error type returned by every public operation in this crate.
///
/// Every layer that adds context wraps the error it received in
/// [`ClientError::Wrapped`], whose `source()` is the original error —
/// `unwrap::<T>()` walks that chain to recover a concrete leaf type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Http(#[from] HttpError),

    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    #[error("{0}")]
    Abort(#[from] AbortError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    RetrySuppressed(#[from] RetrySuppressedError),

    #[error("{0}")]
    RetryExhausted(#[from] RetryExhaustedError),

    #[error("{0}")]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    ConstructUrl(#[from] ConstructUrlError),

    /// A low-level transport failure (connection refused, DNS, etc.).
    #[error("{message}")]
    Transport {
        message: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A layer naming itself and pointing at the error it received, per §7:
    /// "error doing request in {op}", "error constructing URL in {op}", ...
    #[error("{message}")]
    Wrapped {
        message: String,
        #[source]
        cause: Box<ClientError>,
    },

    /// An error shared between single-flight cache waiters. Transparent to
    /// `unwrap`/`is` — walking through it costs one extra hop, not a dead end.
    #[error("{0}")]
    Shared(#[source] Arc<ClientError>),

    /// Catch-all for conditions with no dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Wrap `cause` in a new error naming the layer that produced it, per §7.
    pub fn wrap(message: impl Into<String>, cause: ClientError) -> Self {
        ClientError::Wrapped { message: message.into(), cause: Box::new(cause) }
    }

    pub fn transport(message: impl Into<String>, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        ClientError::Transport { message: message.into(), cause: Box::new(cause) }
    }

    /// Is this error (at any depth) a [`TimeoutError`]?
    pub fn is_timeout(&self) -> bool {
        is::<TimeoutError>(self)
    }

    /// Is this error (at any depth) an [`AbortError`]?
    pub fn is_abort(&self) -> bool {
        is::<AbortError>(self)
    }
}

impl From<anyhow::Error> for ClientError {
    fn from(err: anyhow::Error) -> Self {
        ClientError::Other(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Walk the `source()` chain of `err` looking for a node of concrete type
/// `T`, depth-capped at 16 to tolerate accidental cycles (per the spec's
/// Design Notes, the chain is never assumed to be a finite tree).
pub fn unwrap<T: std::error::Error + 'static>(err: &(dyn std::error::Error + 'static)) -> Option<&T> {
    const MAX_DEPTH: usize = 16;
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    for _ in 0..MAX_DEPTH {
        let node = current?;
        if let Some(t) = node.downcast_ref::<T>() {
            return Some(t);
        }
        current = node.source();
    }
    None
}

/// `unwrap::<T>(err).is_some()`.
pub fn is<T: std::error::Error + 'static>(err: &(dyn std::error::Error + 'static)) -> bool {
    unwrap::<T>(err).is_some()
}

/// Shallow variant of [`is`]: only tests the outermost node, never walking
/// into `source()`.
pub fn is_shallow<T: std::error::Error + 'static>(err: &(dyn std::error::Error + 'static)) -> bool {
    err.downcast_ref::<T>().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_finds_leaf_through_wrapped_layers() {
        let leaf = HttpError::new(429, "rate limited");
        let inner = ClientError::from(leaf);
        let middle = ClientError::wrap("error getting cached response in get", inner);
        let outer = ClientError::wrap("error doing request in get", middle);

        let found = unwrap::<HttpError>(&outer).expect("should find HttpError");
        assert_eq!(found.status(), 429);
    }

    #[test]
    fn unwrap_is_none_when_type_absent() {
        let err = ClientError::wrap("error doing request in get", ClientError::Other("boom".into()));
        assert!(unwrap::<HttpError>(&err).is_none());
        assert!(unwrap::<TimeoutError>(&err).is_none());
    }

    #[test]
    fn is_shallow_only_tests_outermost() {
        let leaf = AbortError::new("cancelled");
        let inner = ClientError::from(leaf);
        let wrapped = ClientError::wrap("error doing request in get", inner);

        assert!(!is_shallow::<AbortError>(&wrapped));
        assert!(is::<AbortError>(&wrapped));
    }

    #[test]
    fn unwrap_through_shared_variant() {
        let leaf = HttpError::new(500, "boom");
        let shared = Arc::new(ClientError::from(leaf));
        let err = ClientError::Shared(shared);

        let found = unwrap::<HttpError>(&err).expect("should find HttpError through Shared");
        assert_eq!(found.status(), 500);
    }

    #[test]
    fn retry_suppressed_preserves_cause() {
        let cause = ClientError::from(HttpError::new(429, "rate limited"));
        let suppressed = ClientError::from(RetrySuppressedError { attempts: 1, cause: Box::new(cause) });
        assert!(is::<HttpError>(&suppressed));

        if let ClientError::RetrySuppressed(RetrySuppressedError { attempts, .. }) = &suppressed {
            assert_eq!(*attempts, 1);
        } else {
            panic!("expected RetrySuppressedError");
        }
    }

    #[test]
    fn display_names_the_layer() {
        let err = ClientError::wrap("error doing request in get", ClientError::Other("boom".into()));
        assert_eq!(err.to_string(), "error doing request in get");
    }

    #[test]
    fn duration_is_preserved_in_timeout_error() {
        let err = TimeoutError::new(Duration::from_millis(1500));
        assert_eq!(err.millis, 1500);
    }
}
