//! Transport adapter: a thin, object-safe wrapper over an HTTP primitive.
//!
//! [`Transport`] is the capability the request pipeline depends on instead of
//! a concrete `reqwest::Client`, mirroring the way the teacher decouples its
//! pipeline from a specific LLM provider via the `Backend` trait.
//! [`ReqwestTransport`] is the production implementation; [`MockTransport`] is
//! a hand-rolled test double, since the pack carries no HTTP-mocking crate
//! for this lineage.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::cancel::CancelToken;
use crate::error::{ClientError, HttpError};

/// How credentials (cookies, auth headers tied to the user agent) should be
/// sent with a request. Mirrors `fetch`'s `credentials` modes from §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    #[default]
    SameOrigin,
    Include,
    Omit,
}

/// A verb-agnostic request description handed to [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct TransportRequest {
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub credentials: CredentialsMode,
}

impl TransportRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// The crate's own response wrapper — never `reqwest::Response` directly, so
/// [`crate::decode`] and the pipeline stay decoupled from a concrete
/// transport (§9, "polymorphic provider capability").
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    body: Mutex<Option<Bytes>>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: Bytes) -> Self {
        Self { status, headers, body: Mutex::new(Some(body)) }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// Consume the body as raw bytes. Can only be called once; the body is
    /// read exactly once per the Design Notes' "avoid double body
    /// consumption" rule.
    pub fn take_bytes(&self) -> Option<Bytes> {
        self.body.lock().unwrap().take()
    }

    /// Consume the body as UTF-8 text. Lossy on invalid UTF-8 rather than
    /// erroring, matching a `text()`-style read.
    pub fn take_text(&self) -> Option<String> {
        self.take_bytes().map(|b| String::from_utf8_lossy(&b).into_owned())
    }
}

/// A byte chunk from an open SSE connection, or the signal that the stream
/// ended (EOF or transport error).
pub enum SseChunk {
    Data(Bytes),
    Eof,
}

/// The capability the request pipeline and SSE reader depend on.
///
/// Object-safe so callers can supply a boxed implementation (e.g. a mocked
/// transport in tests) without the pipeline depending on a concrete type.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError>;
    async fn post(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError>;
    async fn put(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError>;
    async fn patch(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError>;
    async fn delete(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError>;

    /// Open a GET request as an SSE stream, returning a channel of raw byte
    /// chunks as they arrive. Opening failures surface before any chunk is
    /// produced.
    async fn open_sse(
        &self,
        url: &str,
        req: TransportRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<tokio::sync::mpsc::Receiver<SseChunk>, ClientError>;
}

/// Production implementation backed by `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request(&self, method: reqwest::Method, url: &str, req: &TransportRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }
        builder
    }

    async fn send(&self, method: reqwest::Method, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        let builder = self.build_request(method, url, &req);
        let send_fut = builder.send();

        let response = if let Some(token) = cancel {
            tokio::select! {
                result = send_fut => result.map_err(|e| ClientError::transport("wrap host-call", e))?,
                _ = token.cancelled() => {
                    return Err(token
                        .reason()
                        .map(crate::cancel::CancelReason::into_error)
                        .unwrap_or_else(|| ClientError::from(crate::error::AbortError::unknown_reason())));
                }
            }
        } else {
            send_fut.await.map_err(|e| ClientError::transport("wrap host-call", e))?
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response.bytes().await.map_err(|e| ClientError::transport("wrap host-call", e))?;

        let http_response = HttpResponse::new(status, headers, body);
        if !http_response.ok() {
            let text = http_response.take_text().unwrap_or_default();
            return Err(ClientError::from(HttpError::new(status, text)));
        }
        Ok(http_response)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.send(reqwest::Method::GET, url, req, cancel).await
    }

    async fn post(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.send(reqwest::Method::POST, url, req, cancel).await
    }

    async fn put(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.send(reqwest::Method::PUT, url, req, cancel).await
    }

    async fn patch(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.send(reqwest::Method::PATCH, url, req, cancel).await
    }

    async fn delete(&self, url: &str, req: TransportRequest, cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.send(reqwest::Method::DELETE, url, req, cancel).await
    }

    async fn open_sse(
        &self,
        url: &str,
        mut req: TransportRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<tokio::sync::mpsc::Receiver<SseChunk>, ClientError> {
        req.headers.insert("Accept".into(), "text/event-stream".into());
        req.headers.insert("Connection".into(), "keep-alive".into());

        let builder = self.build_request(reqwest::Method::GET, url, &req);
        let send_fut = builder.send();

        let response = if let Some(token) = cancel {
            tokio::select! {
                result = send_fut => result.map_err(|e| ClientError::transport("wrap host-call", e))?,
                _ = token.cancelled() => {
                    return Err(token
                        .reason()
                        .map(crate::cancel::CancelReason::into_error)
                        .unwrap_or_else(|| ClientError::from(crate::error::AbortError::unknown_reason())));
                }
            }
        } else {
            send_fut.await.map_err(|e| ClientError::transport("wrap host-call", e))?
        };

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from(HttpError::new(status, body)));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let mut stream = response.bytes_stream();
        let cancel_owned = cancel.cloned();
        tokio::spawn(async move {
            use futures::StreamExt;
            loop {
                let next = stream.next();
                let item = if let Some(token) = &cancel_owned {
                    tokio::select! {
                        item = next => item,
                        _ = token.cancelled() => break,
                    }
                } else {
                    next.await
                };
                match item {
                    Some(Ok(bytes)) => {
                        if tx.send(SseChunk::Data(bytes)).await.is_err() {
                            break;
                        }
                    }
                    _ => {
                        let _ = tx.send(SseChunk::Eof).await;
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// Hand-rolled test double implementing [`Transport`] with canned responses,
/// mirroring the teacher's `MockBackend`.
pub struct MockTransport {
    responses: Mutex<std::collections::VecDeque<Result<(u16, HashMap<String, String>, Bytes), String>>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self { responses: Mutex::new(std::collections::VecDeque::new()), calls: Mutex::new(Vec::new()) }
    }

    /// Queue a successful response, served in FIFO order.
    pub fn push_response(&self, status: u16, body: impl Into<Bytes>) {
        self.responses.lock().unwrap().push_back(Ok((status, HashMap::new(), body.into())));
    }

    pub fn push_response_with_headers(&self, status: u16, headers: HashMap<String, String>, body: impl Into<Bytes>) {
        self.responses.lock().unwrap().push_back(Ok((status, headers, body.into())));
    }

    /// Queue a transport-level failure (connection refused, DNS, etc.).
    pub fn push_transport_error(&self, message: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Err(message.into()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next(&self, method: &str, url: &str) -> Result<HttpResponse, ClientError> {
        self.calls.lock().unwrap().push((method.to_string(), url.to_string()));
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            None => Err(ClientError::transport("wrap host-call", std::io::Error::new(std::io::ErrorKind::NotFound, "no queued response"))),
            Some(Err(message)) => Err(ClientError::transport("wrap host-call", std::io::Error::new(std::io::ErrorKind::ConnectionRefused, message))),
            Some(Ok((status, headers, body))) => {
                let response = HttpResponse::new(status, headers, body);
                if !response.ok() {
                    let text = response.take_text().unwrap_or_default();
                    Err(ClientError::from(HttpError::new(status, text)))
                } else {
                    Ok(response)
                }
            }
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, _req: TransportRequest, _cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.next("GET", url)
    }

    async fn post(&self, url: &str, _req: TransportRequest, _cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.next("POST", url)
    }

    async fn put(&self, url: &str, _req: TransportRequest, _cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.next("PUT", url)
    }

    async fn patch(&self, url: &str, _req: TransportRequest, _cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.next("PATCH", url)
    }

    async fn delete(&self, url: &str, _req: TransportRequest, _cancel: Option<&CancelToken>) -> Result<HttpResponse, ClientError> {
        self.next("DELETE", url)
    }

    async fn open_sse(
        &self,
        url: &str,
        _req: TransportRequest,
        _cancel: Option<&CancelToken>,
    ) -> Result<tokio::sync::mpsc::Receiver<SseChunk>, ClientError> {
        let response = self.next("GET", url)?;
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        if let Some(bytes) = response.take_bytes() {
            tokio::spawn(async move {
                let _ = tx.send(SseChunk::Data(bytes)).await;
                let _ = tx.send(SseChunk::Eof).await;
            });
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_serves_queued_responses_fifo() {
        let mock = MockTransport::new();
        mock.push_response(200, "first");
        mock.push_response(200, "second");

        let first = mock.get("/x", TransportRequest::new(), None).await.unwrap();
        assert_eq!(first.take_text().unwrap(), "first");
        let second = mock.get("/x", TransportRequest::new(), None).await.unwrap();
        assert_eq!(second.take_text().unwrap(), "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_transport_non_2xx_becomes_http_error() {
        let mock = MockTransport::new();
        mock.push_response(404, "not found");
        let err = mock.get("/x", TransportRequest::new(), None).await.unwrap_err();
        assert!(crate::error::is::<HttpError>(&err));
    }

    #[tokio::test]
    async fn mock_transport_error_becomes_transport_error() {
        let mock = MockTransport::new();
        mock.push_transport_error("connection refused");
        let err = mock.get("/x", TransportRequest::new(), None).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
    }

    #[test]
    fn http_response_body_can_only_be_taken_once() {
        let response = HttpResponse::new(200, HashMap::new(), Bytes::from_static(b"hi"));
        assert_eq!(response.take_text().unwrap(), "hi");
        assert!(response.take_text().is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let response = HttpResponse::new(200, headers, Bytes::new());
        assert_eq!(response.header("content-type"), Some("application/json"));
    }
}
