//! The request pipeline: orchestrates URL construction, validation, caching,
//! retry/timeout/cancellation, and response decoding for every call.
//!
//! [`Client`] collapses what the teacher split across `ExecCtx` (shared
//! config) and `client.rs`'s free `call_llm*` functions into methods on one
//! orchestrating type, the way the newer `LlmCall::invoke` in the same
//! teacher orchestrates backend + parsing + retry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::{cache_key, TtlCache};
use crate::cancel::{self, CancelReason, CancelToken};
use crate::catalog::{EndpointCatalog, Operation};
use crate::decode::{decode, Decoded};
use crate::error::ClientError;
use crate::retry::{self, RetryPolicy};
use crate::transport::{CredentialsMode, ReqwestTransport, Transport, TransportRequest};
use crate::url_builder::{self, QueryValue};
use crate::validate;

/// Per-call overrides of the client's defaults (§6, "Per-call options").
#[derive(Default, Clone)]
pub struct RequestOptions {
    pub validate: Option<bool>,
    /// `Some(None)` disables the per-attempt timeout; `None` inherits the
    /// client default; `Some(Some(d))` sets an explicit timeout.
    pub timeout: Option<Option<Duration>>,
    pub retry: Option<RetryPolicy>,
    pub cancel: Option<CancelToken>,
    pub headers: HashMap<String, String>,
    pub cache_request: bool,
    pub cache_ttl: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cache(mut self, cache_request: bool) -> Self {
        self.cache_request = cache_request;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// The client-wide configuration (§3, "Client configuration").
pub struct Client {
    base_url: String,
    hostname: String,
    endpoints: EndpointCatalog,
    default_validation: bool,
    default_timeout: Option<Duration>,
    default_retry: RetryPolicy,
    default_headers: HashMap<String, String>,
    credentials_mode: CredentialsMode,
    transport: Arc<dyn Transport>,
    cache: TtlCache<Decoded>,
    client_cancel: CancelToken,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("hostname", &self.hostname)
            .field("endpoint_count", &self.endpoints.len())
            .field("default_validation", &self.default_validation)
            .field("default_timeout", &self.default_timeout)
            .field("disposed", &self.client_cancel.is_aborted())
            .finish()
    }
}

impl Client {
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub fn credentials_mode(&self) -> CredentialsMode {
        self.credentials_mode
    }

    pub fn endpoints(&self) -> &EndpointCatalog {
        &self.endpoints
    }

    /// Build (but do not send) the absolute URL for an endpoint.
    pub fn url(
        &self,
        template: &str,
        path_params: &BTreeMap<String, String>,
        query_params: &[(String, QueryValue)],
    ) -> Result<String, ClientError> {
        let path_and_query = url_builder::build_path_and_query(template, path_params, query_params)?;
        Ok(url_builder::resolve_url(&self.base_url, &self.hostname, &path_and_query))
    }

    pub async fn get(
        &self,
        template: &str,
        path_params: BTreeMap<String, String>,
        query_params: Vec<(String, QueryValue)>,
        opts: RequestOptions,
    ) -> Result<Decoded, ClientError> {
        self.dispatch(Operation::Get, template, path_params, query_params, None, opts).await
    }

    pub async fn post(
        &self,
        template: &str,
        path_params: BTreeMap<String, String>,
        query_params: Vec<(String, QueryValue)>,
        body: Option<Value>,
        opts: RequestOptions,
    ) -> Result<Decoded, ClientError> {
        self.dispatch(Operation::Post, template, path_params, query_params, body, opts).await
    }

    pub async fn put(
        &self,
        template: &str,
        path_params: BTreeMap<String, String>,
        query_params: Vec<(String, QueryValue)>,
        body: Option<Value>,
        opts: RequestOptions,
    ) -> Result<Decoded, ClientError> {
        self.dispatch(Operation::Put, template, path_params, query_params, body, opts).await
    }

    pub async fn patch(
        &self,
        template: &str,
        path_params: BTreeMap<String, String>,
        query_params: Vec<(String, QueryValue)>,
        body: Option<Value>,
        opts: RequestOptions,
    ) -> Result<Decoded, ClientError> {
        self.dispatch(Operation::Patch, template, path_params, query_params, body, opts).await
    }

    pub async fn delete(
        &self,
        template: &str,
        path_params: BTreeMap<String, String>,
        query_params: Vec<(String, QueryValue)>,
        opts: RequestOptions,
    ) -> Result<Decoded, ClientError> {
        self.dispatch(Operation::Delete, template, path_params, query_params, None, opts).await
    }

    /// Bypass JSON decoding and validation entirely, returning the raw body.
    pub async fn download(
        &self,
        template: &str,
        path_params: BTreeMap<String, String>,
        query_params: Vec<(String, QueryValue)>,
        opts: RequestOptions,
    ) -> Result<bytes::Bytes, ClientError> {
        let url = self.url(template, &path_params, &query_params).map_err(|e| ClientError::wrap("error constructing URL in download", ClientError::from(e)))?;
        let base_cancel = self.base_cancel(&opts);
        let retry_policy = opts.retry.clone().unwrap_or_else(|| self.default_retry.clone());
        let classify = retry::default_classifier(&retry_policy);
        let headers = self.merged_headers(&opts);
        let transport = Arc::clone(&self.transport);

        let result = retry::retry(
            || {
                let transport = Arc::clone(&transport);
                let url = url.clone();
                let headers = headers.clone();
                let attempt_cancel = self.attempt_cancel(&opts, base_cancel.as_ref());
                async move {
                    let mut req = TransportRequest::new();
                    for (k, v) in headers {
                        req = req.with_header(k, v);
                    }
                    let response = transport.get(&url, req, attempt_cancel.as_ref()).await?;
                    Ok(response.take_bytes().unwrap_or_default())
                }
            },
            &retry_policy,
            classify,
            base_cancel.as_ref(),
        )
        .await;

        result.map_err(|e| ClientError::wrap("error doing request in download", e))
    }

    /// The orchestration described in §4.9: schema lookup, URL build, request
    /// validation, cache routing, body serialization, signal composition,
    /// retry loop, response validation.
    pub async fn dispatch(
        &self,
        operation: Operation,
        template: &str,
        path_params: BTreeMap<String, String>,
        query_params: Vec<(String, QueryValue)>,
        body: Option<Value>,
        opts: RequestOptions,
    ) -> Result<Decoded, ClientError> {
        let op_name = operation.as_str();

        let descriptor = self
            .endpoints
            .get(template, operation)
            .ok_or_else(|| ClientError::Other(format!("error no schemas found for {template}")))?
            .clone();

        let url = self
            .url(template, &path_params, &query_params)
            .map_err(|e| ClientError::wrap(format!("error constructing URL in {op_name}"), ClientError::from(e)))?;

        let should_validate = opts.validate.unwrap_or(self.default_validation);

        let mut body = body;
        if let (Some(schema), Some(value), true) = (&descriptor.request_schema, &body, should_validate) {
            let validated = validate::validate(schema.as_ref(), value).await.map_err(ClientError::from)?;
            body = Some(validated);
        }

        let headers = self.merged_headers(&opts);

        if operation == Operation::Get && opts.cache_request {
            let key = cache_key(&url, &headers);
            let ttl = opts.cache_ttl;
            let mut loader_opts = opts.clone();
            loader_opts.cache_request = false;
            let result = self
                .cache
                .get(
                    key,
                    || Box::pin(self.dispatch(operation, template, path_params.clone(), query_params.clone(), body.clone(), loader_opts)),
                    ttl,
                )
                .await;
            return result.map_err(|e| ClientError::wrap(format!("error getting cached response in {op_name}"), e));
        }

        let result = self.execute(operation, &url, body, &headers, &opts, &descriptor).await;

        result.map_err(|e| ClientError::wrap(format!("error doing request in {op_name}"), e))
    }

    async fn execute(
        &self,
        operation: Operation,
        url: &str,
        body: Option<Value>,
        headers: &HashMap<String, String>,
        opts: &RequestOptions,
        descriptor: &crate::catalog::MethodDescriptor,
    ) -> Result<Decoded, ClientError> {
        let base_cancel = self.base_cancel(opts);
        let retry_policy = opts.retry.clone().unwrap_or_else(|| self.default_retry.clone());
        let classify = retry::default_classifier(&retry_policy);
        let transport = Arc::clone(&self.transport);

        let mut headers = headers.clone();
        let body_bytes: Option<bytes::Bytes> = match &body {
            Some(value) => {
                if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                    headers.insert("Content-Type".to_string(), "application/json".to_string());
                }
                Some(serde_json::to_vec(value).map_err(|cause| ClientError::from(crate::error::DecodeError { cause }))?.into())
            }
            None => None,
        };

        let decoded = retry::retry(
            || {
                let transport = Arc::clone(&transport);
                let headers = headers.clone();
                let body_bytes = body_bytes.clone();
                let attempt_cancel = self.attempt_cancel(opts, base_cancel.as_ref());
                async move {
                    let mut req = TransportRequest::new();
                    for (k, v) in headers {
                        req = req.with_header(k, v);
                    }
                    if let Some(bytes) = body_bytes {
                        req = req.with_body(bytes);
                    }
                    let response = match operation {
                        Operation::Get => transport.get(url, req, attempt_cancel.as_ref()).await,
                        Operation::Post => transport.post(url, req, attempt_cancel.as_ref()).await,
                        Operation::Put => transport.put(url, req, attempt_cancel.as_ref()).await,
                        Operation::Patch => transport.patch(url, req, attempt_cancel.as_ref()).await,
                        Operation::Delete => transport.delete(url, req, attempt_cancel.as_ref()).await,
                        other => {
                            return Err(ClientError::Other(format!("operation {other:?} is not a transport verb")));
                        }
                    }?;
                    decode(&response)
                }
            },
            &retry_policy,
            classify,
            base_cancel.as_ref(),
        )
        .await?;

        let should_validate = opts.validate.unwrap_or(self.default_validation);
        if should_validate {
            if let Some(schema) = &descriptor.response_schema {
                let value = match &decoded {
                    Decoded::Json(v) => v.clone(),
                    Decoded::Text(t) => Value::String(t.clone()),
                    Decoded::Empty => Value::Null,
                };
                let validated = validate::validate(schema.as_ref(), &value).await?;
                return Ok(Decoded::Json(validated));
            }
        }

        Ok(decoded)
    }

    fn merged_headers(&self, opts: &RequestOptions) -> HashMap<String, String> {
        let mut headers = self.default_headers.clone();
        headers.extend(opts.headers.clone());
        headers
    }

    /// The caller- and client-wide cancel sources, merged once per call.
    /// Deliberately excludes the per-attempt timeout (§5: "a per-call
    /// timeout bounds a single attempt, not the whole retry sequence") so
    /// this token can bound the backoff sleep between attempts without also
    /// expiring the sequence itself.
    fn base_cancel(&self, opts: &RequestOptions) -> Option<CancelToken> {
        cancel::merge(vec![opts.cancel.clone(), Some(self.client_cancel.clone())])
    }

    /// A fresh timeout token merged with `base`, built anew for each
    /// attempt (§5: "each retry creates a fresh timeout token").
    fn attempt_cancel(&self, opts: &RequestOptions, base: Option<&CancelToken>) -> Option<CancelToken> {
        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let timeout_token = timeout.and_then(|d| cancel::timeout_token(Some(d.as_millis() as u64)));
        cancel::merge(vec![timeout_token, base.cloned()])
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn client_cancel(&self) -> &CancelToken {
        &self.client_cancel
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Trigger client-wide cancellation, stop the cache sweep, and release
    /// transport resources. Every in-flight request subscribes to the
    /// client-wide cancel token (§9, "Global cancellation").
    pub fn dispose(&self) {
        self.client_cancel.fire(CancelReason::ClientDisposed);
        self.cache.dispose();
    }
}

/// Builder for [`Client`], mirroring the teacher's `ExecCtxBuilder`.
pub struct ClientBuilder {
    base_url: String,
    hostname: Option<String>,
    endpoints: EndpointCatalog,
    default_validation: bool,
    default_timeout: Option<Duration>,
    default_retry: RetryPolicy,
    default_headers: HashMap<String, String>,
    credentials_mode: CredentialsMode,
    transport: Option<Arc<dyn Transport>>,
    cache_ttl: Duration,
    cache_sweep_interval: Duration,
}

impl ClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            hostname: None,
            endpoints: EndpointCatalog::builder().build(),
            default_validation: true,
            default_timeout: Some(Duration::from_millis(60_000)),
            default_retry: RetryPolicy::default(),
            default_headers: HashMap::new(),
            credentials_mode: CredentialsMode::default(),
            transport: None,
            cache_ttl: Duration::from_millis(500),
            cache_sweep_interval: Duration::from_millis(30_000),
        }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn endpoints(mut self, endpoints: EndpointCatalog) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn default_validation(mut self, enabled: bool) -> Self {
        self.default_validation = enabled;
        self
    }

    /// `None` disables the default per-attempt timeout.
    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn credentials_mode(mut self, mode: CredentialsMode) -> Self {
        self.credentials_mode = mode;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache_sweep_interval = interval;
        self
    }

    pub fn build(self) -> Client {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        let hostname = self.hostname.unwrap_or_else(|| base_url.clone());
        let transport = self.transport.unwrap_or_else(|| Arc::new(ReqwestTransport::new(reqwest::Client::new())));

        Client {
            base_url,
            hostname,
            endpoints: self.endpoints,
            default_validation: self.default_validation,
            default_timeout: self.default_timeout,
            default_retry: self.default_retry,
            default_headers: self.default_headers,
            credentials_mode: self.credentials_mode,
            transport,
            cache: TtlCache::new(self.cache_ttl, self.cache_sweep_interval),
            client_cancel: CancelToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MethodDescriptor;
    use crate::transport::MockTransport;

    fn test_client(mock: Arc<MockTransport>) -> Client {
        Client::builder("https://api.example.com")
            .transport(mock)
            .endpoints(EndpointCatalog::builder().endpoint("/x", Operation::Get, MethodDescriptor::new()).endpoint("/y", Operation::Post, MethodDescriptor::new()).build())
            .default_retry(RetryPolicy::new(0))
            .build()
    }

    #[tokio::test]
    async fn get_returns_decoded_json_body() {
        let mock = Arc::new(MockTransport::new());
        mock.push_response_with_headers(200, [("Content-Type".to_string(), "application/json".to_string())].into(), "{\"a\":1}");
        let client = test_client(mock);

        let result = client.get("/x", BTreeMap::new(), vec![], RequestOptions::new()).await.unwrap();
        match result {
            Decoded::Json(v) => assert_eq!(v, serde_json::json!({"a": 1})),
            other => panic!("expected Json, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_endpoint_fails_before_transport_is_called() {
        let mock = Arc::new(MockTransport::new());
        let client = test_client(mock.clone());

        let err = client.get("/missing", BTreeMap::new(), vec![], RequestOptions::new()).await.unwrap_err();
        assert_eq!(mock.call_count(), 0);
        assert!(err.to_string().contains("no schemas found"));
    }

    #[tokio::test]
    async fn malformed_template_fails_before_transport_is_called() {
        let mock = Arc::new(MockTransport::new());
        let client = Client::builder("https://api.example.com")
            .transport(mock.clone())
            .endpoints(EndpointCatalog::builder().endpoint("/x/{id", Operation::Get, MethodDescriptor::new()).build())
            .build();

        let err = client.get("/x/{id", BTreeMap::new(), vec![], RequestOptions::new()).await.unwrap_err();
        assert_eq!(mock.call_count(), 0);
        assert!(crate::error::is::<crate::error::ConstructUrlError>(&err));
    }

    #[tokio::test]
    async fn get_with_caching_hits_cache_on_second_call() {
        let mock = Arc::new(MockTransport::new());
        mock.push_response_with_headers(200, [("Content-Type".to_string(), "application/json".to_string())].into(), "{\"a\":1}");
        let client = test_client(mock.clone());

        let opts = RequestOptions::new().with_cache(true);
        client.get("/x", BTreeMap::new(), vec![], opts.clone()).await.unwrap();
        client.get("/x", BTreeMap::new(), vec![], opts).await.unwrap();

        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn url_builds_absolute_address_without_sending() {
        let mock = Arc::new(MockTransport::new());
        let client = test_client(mock.clone());
        let url = client.url("/x", &BTreeMap::new(), &[]).unwrap();
        assert_eq!(url, "https://api.example.com/x");
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn dispose_fires_client_wide_cancellation() {
        let mock = Arc::new(MockTransport::new());
        let client = test_client(mock);
        assert!(!client.client_cancel().is_aborted());
        client.dispose();
        assert!(client.client_cancel().is_aborted());
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let mock = Arc::new(MockTransport::new());
        let client = test_client(mock);
        client.dispose();
        client.dispose();
        assert!(client.client_cancel().is_aborted());
    }

    #[tokio::test]
    async fn per_attempt_timeout_does_not_bound_the_whole_retry_sequence() {
        let mock = Arc::new(MockTransport::new());
        mock.push_transport_error("connection refused");
        mock.push_response_with_headers(200, [("Content-Type".to_string(), "application/json".to_string())].into(), "{\"a\":1}");

        let client = Client::builder("https://api.example.com")
            .transport(mock.clone())
            .endpoints(EndpointCatalog::builder().endpoint("/x", Operation::Get, MethodDescriptor::new()).build())
            .default_timeout(Some(Duration::from_millis(20)))
            .default_retry(RetryPolicy::new(1).with_delay(Duration::from_millis(30)))
            .build();

        // The backoff delay alone (30ms) already exceeds the per-attempt
        // timeout (20ms). If the timeout bounded the whole sequence rather
        // than being rebuilt per attempt, the second attempt would be
        // cancelled before it ever reached the transport.
        let result = client.get("/x", BTreeMap::new(), vec![], RequestOptions::new()).await;
        assert!(result.is_ok(), "expected second attempt to succeed, got {result:?}");
        assert_eq!(mock.call_count(), 2);
    }
}
