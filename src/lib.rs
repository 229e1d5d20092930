//! # Endpoint Client
//!
//! A schema-typed HTTP/SSE client. Given a declarative [`catalog::EndpointCatalog`]
//! of path templates — each endpoint annotated with optional path-parameter,
//! query-parameter, request-body, and response schemas — [`Client`] issues
//! requests, validates payloads, retries and times out transport calls,
//! caches idempotent `GET` responses with single-flight coalescing, and
//! streams server-sent events with automatic reconnect.
//!
//! ## Core concepts
//!
//! - **[`Client`]** — the request pipeline: URL construction, request
//!   validation, cache lookup, retry/timeout, response decoding, response
//!   validation.
//! - **[`ClientBuilder`]** — fluent construction of a [`Client`].
//! - **[`catalog::EndpointCatalog`]** — the ordered `path-template ->
//!   method-descriptor` mapping a client is built from.
//! - **[`error::ClientError`]** — the single error type every public
//!   operation returns; [`error::unwrap`] walks its cause chain to recover a
//!   concrete typed error.
//! - **[`Transport`]** and **[`validate::SchemaValidator`]** — the two
//!   capabilities the core depends on, so it never couples to a specific
//!   HTTP library or schema vendor.
//!
//! ## Quick start
//!
//! ```no_run
//! use endpoint_client::{Client, Operation};
//! use endpoint_client::catalog::{EndpointCatalog, MethodDescriptor};
//! use endpoint_client::client::RequestOptions;
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("https://api.example.com")
//!         .endpoints(
//!             EndpointCatalog::builder()
//!                 .endpoint("/users/{id}", Operation::Get, MethodDescriptor::new())
//!                 .build(),
//!         )
//!         .build();
//!
//!     let mut path_params = BTreeMap::new();
//!     path_params.insert("id".to_string(), "42".to_string());
//!     let _value = client.get("/users/{id}", path_params, vec![], RequestOptions::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod catalog;
pub mod client;
pub mod decode;
pub mod error;
pub mod retry;
pub mod sse;
pub mod transport;
pub mod url_builder;
pub mod validate;

pub use cache::TtlCache;
pub use cancel::{CancelReason, CancelToken};
pub use catalog::{EndpointCatalog, MethodDescriptor, Operation};
pub use client::{Client, ClientBuilder, RequestOptions};
pub use decode::Decoded;
pub use error::{is, is_shallow, unwrap, ClientError, Result};
pub use retry::{Classification, RetryPolicy};
pub use sse::{SseEvent, SseHandle, SseOptions};
pub use transport::{CredentialsMode, MockTransport, ReqwestTransport, Transport};
pub use validate::{FnValidator, NoopValidator, SchemaValidator};
