//! SSE stream reader: block parsing, typed event dispatch, auto-reconnect.
//!
//! [`SseBlockParser`] generalizes the teacher's `backend::sse::SseDecoder`
//! (which only recognized `data:`/`event:` for an OpenAI-compatible stream)
//! to the full SSE field set — `id:`, `retry:`, comment lines — and
//! line-buffers across chunk boundaries the same way.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cancel::{self, CancelReason, CancelToken};
use crate::catalog::Operation;
use crate::client::Client;
use crate::error::ClientError;
use crate::transport::{SseChunk, TransportRequest};
use crate::url_builder::QueryValue;
use crate::validate;

/// One parsed SSE block, ready for typed dispatch.
#[derive(Debug, Clone)]
pub struct SseBlock {
    pub event: String,
    pub id: Option<String>,
    pub retry_ms: Option<u64>,
    pub data: Option<String>,
}

impl Default for SseBlock {
    fn default() -> Self {
        Self { event: "message".to_string(), id: None, retry_ms: None, data: None }
    }
}

/// Line-buffering parser for the `text/event-stream` wire format (§6,
/// "Wire format"): UTF-8, LF or CRLF line endings, blank-line block
/// terminator, `:`-prefixed comment lines ignored.
#[derive(Debug, Default)]
pub struct SseBlockParser {
    buffer: String,
    current: SseBlock,
    data_lines: Vec<String>,
}

impl SseBlockParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning any complete blocks it produced.
    /// Retains the trailing incomplete block for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseBlock> {
        let text = String::from_utf8_lossy(chunk);
        self.buffer.push_str(&text);

        let mut blocks = Vec::new();
        loop {
            let Some(pos) = self.buffer.find('\n') else { break };
            let raw_line: String = self.buffer.drain(..=pos).collect();
            let line = raw_line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if let Some(block) = self.finish_block() {
                    blocks.push(block);
                }
                continue;
            }
            self.apply_line(line);
        }
        blocks
    }

    /// Flush a trailing block with no terminating blank line.
    pub fn flush(&mut self) -> Option<SseBlock> {
        self.finish_block()
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return; // comment line
        }
        if let Some(value) = line.strip_prefix("event: ").or_else(|| line.strip_prefix("event:")) {
            self.current.event = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("id: ").or_else(|| line.strip_prefix("id:")) {
            self.current.id = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("retry: ").or_else(|| line.strip_prefix("retry:")) {
            match value.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.current.retry_ms = Some(ms),
                _ => {}
            }
        } else if let Some(value) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            self.data_lines.push(value.trim().to_string());
        }
        // unrecognized prefixes are ignored per §4.9
    }

    fn finish_block(&mut self) -> Option<SseBlock> {
        if self.data_lines.is_empty() && self.current.id.is_none() && self.current.retry_ms.is_none() {
            self.current = SseBlock::default();
            return None;
        }
        let mut block = std::mem::take(&mut self.current);
        if !self.data_lines.is_empty() {
            block.data = Some(self.data_lines.join("\n"));
        }
        self.data_lines.clear();
        self.current = SseBlock::default();
        Some(block)
    }
}

/// A typed event delivered to an SSE handler: `{type, data}` per §9's
/// discriminated-union note.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: String,
    pub data: Value,
}

/// Per-call SSE options (§4.9).
#[derive(Clone, Default)]
pub struct SseOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
    pub error_unknown_type: bool,
    pub validate: Option<bool>,
}

/// Handle to an open SSE stream. Dropping it does not stop the reader;
/// call [`close`](Self::close) explicitly.
#[derive(Clone)]
pub struct SseHandle {
    cancel: CancelToken,
}

impl SseHandle {
    pub fn close(&self) {
        self.cancel.fire(CancelReason::User(None));
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_aborted()
    }
}

type SseHandlerFn = dyn Fn(Result<SseEvent, ClientError>) + Send + Sync;

impl Client {
    /// Open an SSE stream for `template`, invoking `handler` for each typed
    /// event (or error) as it arrives. Returns once the stream is open (or
    /// fails to open); the read/reconnect loop runs in the background until
    /// [`SseHandle::close`] is called or any cancellation source fires.
    pub async fn sse(
        &self,
        template: &str,
        path_params: std::collections::BTreeMap<String, String>,
        query_params: Vec<(String, QueryValue)>,
        handler: impl Fn(Result<SseEvent, ClientError>) + Send + Sync + 'static,
        opts: SseOptions,
    ) -> Result<SseHandle, ClientError> {
        let descriptor = self
            .endpoints()
            .get(template, Operation::Sse)
            .cloned()
            .ok_or_else(|| ClientError::Other(format!("error no schemas found for {template}")))?;

        let url = self.url(template, &path_params, &query_params)?;

        let timeout_token = opts.timeout.and_then(|d| cancel::timeout_token(Some(d.as_millis() as u64)));
        let stream_cancel = CancelToken::new();
        let merged = cancel::merge(vec![timeout_token, opts.cancel.clone(), Some(self.client_cancel().clone()), Some(stream_cancel.clone())]);

        let with_credentials = self.credentials_mode() == crate::transport::CredentialsMode::Include;
        let should_validate = opts.validate.unwrap_or(true);
        let error_unknown_type = opts.error_unknown_type;

        let mut req = TransportRequest::new();
        if with_credentials {
            req = req.with_header("X-Requested-With", "XMLHttpRequest");
        }

        let transport = Arc::clone(self.transport());
        let first_open = transport.open_sse(&url, req.clone(), merged.as_ref()).await;
        let mut rx = match first_open {
            Ok(rx) => rx,
            Err(err) => return Err(ClientError::wrap("error opening SSE", err)),
        };

        let handler: Arc<SseHandlerFn> = Arc::new(handler);
        let handle = SseHandle { cancel: stream_cancel.clone() };

        tokio::spawn(async move {
            let mut last_event_id = String::new();
            let mut reconnect_delay = Duration::from_millis(1000);
            let mut parser = SseBlockParser::new();

            loop {
                let chunk = tokio::select! {
                    chunk = rx.recv() => chunk,
                    _ = stream_cancel.cancelled() => None,
                };

                match chunk {
                    Some(SseChunk::Data(bytes)) => {
                        for block in parser.feed(&bytes) {
                            if let Some(id) = &block.id {
                                last_event_id = id.clone();
                            }
                            if let Some(ms) = block.retry_ms {
                                reconnect_delay = Duration::from_millis(ms);
                            }
                            dispatch_block(&block, &descriptor, should_validate, error_unknown_type, &handler).await;
                        }
                    }
                    Some(SseChunk::Eof) | None => {
                        if let Some(block) = parser.flush() {
                            dispatch_block(&block, &descriptor, should_validate, error_unknown_type, &handler).await;
                        }
                        if stream_cancel.is_aborted() {
                            break;
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(reconnect_delay) => {}
                            _ = stream_cancel.cancelled() => break,
                        }

                        let mut reopen_req = req.clone();
                        if !last_event_id.is_empty() {
                            reopen_req = reopen_req.with_header("Last-Event-ID", last_event_id.clone());
                        }
                        match transport.open_sse(&url, reopen_req, None).await {
                            Ok(new_rx) => {
                                rx = new_rx;
                                parser = SseBlockParser::new();
                            }
                            Err(err) => {
                                handler(Err(ClientError::wrap("error opening SSE", err)));
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(handle)
    }
}

async fn dispatch_block(
    block: &crate::sse::SseBlock,
    descriptor: &crate::catalog::MethodDescriptor,
    should_validate: bool,
    error_unknown_type: bool,
    handler: &Arc<SseHandlerFn>,
) {
    let Some(data) = &block.data else { return };

    let schema = match descriptor.events.get(&block.event) {
        Some(schema) => Some(schema),
        None => {
            if error_unknown_type {
                handler(Err(ClientError::Other(format!("unknown event-type '{}'", block.event))));
            }
            return;
        }
    };

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => Value::String(data.clone()),
    };

    if should_validate {
        if let Some(schema) = schema {
            match validate::validate(schema.as_ref(), &value).await {
                Ok(validated) => {
                    handler(Ok(SseEvent { event_type: block.event.clone(), data: validated }));
                }
                Err(err) => {
                    handler(Err(ClientError::from(err)));
                }
            }
            return;
        }
    }

    handler(Ok(SseEvent { event_type: block.event.clone(), data: value }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_message_block() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b"event: message\ndata: {\"foo\":\"hi\"}\n\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].event, "message");
        assert_eq!(blocks[0].data.as_deref(), Some("{\"foo\":\"hi\"}"));
    }

    #[test]
    fn defaults_event_name_to_message() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b"data: hello\n\n");
        assert_eq!(blocks[0].event, "message");
    }

    #[test]
    fn multi_line_data_is_newline_joined() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b"data: line one\ndata: line two\n\n");
        assert_eq!(blocks[0].data.as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn id_field_is_captured() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b"id: 42\ndata: x\n\n");
        assert_eq!(blocks[0].id.as_deref(), Some("42"));
    }

    #[test]
    fn retry_field_sets_reconnect_delay() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b"retry: 250\ndata: x\n\n");
        assert_eq!(blocks[0].retry_ms, Some(250));
    }

    #[test]
    fn non_numeric_retry_is_ignored() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b"retry: not-a-number\ndata: x\n\n");
        assert_eq!(blocks[0].retry_ms, None);
    }

    #[test]
    fn zero_retry_is_ignored() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b"retry: 0\ndata: x\n\n");
        assert_eq!(blocks[0].retry_ms, None);
    }

    #[test]
    fn comment_lines_are_ignored() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b":keep-alive\ndata: x\n\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data.as_deref(), Some("x"));
    }

    #[test]
    fn block_with_no_data_and_no_id_or_retry_yields_nothing() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b"event: ping\n\n");
        assert!(blocks.is_empty());
    }

    #[test]
    fn split_across_chunks_still_parses() {
        let mut parser = SseBlockParser::new();
        assert!(parser.feed(b"data: {\"a").is_empty());
        let blocks = parser.feed(b"\":1}\n\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data.as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn multiple_events_parsed_in_order() {
        let mut parser = SseBlockParser::new();
        let blocks = parser.feed(b"event: message\ndata: {\"foo\":\"hi\"}\n\nevent: player\ndata: {\"bar\":\"x\"}\n\n");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].event, "message");
        assert_eq!(blocks[1].event, "player");
    }

    #[test]
    fn flush_returns_trailing_incomplete_block() {
        let mut parser = SseBlockParser::new();
        parser.feed(b"data: trailing");
        let block = parser.flush().expect("should flush trailing block");
        assert_eq!(block.data.as_deref(), Some("trailing"));
    }
}
