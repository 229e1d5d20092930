//! Response decoder: read the body once, sniff JSON vs text, honor the
//! empty-body sentinel statuses.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ClientError, DecodeError};
use crate::transport::HttpResponse;

/// What a decode produced, before the caller converts it into their
/// expected type.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// 204/205, or an empty body: nothing to parse.
    Empty,
    Json(Value),
    Text(String),
}

fn is_json_content_type(content_type: &str) -> bool {
    let ct = content_type.split(';').next().unwrap_or("").trim();
    ct.contains("application/json") || ct.ends_with("+json")
}

/// Decode `response`'s body per §4.4: empty-sentinel statuses short-circuit,
/// the body is read exactly once as text, and content-type decides whether
/// it's parsed as JSON.
pub fn decode(response: &HttpResponse) -> Result<Decoded, ClientError> {
    if matches!(response.status, 204 | 205) {
        return Ok(Decoded::Empty);
    }

    let text = match response.take_text() {
        Some(t) => t,
        None => return Ok(Decoded::Empty),
    };

    if text.is_empty() {
        return Ok(Decoded::Empty);
    }

    let is_json = response.header("content-type").map(is_json_content_type).unwrap_or(false);

    if is_json {
        serde_json::from_str::<Value>(&text)
            .map(Decoded::Json)
            .map_err(|cause| ClientError::from(DecodeError { cause }))
    } else {
        Ok(Decoded::Text(text))
    }
}

/// Decode and deserialize into `T`, per endpoint response schemas that are
/// concrete Rust types rather than a dynamic `Value`.
pub fn decode_as<T: DeserializeOwned>(response: &HttpResponse) -> Result<Option<T>, ClientError> {
    match decode(response)? {
        Decoded::Empty => Ok(None),
        Decoded::Json(value) => serde_json::from_value(value).map(Some).map_err(|cause| ClientError::from(DecodeError { cause })),
        Decoded::Text(text) => serde_json::from_str(&text).map(Some).map_err(|cause| ClientError::from(DecodeError { cause })),
    }
}
