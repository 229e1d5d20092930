//! URL builder: path-template substitution and query serialization.
//!
//! Templates use `{name}` placeholders (`/users/{id}/posts/{postId}`). Every
//! placeholder must have a corresponding entry in the params map; extra
//! placeholders or malformed braces fail construction before any I/O happens.

use std::collections::BTreeMap;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::form_urlencoded;

use crate::error::ConstructUrlError;

/// Everything except unreserved characters gets encoded in a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

/// A query value: either a single scalar or a repeated set (serialized as
/// `key=v1&key=v2`).
#[derive(Debug, Clone)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Single(v)
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Single(v.to_string())
    }
}

/// Extract `{name}` placeholders from `template`, in order of first
/// appearance. Fails if braces are unbalanced or nested.
pub fn extract_placeholders(template: &str) -> Result<Vec<String>, ConstructUrlError> {
    let mut names = Vec::new();
    let mut chars = template.char_indices().peekable();
    let mut depth = 0usize;
    let mut current = String::new();

    while let Some((_, c)) = chars.next() {
        match c {
            '{' => {
                if depth != 0 {
                    return Err(ConstructUrlError("malformed template: nested '{'".into()));
                }
                depth = 1;
                current.clear();
            }
            '}' => {
                if depth == 0 {
                    return Err(ConstructUrlError("malformed template: unmatched '}'".into()));
                }
                depth = 0;
                names.push(current.clone());
            }
            other => {
                if depth == 1 {
                    current.push(other);
                }
            }
        }
    }
    if depth != 0 {
        return Err(ConstructUrlError("malformed template: unmatched '{'".into()));
    }
    Ok(names)
}

/// Substitute `{name}` placeholders in `template` with percent-encoded
/// values from `params`. Every placeholder must be present in `params`.
pub fn substitute_path(template: &str, params: &BTreeMap<String, String>) -> Result<String, ConstructUrlError> {
    let placeholders = extract_placeholders(template)?;
    for name in &placeholders {
        if !params.contains_key(name) {
            return Err(ConstructUrlError(format!("missing path substitution for '{{{name}}}'")));
        }
    }

    let mut result = String::with_capacity(template.len());
    let mut depth = 0usize;
    let mut current = String::new();
    for c in template.chars() {
        match c {
            '{' => {
                depth = 1;
                current.clear();
            }
            '}' => {
                depth = 0;
                let value = params.get(&current).expect("checked above");
                result.push_str(&utf8_percent_encode(value, PATH_SEGMENT).to_string());
            }
            other => {
                if depth == 1 {
                    current.push(other);
                } else {
                    result.push(other);
                }
            }
        }
    }
    Ok(result)
}

/// Serialize query parameters as `key=value` pairs joined by `&`, in
/// insertion order. Repeated (`Multi`) values emit one pair per element.
/// Returns an empty string if `params` is empty.
pub fn serialize_query(params: &[(String, QueryValue)]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        match value {
            QueryValue::Single(v) => {
                serializer.append_pair(name, v);
            }
            QueryValue::Multi(values) => {
                for v in values {
                    serializer.append_pair(name, v);
                }
            }
        }
    }
    serializer.finish()
}

/// Build the final `path?query` (no scheme/host) for a request.
pub fn build_path_and_query(
    template: &str,
    path_params: &BTreeMap<String, String>,
    query_params: &[(String, QueryValue)],
) -> Result<String, ConstructUrlError> {
    let path = substitute_path(template, path_params)?;
    let query = serialize_query(query_params);
    if query.is_empty() {
        Ok(path)
    } else {
        Ok(format!("{path}?{query}"))
    }
}

/// Join `base_url` and `path_and_query` ensuring exactly one `/` separator.
/// If the result is not an absolute URL (no scheme), prepend `hostname`.
pub fn resolve_url(base_url: &str, hostname: &str, path_and_query: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let joined = if path_and_query.starts_with('/') {
        format!("{base}{path_and_query}")
    } else {
        format!("{base}/{path_and_query}")
    };
    if joined.contains("://") {
        joined
    } else {
        let host = hostname.trim_end_matches('/');
        if joined.starts_with('/') {
            format!("{host}{joined}")
        } else {
            format!("{host}/{joined}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn extracts_placeholders_in_order() {
        let names = extract_placeholders("/users/{id}/posts/{postId}").unwrap();
        assert_eq!(names, vec!["id", "postId"]);
    }

    #[test]
    fn unmatched_closing_brace_fails() {
        assert!(extract_placeholders("/x}").is_err());
    }

    #[test]
    fn unmatched_opening_brace_fails() {
        assert!(extract_placeholders("/x/{id").is_err());
    }

    #[test]
    fn nested_braces_fail() {
        assert!(extract_placeholders("/{a{b}}").is_err());
    }

    #[test]
    fn substitutes_and_percent_encodes_segments() {
        let out = substitute_path("/users/{id}", &params(&[("id", "a b/c")])).unwrap();
        assert_eq!(out, "/users/a%20b%2Fc");
    }

    #[test]
    fn missing_substitution_fails() {
        let err = substitute_path("/users/{id}", &BTreeMap::new()).unwrap_err();
        assert!(err.0.contains("id"));
    }

    #[test]
    fn search_yields_expected_query_string() {
        let out = build_path_and_query("/x", &BTreeMap::new(), &[("a".into(), "b".into())]).unwrap();
        assert_eq!(out, "/x?a=b");
    }

    #[test]
    fn empty_search_omits_question_mark() {
        let out = build_path_and_query("/x", &BTreeMap::new(), &[]).unwrap();
        assert_eq!(out, "/x");
    }

    #[test]
    fn repeated_values_emit_multiple_pairs() {
        let query = serialize_query(&[("tag".to_string(), QueryValue::Multi(vec!["a".into(), "b".into()]))]);
        assert_eq!(query, "tag=a&tag=b");
    }

    #[test]
    fn resolve_url_joins_with_single_slash() {
        assert_eq!(resolve_url("https://api.example.com/", "https://example.com", "/x"), "https://api.example.com/x");
        assert_eq!(resolve_url("https://api.example.com", "https://example.com", "x"), "https://api.example.com/x");
    }

    #[test]
    fn resolve_url_prepends_hostname_for_relative_base() {
        assert_eq!(resolve_url("/api", "https://example.com", "/x"), "https://example.com/api/x");
    }
}
