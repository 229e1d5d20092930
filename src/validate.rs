//! Validator adapter: invoke an external schema's validate capability.
//!
//! [`SchemaValidator`] is deliberately minimal and object-safe (mirrors the
//! teacher's `Backend` trait) so this crate never depends on a specific
//! schema vendor — only on "something that can validate a `Value` and report
//! issues."

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Issue, ValidationError};

/// The minimal "standard schema" capability (§6): validate a value,
/// returning either the (possibly coerced) output or a list of issues.
#[async_trait]
pub trait SchemaValidator: Send + Sync {
    async fn validate(&self, value: &Value) -> Result<Value, Vec<Issue>>;
}

/// Always-pass validator, for endpoints that declare no schema.
pub struct NoopValidator;

#[async_trait]
impl SchemaValidator for NoopValidator {
    async fn validate(&self, value: &Value) -> Result<Value, Vec<Issue>> {
        Ok(value.clone())
    }
}

/// Wraps a synchronous closure as a [`SchemaValidator`], matching the
/// teacher's `FnEventHandler` closure-wrapper idiom.
pub struct FnValidator<F>(F);

impl<F> FnValidator<F>
where
    F: Fn(&Value) -> Result<Value, Vec<Issue>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> SchemaValidator for FnValidator<F>
where
    F: Fn(&Value) -> Result<Value, Vec<Issue>> + Send + Sync,
{
    async fn validate(&self, value: &Value) -> Result<Value, Vec<Issue>> {
        (self.0)(value)
    }
}

/// Run `validator` against `value`, converting a rejection into a
/// [`ValidationError`].
pub async fn validate(validator: &dyn SchemaValidator, value: &Value) -> Result<Value, ValidationError> {
    validator.validate(value).await.map_err(ValidationError::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_validator_always_passes() {
        let value = serde_json::json!({"a": 1});
        let result = validate(&NoopValidator, &value).await.unwrap();
        assert_eq!(result, value);
    }

    #[tokio::test]
    async fn fn_validator_collects_issues_on_rejection() {
        let validator = FnValidator::new(|_v: &Value| Err(vec![Issue::new(["a"], "must be a string")]));
        let err = validate(&validator, &serde_json::json!({"a": 1})).await.unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].path, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn fn_validator_passes_through_coerced_output() {
        let validator = FnValidator::new(|v: &Value| Ok(v.clone()));
        let value = serde_json::json!({"a": "1"});
        let result = validate(&validator, &value).await.unwrap();
        assert_eq!(result, value);
    }
}
