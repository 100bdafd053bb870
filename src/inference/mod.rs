//! Structured inference client
//!
//! Wraps an external text-generation capability behind a trait so the
//! pipelines can run against mocks in tests. The capability is handed a
//! subject document and a JSON-Schema output contract; the wrapper parses
//! the constrained output and reports raw token counts.

mod openai;

pub use openai::OpenAiStructuredClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::AddAssign;
use thiserror::Error;

/// Token counters reported by the capability for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.reasoning_tokens += rhs.reasoning_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// Parsed output of one structured inference call.
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    pub data: Value,
    pub usage: TokenUsage,
}

/// Inference failures. All are fatal for the request that raised them;
/// retries, if any, belong to the capability's own transport layer.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference client configuration error: {0}")]
    Config(String),

    #[error("inference transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("inference returned no content")]
    EmptyResponse,

    #[error("inference output is not valid JSON: {0}")]
    Parse(String),

    #[error("inference output does not match the requested schema: {}", errors.join("; "))]
    SchemaMismatch { errors: Vec<String> },

    #[error("inference output violates the stage contract: {0}")]
    Contract(String),
}

/// External text-generation capability constrained to a JSON Schema.
#[async_trait]
pub trait StructuredInference: Send + Sync {
    /// Generate output for `subject` conforming to `schema`.
    async fn generate(
        &self,
        subject: &Value,
        schema: &Value,
    ) -> Result<StructuredOutput, InferenceError>;

    /// Model identifier for logging and usage reports.
    fn model_name(&self) -> &str;
}

/// Validate parsed output against the stage schema. The decode boundary
/// for untrusted wire data: pipeline invariants downstream assume this
/// passed.
pub fn validate_against_schema(schema: &Value, data: &Value) -> Result<(), InferenceError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| InferenceError::Parse(format!(
        "invalid stage schema: {e}"
    )))?;
    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(InferenceError::SchemaMismatch { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            reasoning_tokens: 0,
            total_tokens: 120,
        };
        total += TokenUsage {
            input_tokens: 50,
            output_tokens: 10,
            reasoning_tokens: 5,
            total_tokens: 65,
        };
        assert_eq!(total.input_tokens, 150);
        assert_eq!(total.output_tokens, 30);
        assert_eq!(total.reasoning_tokens, 5);
        assert_eq!(total.total_tokens, 185);
    }

    #[test]
    fn test_schema_validation_accepts_conforming_output() {
        let schema = json!({
            "type": "object",
            "properties": { "action": { "type": "string", "enum": ["KEEP"] } },
            "required": ["action"],
            "additionalProperties": false
        });
        assert!(validate_against_schema(&schema, &json!({"action": "KEEP"})).is_ok());
    }

    #[test]
    fn test_schema_validation_rejects_mismatched_output() {
        let schema = json!({
            "type": "object",
            "properties": { "action": { "type": "string", "enum": ["KEEP"] } },
            "required": ["action"],
            "additionalProperties": false
        });
        let err = validate_against_schema(&schema, &json!({"action": "DELETE"})).unwrap_err();
        assert!(matches!(err, InferenceError::SchemaMismatch { .. }));
    }
}
