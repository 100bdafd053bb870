//! OpenAI structured-output client
//!
//! Uses strict `json_schema` response formatting so the model output is
//! constrained to the stage schema. The parsed output is re-validated
//! locally before it is handed to a pipeline.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{validate_against_schema, InferenceError, StructuredInference, StructuredOutput, TokenUsage};

/// Default OpenAI model
const DEFAULT_MODEL: &str = "gpt-4o";

const SYSTEM_PROMPT: &str = "You are a CRM data steward. You are given a JSON document \
    describing company records. Answer with JSON conforming exactly to the response schema; \
    the schema descriptions carry the task instructions.";

/// OpenAI API client for schema-constrained generation
#[derive(Clone)]
pub struct OpenAiStructuredClient {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl OpenAiStructuredClient {
    /// Create a new client with the given API key
    pub fn new(api_key: String) -> Self {
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self {
            api_key,
            client: reqwest::Client::new(),
            model,
        }
    }

    /// Create with a specific model
    pub fn with_model(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model: model.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self, InferenceError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            InferenceError::Config("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }
}

#[async_trait]
impl StructuredInference for OpenAiStructuredClient {
    async fn generate(
        &self,
        subject: &Value,
        schema: &Value,
    ) -> Result<StructuredOutput, InferenceError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": subject.to_string()}
            ],
            "temperature": 0.1,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "stage_output",
                    "strict": true,
                    "schema": schema
                }
            }
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api {
                status,
                message: message.chars().take(500).collect(),
            });
        }

        #[derive(Deserialize)]
        struct CompletionDetails {
            #[serde(default)]
            reasoning_tokens: u64,
        }
        #[derive(Deserialize)]
        struct ApiUsage {
            #[serde(default)]
            prompt_tokens: u64,
            #[serde(default)]
            completion_tokens: u64,
            #[serde(default)]
            total_tokens: u64,
            completion_tokens_details: Option<CompletionDetails>,
        }
        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
            usage: Option<ApiUsage>,
        }

        let api_response: ApiResponse = response.json().await?;

        let usage = match &api_response.usage {
            Some(u) => TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                reasoning_tokens: u
                    .completion_tokens_details
                    .as_ref()
                    .map(|d| d.reasoning_tokens)
                    .unwrap_or(0),
                total_tokens: u.total_tokens,
            },
            None => TokenUsage::default(),
        };

        let content = api_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("");
        if content.trim().is_empty() {
            return Err(InferenceError::EmptyResponse);
        }

        let data: Value = serde_json::from_str(content).map_err(|e| {
            InferenceError::Parse(format!(
                "{e}: {}",
                content.chars().take(200).collect::<String>()
            ))
        })?;

        validate_against_schema(schema, &data)?;

        tracing::debug!(
            model = %self.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "structured inference completed"
        );

        Ok(StructuredOutput { data, usage })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
