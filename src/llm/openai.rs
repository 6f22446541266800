use crate::error::{DuesError, Result};
use crate::llm::fallback::ReasoningProvider;
use crate::llm::types::ReasoningRequest;
use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions provider. The response schema is appended to the system
/// prompt and JSON mode is requested.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn chat_completion(&self, request: &ReasoningRequest) -> Result<String> {
        let system = format!(
            "{}\n\nRESPONSE JSON SCHEMA:\n{}",
            request.system_prompt, request.response_schema
        );
        let payload = json!({
            "model": self.model,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": request.user_prompt },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body_text = response.text().await?;
        if !status.is_success() {
            let reason = if body_text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                body_text.trim().to_string()
            };
            return Err(DuesError::ProviderFailure(format!(
                "OpenAI request failed ({}) on model '{}': {}",
                status.as_u16(),
                self.model,
                reason
            )));
        }

        let parsed: Value = serde_json::from_str(&body_text)?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                DuesError::ProviderFailure(format!(
                    "OpenAI response on model '{}' has no message content",
                    self.model
                ))
            })
    }
}

impl ReasoningProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn analyze<'a>(&'a self, request: &'a ReasoningRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.chat_completion(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_provider_error() {
        let provider = OpenAiProvider::new("test-key", "gpt-test")
            .with_base_url("http://127.0.0.1:9")
            .with_timeout(Duration::from_secs(2));
        let request = ReasoningRequest {
            system_prompt: "system".to_string(),
            user_prompt: "user".to_string(),
            response_schema: serde_json::json!({"type": "object"}),
        };

        let err = provider.analyze(&request).await.unwrap_err();
        assert!(matches!(err, DuesError::HttpError(_)));
        assert_eq!(provider.name(), "gpt-test");
    }
}
