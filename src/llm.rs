use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Raw completion plus the token counts the gateway reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// An external model-inference service.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Model identifier used for pricing.
    fn model_id(&self) -> &str;

    /// Run one completion. `schema` is the JSON schema the output should
    /// conform to; gateways that support constrained decoding may use it.
    async fn invoke(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
    ) -> Result<GatewayResponse, GatewayError>;
}

/// OpenAI-compatible chat completions gateway (OpenRouter, LM Studio, vLLM...).
pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn request_body(&self, messages: &[Message], schema: &serde_json::Value) -> serde_json::Value {
        let response_format = if self.config.structured_output {
            serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": "extraction", "schema": schema },
            })
        } else {
            serde_json::json!({ "type": "json_object" })
        };

        serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "response_format": response_format,
        })
    }
}

#[async_trait]
impl ModelGateway for HttpGateway {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn invoke(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
    ) -> Result<GatewayResponse, GatewayError> {
        let body = self.request_body(messages, schema);

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("request failed: {}", e)))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("failed to read response: {}", e)))?;

        if status.as_u16() == 429 {
            return Err(GatewayError::RateLimited);
        }
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!("{}: {}", status, snippet(&text))));
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: snippet(&text).to_string(),
            });
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Unavailable(format!("invalid gateway JSON: {}", e)))?;
        let response = parse_completion(&json, &self.config.model);
        debug!(
            model = %response.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            content_len = response.content.len(),
            "Gateway call complete"
        );
        Ok(response)
    }
}

/// Pull content and usage out of a chat completion body. Missing pieces
/// degrade to empty content / zero tokens rather than failing the call.
fn parse_completion(json: &serde_json::Value, fallback_model: &str) -> GatewayResponse {
    // choices[0].message.content may be null
    let content = json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .unwrap_or("")
        .to_string();
    let model = json["model"]
        .as_str()
        .filter(|m| !m.is_empty())
        .unwrap_or(fallback_model)
        .to_string();

    GatewayResponse {
        content,
        model,
        input_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    }
}

fn snippet(text: &str) -> &str {
    match text.char_indices().nth(300) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gateway(base_url: &str, structured_output: bool) -> HttpGateway {
        HttpGateway::new(GatewayConfig {
            base_url: base_url.to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
            max_tokens: 500,
            temperature: 0.0,
            structured_output,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(
            gateway("https://openrouter.ai/api/v1", false).endpoint(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            gateway("http://localhost:1234/", false).endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            gateway("http://host/v1/chat/completions", false).endpoint(),
            "http://host/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_response_format() {
        let schema = serde_json::json!({"type": "object"});
        let plain = gateway("http://host/v1", false).request_body(&[Message::user("hi")], &schema);
        assert_eq!(plain["response_format"]["type"], "json_object");
        assert_eq!(plain["messages"][0]["role"], "user");

        let strict = gateway("http://host/v1", true).request_body(&[Message::user("hi")], &schema);
        assert_eq!(strict["response_format"]["type"], "json_schema");
        assert_eq!(strict["response_format"]["json_schema"]["schema"], schema);
    }

    #[test]
    fn test_parse_completion_reads_usage() {
        let json = serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "choices": [{ "message": { "content": "{\"a\": 1}" } }],
            "usage": { "prompt_tokens": 1200, "completion_tokens": 80 }
        });
        let response = parse_completion(&json, "fallback");
        assert_eq!(response.content, "{\"a\": 1}");
        assert_eq!(response.model, "openai/gpt-4o-mini");
        assert_eq!(response.input_tokens, 1200);
        assert_eq!(response.output_tokens, 80);
    }

    #[test]
    fn test_parse_completion_handles_null_content() {
        let json = serde_json::json!({ "choices": [{ "message": { "content": null } }] });
        let response = parse_completion(&json, "fallback");
        assert_eq!(response.content, "");
        assert_eq!(response.model, "fallback");
        assert_eq!(response.input_tokens, 0);
    }
}
