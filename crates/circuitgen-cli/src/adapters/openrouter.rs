//! OpenRouter chat-completion client.

use std::time::Duration;

use async_trait::async_trait;
use circuitgen_core::{Completion, ForgeError, ForgeResult, ModelClient, ModelRequest, ResponseFormat, Usage};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
    cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

/// Model client for any model routed through OpenRouter.
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> ForgeResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ForgeError::Model(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: resolve_chat_endpoint(base_url),
            api_key: api_key.into(),
        })
    }

    /// Reads `OPENROUTER_API_KEY` and, optionally, `OPENROUTER_BASE_URL`.
    pub fn from_env() -> ForgeResult<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ForgeError::Config("OPENROUTER_API_KEY is not set".into()))?;
        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(&base_url, api_key)
    }
}

#[async_trait]
impl ModelClient for OpenRouterClient {
    async fn ask(&self, request: &ModelRequest) -> ForgeResult<Completion> {
        let payload = json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "reasoning": { "effort": request.reasoning_effort.as_str() },
            "usage": { "include": true },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ForgeError::Model(format!("{} request failed: {}", request.model, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ForgeError::Model(format!(
                "{} error {}: {}",
                request.model,
                status,
                truncate(&body, 320)
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::Model(format!("invalid response for {}: {}", request.model, e)))?;
        parse_completion(body, request.format)
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

fn parse_completion(body: ChatResponse, format: ResponseFormat) -> ForgeResult<Completion> {
    let choice = body
        .choices
        .first()
        .ok_or_else(|| ForgeError::Model("response did not include choices".into()))?;
    let text = extract_text(&choice.message.content);
    let text = match format {
        ResponseFormat::Code => extract_code(&text),
        ResponseFormat::Text => text.trim().to_string(),
    };

    let usage = body
        .usage
        .map(|u| Usage {
            cost: u.cost.unwrap_or(0.0),
            prompt_tokens: u.prompt_tokens.unwrap_or(0),
            completion_tokens: u.completion_tokens.unwrap_or(0),
            total_tokens: u.total_tokens.unwrap_or(0),
            quality_score: None,
        })
        .unwrap_or_default();

    Ok(Completion { text, usage })
}

fn resolve_chat_endpoint(base_url: &str) -> String {
    if base_url.contains("/chat/completions") {
        base_url.to_string()
    } else {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }
}

fn extract_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Body of the first fenced code block, or the whole reply when unfenced.
pub fn extract_code(reply: &str) -> String {
    let Some(start) = reply.find("```") else {
        return reply.trim().to_string();
    };
    let after_fence = &reply[start + 3..];
    // Skip the info string (`python`, `py`, ...) on the opening line.
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => after_fence,
    };
    match body.find("```") {
        Some(end) => body[..end].trim_end().to_string(),
        None => body.trim_end().to_string(),
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_resolution() {
        assert_eq!(
            resolve_chat_endpoint("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            resolve_chat_endpoint("http://localhost:9000/v1/chat/completions"),
            "http://localhost:9000/v1/chat/completions"
        );
    }

    #[test]
    fn code_is_taken_from_first_fence() {
        let reply = "Here you go:\n```python\nfrom guppylang import guppy\n\n@guppy\ndef main() -> None:\n    pass\n```\nand more ```text```";
        assert_eq!(
            extract_code(reply),
            "from guppylang import guppy\n\n@guppy\ndef main() -> None:\n    pass"
        );
        assert_eq!(extract_code("  x = 1\n"), "x = 1");
        assert_eq!(extract_code("```\nunterminated"), "unterminated");
    }

    #[test]
    fn completion_parses_usage_and_format() {
        let body: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "```py\nprint(1)\n```" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20, "cost": 0.0042 }
        }))
        .unwrap();
        let completion = parse_completion(body, ResponseFormat::Code).unwrap();
        assert_eq!(completion.text, "print(1)");
        assert_eq!(completion.usage.total_tokens, 20);
        assert_eq!(completion.usage.cost, 0.0042);

        let body: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": [{ "type": "text", "text": " Improved prompt " }] } }]
        }))
        .unwrap();
        let completion = parse_completion(body, ResponseFormat::Text).unwrap();
        assert_eq!(completion.text, "Improved prompt");
        assert_eq!(completion.usage, Usage::default());
    }

    #[test]
    fn empty_choices_is_a_model_error() {
        let body: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(
            parse_completion(body, ResponseFormat::Text),
            Err(ForgeError::Model(_))
        ));
    }

    #[test]
    fn truncate_marks_cut_bodies() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
