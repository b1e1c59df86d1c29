//! Reasoning backend client.
//!
//! OpenRouter chat-completions client used by the analyzer (free-text
//! completion with embedded JSON) and the executor (forced tool selection).
//! The backend is an untrusted suggestion source: every call site carries a
//! deterministic fallback, so a failure here never blocks the pipeline.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// A tool the backend may be forced to choose from.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON schema of the tool arguments.
    pub parameters: Value,
}

/// The backend's chosen tool plus its parsed arguments.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

#[async_trait::async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Free-text completion; the caller extracts structure from the reply.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Completion with `tool_choice: required`; returns the first tool call,
    /// or `None` when the backend produced no tool selection.
    async fn complete_forced_tool(
        &self,
        system: &str,
        user: &str,
        tools: &[ToolSpec],
    ) -> Result<Option<ToolInvocation>>;
}

/// Extracts the first well-formed JSON object embedded in free text.
/// Models routinely wrap their answer in prose or code fences; we scan for
/// a balanced `{...}` that parses, tolerating braces inside string literals.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let bytes = raw.as_bytes();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if start.is_some() => in_string = true,
            b'{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if start.is_some() => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &raw[start.unwrap()..=i];
                    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
                        if v.is_object() {
                            return Some(v);
                        }
                    }
                    // Not parseable: keep scanning past this candidate.
                    start = None;
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenRouterClient {
    pub fn from_env(http: reqwest::Client) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY missing (set env var)")?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("OPENROUTER_API_KEY empty"));
        }

        let model = std::env::var("VAULTGUARD_LLM_MODEL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "anthropic/claude-sonnet-4.5".to_string());

        let max_tokens = std::env::var("VAULTGUARD_LLM_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v >= 16)
            .unwrap_or(512);

        let temperature = std::env::var("VAULTGUARD_LLM_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(0.1);

        let timeout = std::env::var("VAULTGUARD_LLM_TIMEOUT_SEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v >= 1)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(20));

        let referer = std::env::var("OPENROUTER_HTTP_REFERER")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let title = std::env::var("OPENROUTER_APP_TITLE")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            http,
            api_key,
            model,
            max_tokens,
            temperature,
            timeout,
            referer,
            title,
        })
    }

    async fn chat(&self, req: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let start = Instant::now();

        let mut http_req = self
            .http
            .post("https://openrouter.ai/api/v1/chat/completions")
            .timeout(self.timeout)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(r) = &self.referer {
            http_req = http_req.header("HTTP-Referer", r);
        }
        if let Some(t) = &self.title {
            http_req = http_req.header("X-Title", t);
        }

        let resp = http_req
            .json(req)
            .send()
            .await
            .context("openrouter request")?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!("openrouter {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).context("openrouter json parse")?;

        tracing::debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            prompt_tokens = parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens = parsed.usage.as_ref().and_then(|u| u.completion_tokens),
            "llm call complete"
        );

        Ok(parsed)
    }
}

#[async_trait::async_trait]
impl ReasoningBackend for OpenRouterClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            tools: None,
            tool_choice: None,
        };

        let parsed = self.chat(&req).await?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    async fn complete_forced_tool(
        &self,
        system: &str,
        user: &str,
        tools: &[ToolSpec],
    ) -> Result<Option<ToolInvocation>> {
        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            tools: Some(
                tools
                    .iter()
                    .map(|t| ToolDef {
                        kind: "function".to_string(),
                        function: FunctionDef {
                            name: t.name.to_string(),
                            description: t.description.to_string(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            ),
            tool_choice: Some("required".to_string()),
        };

        let parsed = self.chat(&req).await?;
        let Some(call) = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.tool_calls.as_ref())
            .and_then(|t| t.first())
        else {
            return Ok(None);
        };

        let arguments = serde_json::from_str::<Value>(&call.function.arguments)
            .unwrap_or(Value::Null);

        Ok(Some(ToolInvocation {
            name: call.function.name.clone(),
            arguments,
        }))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ToolDef {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize)]
struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    pub message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallOut>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCallOut {
    pub function: FunctionCallOut,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionCallOut {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}
