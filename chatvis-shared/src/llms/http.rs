//! Completion client for Ollama-compatible HTTP endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{
    config::{CompletionConfig, CompletionEndpoint},
    llms::{
        errors::{LLMError, LLMResult},
        traits::CompletionClient,
        types::{ChatTurn, TurnRole},
    },
};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
    options: RequestOptions,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: RequestOptions,
}

#[derive(Debug, Serialize)]
struct RequestOptions {
    temperature: f32,
}

/// [`CompletionClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    http: reqwest::Client,
    config: CompletionConfig,
    timeout: Duration,
}

impl HttpCompletionClient {
    /// Build a client for `config` whose requests give up after `timeout`.
    ///
    /// # Errors
    /// Returns [`LLMError::InvalidConfiguration`] if the base URL is empty or the HTTP
    /// client cannot be constructed.
    pub fn new(config: CompletionConfig, timeout: Duration) -> LLMResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(LLMError::invalid_config("base_url", "must not be empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LLMError::invalid_config("http_client", err.to_string()))?;

        Ok(Self {
            http,
            config,
            timeout,
        })
    }

    fn url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.endpoint {
            CompletionEndpoint::Chat => format!("{base}/api/chat"),
            CompletionEndpoint::Generate => format!("{base}/api/generate"),
        }
    }

    fn body(&self, history: &[ChatTurn]) -> LLMResult<Value> {
        let options = RequestOptions {
            temperature: self.config.temperature,
        };
        let value = match self.config.endpoint {
            CompletionEndpoint::Chat => serde_json::to_value(ChatRequest {
                model: &self.config.model,
                messages: history,
                stream: false,
                options,
            })?,
            CompletionEndpoint::Generate => serde_json::to_value(GenerateRequest {
                model: &self.config.model,
                prompt: flatten_history(history),
                stream: false,
                options,
            })?,
        };
        Ok(value)
    }

    fn map_transport_error(&self, err: &reqwest::Error) -> LLMError {
        if err.is_timeout() {
            LLMError::timeout(self.timeout)
        } else {
            LLMError::unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    #[instrument(name = "llm.complete", skip(self, history), fields(model = %self.config.model, turns = history.len()), err)]
    async fn complete(&self, history: &[ChatTurn]) -> LLMResult<String> {
        let mut request = self.http.post(self.url()).json(&self.body(history)?);
        if let Some(key) = self.config.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| self.map_transport_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::unreachable(format!("status {status}: {text}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.map_transport_error(&err))?;
        let body: Value = serde_json::from_slice(&bytes)?;

        let content = decode_completion(&body)?;
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Render turns as `role: content` lines for prompt-only endpoints.
fn flatten_history(history: &[ChatTurn]) -> String {
    let mut prompt = String::new();
    for turn in history {
        if !prompt.is_empty() {
            prompt.push('\n');
        }
        prompt.push_str(turn.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(&turn.content);
    }
    if history.last().is_some_and(|turn| turn.role != TurnRole::Assistant) {
        prompt.push_str("\nassistant:");
    }
    prompt
}

/// Pull the generated text out of an OpenAI, Ollama chat or Ollama generate body.
///
/// # Errors
/// Returns [`LLMError::InvalidResponse`] when none of the known shapes match.
pub fn decode_completion(body: &Value) -> LLMResult<String> {
    let text = body
        .pointer("/choices/0/message/content")
        .or_else(|| body.pointer("/message/content"))
        .or_else(|| body.get("response"))
        .and_then(Value::as_str)
        .ok_or_else(|| LLMError::invalid_response("no completion text in response body"))?;

    Ok(text.trim().to_string())
}
