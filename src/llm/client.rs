use super::{classify_error_body, Completion, CompletionRequest, LanguageModel, LlmError, TokenUsage};
use crate::config::Config;
use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FinishReason,
    },
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Chat client for an OpenAI-compatible endpoint.
///
/// Requests go out once: a failed call is classified and returned, never
/// retried, and the raw error body reaches [`classify_error_body`] intact.
pub struct LlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    chat_model: String,
}

impl LlmClient {
    /// `None` when no model is configured.
    pub fn new(config: &Config) -> anyhow::Result<Option<Self>> {
        let Some(model) = config.llm_model.clone() else {
            return Ok(None);
        };
        Self::with_endpoint(
            &config.llm_url,
            config.llm_api_key.clone(),
            model,
            Duration::from_secs(config.llm_timeout_secs),
        )
        .map(Some)
    }

    pub fn with_endpoint(
        base_url: &str,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            chat_model: model,
        })
    }

    pub fn model(&self) -> &str {
        &self.chat_model
    }

    fn build_request(&self, request: CompletionRequest) -> Result<CreateChatCompletionRequest, LlmError> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system)
                .build()
                .map_err(builder_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user)
                .build()
                .map_err(builder_error)?
                .into(),
        ];

        #[allow(deprecated)]
        CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build()
            .map_err(builder_error)
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let chat_request = self.build_request(request)?;

        let mut call = self.http.post(&self.endpoint).json(&chat_request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        let response: CreateChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Generic {
                detail: format!("unreadable completion payload: {}", e),
            })?;

        let usage = response.usage.as_ref().map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        let choice = response.choices.first();
        let text = choice
            .and_then(|c| c.message.content.clone())
            .filter(|t| !t.trim().is_empty());

        let filtered = matches!(
            choice.and_then(|c| c.finish_reason.as_ref()),
            Some(FinishReason::ContentFilter)
        );
        if text.is_none() && filtered {
            return Err(LlmError::ContentPolicy {
                category: "completion".to_string(),
                severity: super::error::UNKNOWN_SEVERITY.to_string(),
            });
        }

        debug!(
            "LLM completion from {}: {} tokens",
            self.chat_model,
            usage.map(|u| u.total_tokens).unwrap_or_default()
        );
        Ok(Completion { text, usage })
    }
}

/// Classifies a non-success answer from its raw body, using the status when
/// the body says nothing useful.
fn classify_failure(status: StatusCode, body: &str) -> LlmError {
    let payload: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    match classify_error_body(&payload) {
        LlmError::Unknown | LlmError::Generic { .. } if status == StatusCode::TOO_MANY_REQUESTS => {
            LlmError::RateLimit
        }
        LlmError::Unknown => LlmError::Generic {
            detail: format!("HTTP {}", status.as_u16()),
        },
        classified => classified,
    }
}

fn transport_error(err: reqwest::Error) -> LlmError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        LlmError::Connectivity(err.to_string())
    } else {
        LlmError::Generic { detail: err.to_string() }
    }
}

fn builder_error(err: OpenAIError) -> LlmError {
    LlmError::Generic {
        detail: err.to_string(),
    }
}
