use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ChatTurn, GenerationError, TextGenerator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub model: String,
    /// Full URL of the chat completions endpoint.
    pub url: Url,
}

impl OpenRouterConfig {
    pub const DEFAULT_URL: &'static str = "https://openrouter.ai/api/v1/chat/completions";
    pub const DEFAULT_MODEL: &'static str = "gryphe/mythomist-7b";
}

/// Text generation through an OpenAI-style chat completions API.
/// OpenRouter by default, but anything speaking the same dialect works.
pub struct OpenRouterText {
    client: Client,
    config: OpenRouterConfig,
}

impl OpenRouterText {
    pub fn new(client: Client, config: OpenRouterConfig) -> Self {
        OpenRouterText { client, config }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `{"error": {"message": "..."}}`, which is what comes back on failures.
#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[async_trait]
impl TextGenerator for OpenRouterText {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.config.url.clone())
            .bearer_auth(&self.config.api_key)
            .json(&CompletionRequest {
                model: &self.config.model,
                messages: turns,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(GenerationError::Api(format!("{status}: {message}")));
        }

        // Some providers answer 200 with an error object instead. lol
        if let Ok(error) = serde_json::from_slice::<ErrorResponse>(&body) {
            return Err(GenerationError::Api(error.error.message));
        }

        let completion: CompletionResponse = serde_json::from_slice(&body)
            .map_err(|e| GenerationError::Api(format!("unparseable completion: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}
