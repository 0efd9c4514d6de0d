//! Wrappers over the external text and image generation APIs.
//!
//! Each wrapper does exactly one HTTP request per call. No retries, no
//! timeouts beyond the HTTP client's defaults.

mod modelslab;
mod openrouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

pub use modelslab::{ModelsLabConfig, ModelsLabImages};
pub use openrouter::{OpenRouterConfig, OpenRouterText};

/// Who said a line of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One line of a conversation, as sent to the text model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        ChatTurn {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatTurn {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("the API returned an error: {0}")]
    Api(String),
    #[error("the API returned nothing usable")]
    EmptyResponse,
    #[error("the API returned a bad image URL: {0}")]
    BadUrl(#[from] url::ParseError),
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Continue the conversation. The last turn is the user's new prompt.
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, GenerationError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image and return a URL it can be fetched from.
    async fn generate(&self, prompt: &str) -> Result<Url, GenerationError>;
}
