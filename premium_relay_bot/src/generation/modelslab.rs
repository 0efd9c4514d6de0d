use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{GenerationError, ImageGenerator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelsLabConfig {
    pub api_key: String,
    pub model_id: String,
    /// Full URL of the dreambooth text-to-image endpoint.
    pub url: Url,
}

impl ModelsLabConfig {
    pub const DEFAULT_URL: &'static str = "https://api.stablediffusionapi.com/v4/dreambooth";
    pub const DEFAULT_MODEL: &'static str = "realistic-vision-v51";
}

const NEGATIVE_PROMPT: &str = "blurry, bad anatomy, distorted";

/// Image generation through ModelsLab's (formerly stablediffusionapi.com)
/// dreambooth endpoint. Always one 512x768 sample.
pub struct ModelsLabImages {
    client: Client,
    config: ModelsLabConfig,
}

impl ModelsLabImages {
    pub fn new(client: Client, config: ModelsLabConfig) -> Self {
        ModelsLabImages { client, config }
    }
}

/// Yes, the numbers really go as strings, except for the one that doesn't.
#[derive(Serialize)]
struct DreamboothRequest<'a> {
    key: &'a str,
    model_id: &'a str,
    prompt: &'a str,
    negative_prompt: &'a str,
    width: &'a str,
    height: &'a str,
    samples: &'a str,
    guidance_scale: f32,
}

#[derive(Deserialize)]
struct DreamboothResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    output: Vec<String>,
}

#[async_trait]
impl ImageGenerator for ModelsLabImages {
    async fn generate(&self, prompt: &str) -> Result<Url, GenerationError> {
        let response: DreamboothResponse = self
            .client
            .post(self.config.url.clone())
            .json(&DreamboothRequest {
                key: &self.config.api_key,
                model_id: &self.config.model_id,
                prompt,
                negative_prompt: NEGATIVE_PROMPT,
                width: "512",
                height: "768",
                samples: "1",
                guidance_scale: 7.5,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(first) = response.output.into_iter().next() {
            return Ok(Url::parse(&first)?);
        }

        match response.status.as_deref() {
            Some("error" | "failed") => Err(GenerationError::Api(
                response
                    .message
                    .unwrap_or_else(|| String::from("unknown error")),
            )),
            Some("processing") => Err(GenerationError::Api(String::from(
                "image is still processing",
            ))),
            _ => Err(GenerationError::EmptyResponse),
        }
    }
}
