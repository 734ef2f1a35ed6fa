//! OpenAI chat completion and image generation client.
//!
//! Only this module talks to OpenAI; handlers go through [`MealGenerator`].

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use mealplan_core::mealgen::MealGenerator;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const CHAT_MODEL: &str = "gpt-4o";
pub const IMAGE_MODEL: &str = "dall-e-3";
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 800;
const IMAGE_SIZE: &str = "1024x1024";
const IMAGE_QUALITY: &str = "standard";

#[derive(Debug, Error)]
pub enum OpenAiError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAI API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("OpenAI returned empty content")]
    EmptyContent,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    quality: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiClient {
    /// A client without a key is valid; every call then fails with
    /// [`OpenAiError::MissingApiKey`].
    pub fn new(api_key: Option<String>) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + Sync, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, OpenAiError> {
        let api_key = self.api_key.as_deref().ok_or(OpenAiError::MissingApiKey)?;
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(OpenAiError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn chat_json(&self, system: &str, prompt: &str) -> Result<String, OpenAiError> {
        let request = ChatRequest {
            model: CHAT_MODEL,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let response: ChatResponse = self.post("/chat/completions", &request).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(OpenAiError::EmptyContent)?;
        debug!(chars = text.len(), "chat completion received");
        Ok(text)
    }

    pub async fn image(&self, prompt: &str) -> Result<Option<String>, OpenAiError> {
        let request = ImageGenerationRequest {
            model: IMAGE_MODEL,
            prompt,
            n: 1,
            size: IMAGE_SIZE,
            quality: IMAGE_QUALITY,
        };
        let response: ImageResponse = self.post("/images/generations", &request).await?;
        Ok(response.data.into_iter().find_map(|d| d.url))
    }
}

#[async_trait]
impl MealGenerator for OpenAiClient {
    async fn complete_json(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        Ok(self.chat_json(system, prompt).await?)
    }

    async fn generate_image(&self, prompt: &str) -> anyhow::Result<Option<String>> {
        Ok(self.image(prompt).await?)
    }
}
