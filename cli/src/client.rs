//! Typed wrapper around the HTTP API, used by every CLI command.

use anyhow::{Context, Result, bail};
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use mealplan_core::mealgen::GeneratedMeal;
use mealplan_core::models::{
    DatabaseStatus, FavoriteMeal, ImageRequest, MealRequest, PlannedMeal,
};

pub const DEFAULT_SERVER: &str = "http://localhost:3000/api";

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(serde::Deserialize)]
struct Success {
    success: bool,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteCheck {
    is_favorite: bool,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageReply {
    image_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("mealplan-cli/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
    }

    /// Send `req`, turning a non-2xx reply into an error carrying the
    /// server's `error` plus its `message` or `rawResponse` when present.
    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to reach meal planner server at {}", self.base_url))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&body).ok().and_then(|v| {
            let mut detail = v.get("error")?.as_str()?.to_string();
            if let Some(message) = v.get("message").and_then(Value::as_str) {
                detail.push_str(&format!(": {message}"));
            }
            if let Some(raw) = v.get("rawResponse").and_then(Value::as_str) {
                detail.push_str(&format!("\nRaw response: {raw}"));
            }
            Some(detail)
        });
        bail!(
            "Server returned {status}: {}",
            detail.unwrap_or_else(|| body.trim().to_string())
        )
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::GET, path))
            .await?
            .json()
            .await
            .context("Failed to parse server response")
    }

    async fn post<B: Serialize + Sync + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(self.request(Method::POST, path).json(body))
            .await?
            .json()
            .await
            .context("Failed to parse server response")
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let reply: Success = self
            .send(self.request(Method::DELETE, path))
            .await?
            .json()
            .await
            .context("Failed to parse server response")?;
        Ok(reply.success)
    }

    // --- Favorites ---

    pub async fn favorites(&self) -> Result<Vec<FavoriteMeal>> {
        self.get("/meals/favorites").await
    }

    pub async fn add_favorite(&self, meal: &FavoriteMeal) -> Result<bool> {
        let reply: Success = self.post("/meals/favorites", meal).await?;
        Ok(reply.success)
    }

    pub async fn remove_favorite(&self, id: &str) -> Result<bool> {
        self.delete(&format!("/meals/favorites/{}", encode_segment(id)))
            .await
    }

    pub async fn is_favorite(&self, id: &str) -> Result<bool> {
        let reply: FavoriteCheck = self
            .get(&format!("/meals/favorites/{}", encode_segment(id)))
            .await?;
        Ok(reply.is_favorite)
    }

    // --- Planned meals ---

    pub async fn planned_meals(&self) -> Result<Vec<PlannedMeal>> {
        self.get("/meals/planned").await
    }

    pub async fn save_planned_meals(&self, meals: &[PlannedMeal]) -> Result<bool> {
        let reply: Success = self.post("/meals/planned", meals).await?;
        Ok(reply.success)
    }

    /// Read the plan, append `meal`, and write the whole list back.
    pub async fn append_planned_meal(&self, meal: PlannedMeal) -> Result<Vec<PlannedMeal>> {
        let mut meals = self.planned_meals().await?;
        meals.push(meal);
        self.save_planned_meals(&meals).await?;
        Ok(meals)
    }

    pub async fn clear_all(&self) -> Result<bool> {
        self.delete("/meals/all").await
    }

    pub async fn database_status(&self) -> Result<DatabaseStatus> {
        self.get("/meals/database/status").await
    }

    // --- Generation ---

    pub async fn generate_meal(&self, request: &MealRequest) -> Result<GeneratedMeal> {
        self.post("/openai/generate-meal", request).await
    }

    pub async fn generate_image(&self, request: &ImageRequest) -> Result<String> {
        let reply: ImageReply = self.post("/openai/generate-image", request).await?;
        Ok(reply.image_url)
    }
}

/// Percent-encode a path segment; ids are opaque client strings.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
