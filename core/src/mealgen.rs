//! Meal and image generation through a hosted language model.
//!
//! Prompt construction and reply parsing live here; the HTTP client that
//! talks to the model implements [`MealGenerator`] in the binary crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    FavoriteMeal, ImageRequest, MealRequest, cooking_time_to_minutes, count_from_value,
    display_value, now_rfc3339,
};

pub const CHEF_SYSTEM_PROMPT: &str = "You are a professional chef specializing in nutritious meals. Always respond with properly formatted JSON.";

/// Text and image completion capability.
#[async_trait]
pub trait MealGenerator: Send + Sync {
    /// Complete `prompt`, returning the model's raw reply (expected to be a
    /// JSON object).
    async fn complete_json(&self, system: &str, prompt: &str) -> anyhow::Result<String>;

    /// Render one image for `prompt`. `Ok(None)` when the model returned no URL.
    async fn generate_image(&self, prompt: &str) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("language model request failed: {0:#}")]
    Upstream(anyhow::Error),

    #[error("failed to parse meal data: {reason}")]
    Parse { raw: String, reason: String },

    #[error("no image was generated")]
    NoImage,
}

/// Meal as returned to clients after generation.
///
/// The model's object is passed through as-is; only `id`, `generatedAt` and
/// `imageUrl` are filled in. The accessors decode the fields the CLI shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratedMeal(Map<String, Value>);

impl GeneratedMeal {
    #[must_use]
    pub fn id(&self) -> String {
        self.field("id").cloned().and_then(display_value).unwrap_or_default()
    }

    #[must_use]
    pub fn title(&self) -> &str {
        self.text("title").unwrap_or_default()
    }

    #[must_use]
    pub fn meal_type(&self) -> &str {
        self.text("type").unwrap_or_default()
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.text("description")
    }

    #[must_use]
    pub fn calories(&self) -> Option<i64> {
        self.field("calories").and_then(count_from_value)
    }

    #[must_use]
    pub fn servings(&self) -> Option<i64> {
        self.field("servings").and_then(count_from_value)
    }

    /// Cooking time in minutes, read from a number or a duration string.
    #[must_use]
    pub fn cooking_time(&self) -> Option<i64> {
        match self.field("cookingTime").or_else(|| self.field("cooking_time"))? {
            Value::String(s) => match cooking_time_to_minutes(s) {
                0 => None,
                minutes => Some(i64::from(minutes)),
            },
            other => count_from_value(other),
        }
    }

    #[must_use]
    pub fn ingredients(&self) -> Vec<String> {
        lines(self.field("ingredients"))
    }

    #[must_use]
    pub fn instructions(&self) -> Vec<String> {
        lines(self.field("instructions"))
    }

    #[must_use]
    pub fn nutritional_info(&self) -> BTreeMap<String, String> {
        let Some(Value::Object(info)) = self
            .field("nutritionalInfo")
            .or_else(|| self.field("nutritional_info"))
        else {
            return BTreeMap::new();
        };
        info.iter()
            .filter_map(|(k, v)| display_value(v.clone()).map(|s| (k.clone(), s)))
            .collect()
    }

    #[must_use]
    pub fn generated_at(&self) -> Option<&str> {
        self.text("generatedAt")
    }

    #[must_use]
    pub fn image_url(&self) -> Option<&str> {
        self.text("imageUrl")
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn to_favorite(&self) -> FavoriteMeal {
        FavoriteMeal {
            id: self.id(),
            title: self.title().to_string(),
            meal_type: self.meal_type().to_string(),
            calories: self.calories(),
            servings: self.servings(),
            cooking_time: self.cooking_time(),
            ingredients: self.ingredients(),
            instructions: self.instructions(),
            nutritional_info: self.nutritional_info(),
            user_id: String::new(),
            date_added: None,
        }
    }
}

/// One display line per list item. Object items such as
/// `{"item": "oats", "amount": "1 cup"}` have their values joined.
fn lines(value: Option<&Value>) -> Vec<String> {
    let line = |item: &Value| match item {
        Value::Object(parts) => parts
            .values()
            .filter_map(|v| display_value(v.clone()))
            .collect::<Vec<_>>()
            .join(" "),
        other => display_value(other.clone()).unwrap_or_default(),
    };
    match value {
        Some(Value::Array(items)) => items.iter().map(line).filter(|l| !l.is_empty()).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![line(other)],
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Recipe prompt for `request`. Fails when no meal type was given.
pub fn meal_prompt(request: &MealRequest) -> Result<String, GenerationError> {
    let meal_type = non_blank(request.meal_type.as_deref())
        .ok_or_else(|| GenerationError::InvalidRequest("Meal type is required".into()))?;

    let mut prompt = format!("Generate a detailed recipe for a {meal_type} that:");
    if let Some(preferences) = non_blank(request.preferences.as_deref()) {
        prompt.push_str(&format!("\n- Follows these dietary preferences: {preferences}"));
    }
    if let Some(range) = non_blank(request.calorie_range.as_deref()) {
        prompt.push_str(&format!("\n- Has approximately {range} calories per serving"));
    }
    if let Some(time) = non_blank(request.cooking_time.as_deref()) {
        prompt.push_str(&format!("\n- Can be prepared in about {time} minutes"));
    }
    prompt.push_str(
        r#"

Format the response as a JSON object with the following fields:
{
  "id": "unique-identifier-string",
  "title": "Meal Name",
  "type": "breakfast|lunch|dinner|snack",
  "description": "Brief description of the meal",
  "calories": number_of_calories_per_serving,
  "servings": number_of_servings,
  "cookingTime": number_of_minutes,
  "ingredients": ["ingredient 1 with quantity", "ingredient 2 with quantity", ...],
  "instructions": ["step 1", "step 2", ...],
  "nutritionalInfo": {
    "protein": "X grams",
    "carbs": "X grams",
    "fat": "X grams",
    "fiber": "X grams"
  }
}"#,
    );
    Ok(prompt)
}

/// Photography prompt for a meal image.
#[must_use]
pub fn image_prompt(title: &str, meal_type: Option<&str>, description: Option<&str>) -> String {
    let kind = non_blank(meal_type).unwrap_or("delicious");
    let mut prompt = format!("A professional food photography image of {title}, a {kind} dish.");
    if let Some(description) = non_blank(description) {
        prompt.push(' ');
        prompt.push_str(description);
    }
    prompt
}

/// Decode a model reply into a meal, tolerating a surrounding code fence.
///
/// Any JSON object with a title is accepted and kept whole. A missing or
/// blank id is replaced with a fresh one.
pub fn parse_meal(raw: &str) -> Result<GeneratedMeal, GenerationError> {
    let parse_error = |reason: String| GenerationError::Parse {
        raw: raw.to_string(),
        reason,
    };
    let value: Value =
        serde_json::from_str(strip_code_fence(raw)).map_err(|e| parse_error(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(parse_error("reply is not a JSON object".into()));
    };
    let titled = fields
        .get("title")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.trim().is_empty());
    if !titled {
        return Err(parse_error("reply has no title".into()));
    }
    let has_id = match fields.get("id") {
        Some(Value::String(id)) => !id.trim().is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    };
    if !has_id {
        fields.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    }
    Ok(GeneratedMeal(fields))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Generate a meal for `request` and try to illustrate it.
///
/// An image failure is logged and leaves `imageUrl` null.
pub async fn generate_meal(
    generator: &dyn MealGenerator,
    request: &MealRequest,
) -> Result<GeneratedMeal, GenerationError> {
    let prompt = meal_prompt(request)?;
    let raw = generator
        .complete_json(CHEF_SYSTEM_PROMPT, &prompt)
        .await
        .map_err(GenerationError::Upstream)?;
    let mut meal = parse_meal(&raw)?;
    meal.0.insert("generatedAt".into(), Value::String(now_rfc3339()));
    debug!(id = %meal.id(), title = %meal.title(), "generated meal");

    let picture = image_prompt(meal.title(), Some(meal.meal_type()), meal.description());
    let image_url = match generator.generate_image(&picture).await {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %format!("{e:#}"), title = %meal.title(), "image generation failed");
            None
        }
    };
    meal.0.insert("imageUrl".into(), image_url.map_or(Value::Null, Value::String));
    Ok(meal)
}

/// Generate a standalone image for `request`, returning its URL.
pub async fn generate_image(
    generator: &dyn MealGenerator,
    request: &ImageRequest,
) -> Result<String, GenerationError> {
    let title = non_blank(request.meal_title.as_deref())
        .ok_or_else(|| GenerationError::InvalidRequest("Meal title is required".into()))?;
    let prompt = image_prompt(
        title,
        request.meal_type.as_deref(),
        request.description.as_deref(),
    );
    generator
        .generate_image(&prompt)
        .await
        .map_err(GenerationError::Upstream)?
        .ok_or(GenerationError::NoImage)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::anyhow;

    use super::*;

    /// Replays canned replies and records every prompt it receives.
    struct StubGenerator {
        replies: Mutex<VecDeque<anyhow::Result<String>>>,
        image: Option<String>,
        image_fails: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl StubGenerator {
        fn new(reply: &str) -> Self {
            Self {
                replies: Mutex::new(VecDeque::from([Ok(reply.to_string())])),
                image: Some("https://img.example/oats.png".into()),
                image_fails: false,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MealGenerator for StubGenerator {
        async fn complete_json(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
            assert_eq!(system, CHEF_SYSTEM_PROMPT);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("StubGenerator: no more replies")
        }

        async fn generate_image(&self, prompt: &str) -> anyhow::Result<Option<String>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.image_fails {
                Err(anyhow!("content policy violation"))
            } else {
                Ok(self.image.clone())
            }
        }
    }

    const OATS_REPLY: &str = r#"{
        "title": "Overnight Oats",
        "type": "breakfast",
        "description": "Creamy oats with berries.",
        "calories": "420",
        "servings": 2,
        "cookingTime": "10 minutes",
        "ingredients": ["1 cup oats", "1 cup milk"],
        "instructions": ["Mix", "Chill overnight"],
        "nutritionalInfo": {"protein": "14g", "fiber": 8}
    }"#;

    fn breakfast() -> MealRequest {
        MealRequest {
            meal_type: Some("breakfast".into()),
            ..MealRequest::default()
        }
    }

    #[test]
    fn test_meal_prompt_requires_type() {
        let err = meal_prompt(&MealRequest::default()).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(ref m) if m == "Meal type is required"));

        let blank = MealRequest {
            meal_type: Some("  ".into()),
            ..MealRequest::default()
        };
        assert!(meal_prompt(&blank).is_err());
    }

    #[test]
    fn test_meal_prompt_includes_options() {
        let request = MealRequest {
            meal_type: Some("dinner".into()),
            preferences: Some("vegetarian".into()),
            calorie_range: Some("400-600".into()),
            cooking_time: Some("30".into()),
        };
        let prompt = meal_prompt(&request).unwrap();
        assert!(prompt.starts_with("Generate a detailed recipe for a dinner that:"));
        assert!(prompt.contains("- Follows these dietary preferences: vegetarian"));
        assert!(prompt.contains("- Has approximately 400-600 calories per serving"));
        assert!(prompt.contains("- Can be prepared in about 30 minutes"));
        assert!(prompt.contains(r#""calories": number_of_calories_per_serving"#));
        assert!(prompt.contains(r#""cookingTime": number_of_minutes"#));

        let plain = meal_prompt(&breakfast()).unwrap();
        assert!(plain.starts_with("Generate a detailed recipe for a breakfast that:\n\nFormat"));
        assert!(!plain.contains("dietary preferences:"));
        assert!(!plain.contains("approximately"));
    }

    #[test]
    fn test_image_prompt() {
        assert_eq!(
            image_prompt("Oats", None, None),
            "A professional food photography image of Oats, a delicious dish."
        );
        assert_eq!(
            image_prompt("Oats", Some("breakfast"), Some("With berries.")),
            "A professional food photography image of Oats, a breakfast dish. With berries."
        );
    }

    #[test]
    fn test_parse_meal_is_lenient() {
        let meal = parse_meal(OATS_REPLY).unwrap();
        assert_eq!(meal.title(), "Overnight Oats");
        assert_eq!(meal.calories(), Some(420));
        assert_eq!(meal.cooking_time(), Some(10));
        assert_eq!(meal.nutritional_info()["fiber"], "8");
        assert!(!meal.id().is_empty());
    }

    #[test]
    fn test_parse_meal_keeps_unexpected_shapes() {
        let raw = r#"{
            "id": 42,
            "title": "Lentil Soup",
            "ingredients": [{"item": "lentils", "amount": "1 cup"}, "2 cups stock"],
            "instructions": "Simmer everything.",
            "cuisine": "Turkish",
            "tags": ["vegan"]
        }"#;
        let meal = parse_meal(raw).unwrap();
        assert_eq!(meal.id(), "42");
        let ingredients = meal.ingredients();
        assert_eq!(ingredients.len(), 2);
        assert!(ingredients[0].contains("lentils") && ingredients[0].contains("1 cup"));
        assert_eq!(ingredients[1], "2 cups stock");
        assert_eq!(meal.instructions(), vec!["Simmer everything."]);

        let json = serde_json::to_value(&meal).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["ingredients"][0]["item"], "lentils");
        assert_eq!(json["cuisine"], "Turkish");
        assert_eq!(json["tags"], serde_json::json!(["vegan"]));
    }

    #[test]
    fn test_parse_meal_strips_code_fence() {
        let fenced = format!("```json\n{OATS_REPLY}\n```");
        assert_eq!(parse_meal(&fenced).unwrap().title(), "Overnight Oats");
    }

    #[test]
    fn test_parse_meal_keeps_raw_text() {
        let err = parse_meal("Sorry, I can't help with that.").unwrap_err();
        match err {
            GenerationError::Parse { raw, .. } => assert_eq!(raw, "Sorry, I can't help with that."),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(matches!(
            parse_meal(r#"{"type":"lunch"}"#),
            Err(GenerationError::Parse { ref reason, .. }) if reason == "reply has no title"
        ));
        assert!(matches!(
            parse_meal(r#"["Oats"]"#),
            Err(GenerationError::Parse { ref reason, .. }) if reason == "reply is not a JSON object"
        ));
    }

    #[test]
    fn test_to_favorite_keeps_recipe() {
        let favorite = parse_meal(OATS_REPLY).unwrap().to_favorite();
        assert_eq!(favorite.title, "Overnight Oats");
        assert_eq!(favorite.meal_type, "breakfast");
        assert_eq!(favorite.calories, Some(420));
        assert_eq!(favorite.cooking_time, Some(10));
        assert_eq!(favorite.ingredients.len(), 2);
        assert!(favorite.user_id.is_empty());
    }

    #[tokio::test]
    async fn test_generate_meal_stamps_and_illustrates() {
        let stub = StubGenerator::new(OATS_REPLY);
        let meal = generate_meal(&stub, &breakfast()).await.unwrap();
        assert!(meal.generated_at().is_some());
        assert_eq!(meal.image_url(), Some("https://img.example/oats.png"));

        let prompts = stub.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Overnight Oats, a breakfast dish. Creamy oats"));
    }

    #[tokio::test]
    async fn test_generate_meal_survives_image_failure() {
        let mut stub = StubGenerator::new(OATS_REPLY);
        stub.image_fails = true;
        let meal = generate_meal(&stub, &breakfast()).await.unwrap();
        assert!(meal.image_url().is_none());

        let json = serde_json::to_value(&meal).unwrap();
        assert!(json.get("imageUrl").is_some_and(serde_json::Value::is_null));
        assert_eq!(json["cookingTime"], "10 minutes");
        assert_eq!(json["calories"], "420");
    }

    #[tokio::test]
    async fn test_generate_meal_upstream_failure() {
        let stub = StubGenerator::new("");
        stub.replies.lock().unwrap().clear();
        stub.replies
            .lock()
            .unwrap()
            .push_back(Err(anyhow!("OPENAI_API_KEY is not set")));
        let err = generate_meal(&stub, &breakfast()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Upstream(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_generate_image() {
        let stub = StubGenerator::new("");
        let request = ImageRequest {
            meal_title: Some("Oats".into()),
            ..ImageRequest::default()
        };
        let url = generate_image(&stub, &request).await.unwrap();
        assert_eq!(url, "https://img.example/oats.png");

        let missing = generate_image(&stub, &ImageRequest::default()).await;
        assert!(matches!(missing, Err(GenerationError::InvalidRequest(ref m)) if m == "Meal title is required"));

        let mut empty = StubGenerator::new("");
        empty.image = None;
        assert!(matches!(
            generate_image(&empty, &request).await,
            Err(GenerationError::NoImage)
        ));
    }
}
