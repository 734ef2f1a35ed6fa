use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use uuid::Uuid;

/// User every request is scoped to when nothing else is configured.
pub const DEFAULT_USER_ID: &str = "default_user";

/// Owner of the placeholder rows written while provisioning hosted tables.
pub const SYSTEM_USER_ID: &str = "system";

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteMeal {
    pub id: String,
    pub title: String,
    #[serde(rename = "type", default)]
    pub meal_type: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub calories: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub servings: Option<i64>,
    #[serde(default, alias = "cookingTime", deserialize_with = "lenient_minutes")]
    pub cooking_time: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ingredients: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub instructions: Vec<String>,
    #[serde(default, alias = "nutritionalInfo", deserialize_with = "nutrient_map")]
    pub nutritional_info: BTreeMap<String, String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub date_added: Option<String>,
}

impl FavoriteMeal {
    /// Copy of this meal owned by `user_id` and stamped with the current time.
    #[must_use]
    pub fn owned_by(&self, user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            date_added: Some(now_rfc3339()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn calories_per_serving(&self) -> i64 {
        calories_per_serving(self.calories, self.servings)
    }
}

/// One entry of a user's planned-meals list.
///
/// Entries are stored and returned exactly as the client sent them. The
/// accessors read the few fields the server and CLI look at without
/// reshaping the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlannedMeal(Map<String, Value>);

impl PlannedMeal {
    #[must_use]
    pub fn new(name: &str, calories: Option<i64>, meal_type: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        fields.insert("name".into(), Value::String(name.to_string()));
        if let Some(calories) = calories {
            fields.insert("calories".into(), Value::from(calories));
        }
        fields.insert("type".into(), Value::String(meal_type.to_string()));
        fields.insert("date".into(), Value::String(now_rfc3339()));
        Self(fields)
    }

    /// Planned entry for a favorite, keeping its id so it can be traced back.
    #[must_use]
    pub fn from_favorite(meal: &FavoriteMeal) -> Self {
        let mut planned = Self::new(&meal.title, meal.calories, &meal.meal_type);
        let fields = &mut planned.0;
        fields.insert("id".into(), Value::String(meal.id.clone()));
        fields.insert("title".into(), Value::String(meal.title.clone()));
        if let Some(servings) = meal.servings {
            fields.insert("servings".into(), Value::from(servings));
        }
        if let Some(minutes) = meal.cooking_time {
            fields.insert("cookingTime".into(), Value::from(minutes));
        }
        planned
    }

    /// Id as text. Numeric ids are rendered as their digits.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.0
            .get("id")
            .cloned()
            .and_then(display_value)
            .filter(|id| !id.is_empty())
    }

    /// `name`, or `title` for entries planned from a favorite.
    #[must_use]
    pub fn name(&self) -> &str {
        self.text("name")
            .filter(|n| !n.is_empty())
            .or_else(|| self.text("title"))
            .unwrap_or_default()
    }

    /// Calories when the entry carries a readable number.
    #[must_use]
    pub fn calories(&self) -> Option<i64> {
        self.0.get("calories").and_then(count_from_value)
    }

    #[must_use]
    pub fn meal_type(&self) -> &str {
        self.text("type").unwrap_or_default()
    }

    #[must_use]
    pub fn date(&self) -> Option<String> {
        self.0.get("date").cloned().and_then(display_value)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for PlannedMeal {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// The single per-user planned-meals row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMealsRecord {
    pub user_id: String,
    pub meals: Vec<PlannedMeal>,
    pub last_updated: Option<String>,
}

// --- Backends and diagnostics ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Hosted,
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hosted => f.write_str("hosted"),
            Self::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MealTable {
    FavoriteMeals,
    PlannedMeals,
}

impl MealTable {
    pub const ALL: [MealTable; 2] = [MealTable::FavoriteMeals, MealTable::PlannedMeals];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::FavoriteMeals => "favorite_meals",
            Self::PlannedMeals => "planned_meals",
        }
    }
}

impl fmt::Display for MealTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a trial read against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableProbe {
    Available,
    /// The backend answered that the relation does not exist.
    Missing(String),
    /// Network, auth, or any other failure.
    Unreachable(String),
}

impl TableProbe {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Available => None,
            Self::Missing(msg) | Self::Unreachable(msg) => Some(msg.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStatus {
    pub exists: bool,
    pub reachable: bool,
    pub error: Option<String>,
}

impl From<&TableProbe> for TableStatus {
    fn from(probe: &TableProbe) -> Self {
        Self {
            exists: !probe.is_missing(),
            reachable: probe.is_available(),
            error: probe.error_message().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedStatus {
    pub configured: bool,
    pub favorite_meals: TableStatus,
    pub planned_meals: TableStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStatus {
    pub exists: bool,
    pub path: Option<String>,
    pub initialized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStatus {
    pub using: Option<BackendKind>,
    pub initialized: bool,
    pub hosted: HostedStatus,
    pub local: LocalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// --- Generation requests ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealRequest {
    #[serde(default)]
    pub meal_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub preferences: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub calorie_range: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub cooking_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    #[serde(default)]
    pub meal_title: Option<String>,
    #[serde(default)]
    pub meal_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

// --- Validation ---

pub fn validate_meal_type(meal: &str) -> anyhow::Result<String> {
    let lower = meal.trim().to_lowercase();
    if MEAL_TYPES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        anyhow::bail!(
            "Invalid meal type '{meal}'. Must be one of: {}",
            MEAL_TYPES.join(", ")
        )
    }
}

pub fn validate_favorite(meal: &FavoriteMeal) -> Result<()> {
    if meal.id.trim().is_empty() {
        bail!("id must not be empty");
    }
    if meal.title.trim().is_empty() {
        bail!("title must not be empty");
    }
    if meal.calories.is_some_and(|c| c < 0) {
        bail!("calories must not be negative");
    }
    if meal.servings.is_some_and(|s| s < 0) {
        bail!("servings must not be negative");
    }
    Ok(())
}

// --- List helpers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MealSort {
    CaloriesLowToHigh,
    CaloriesHighToLow,
    NameAToZ,
    NameZToA,
    CookingTime,
}

impl FromStr for MealSort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "calories-low-to-high" => Ok(Self::CaloriesLowToHigh),
            "calories-high-to-low" => Ok(Self::CaloriesHighToLow),
            "name-a-to-z" => Ok(Self::NameAToZ),
            "name-z-to-a" => Ok(Self::NameZToA),
            "cooking-time" => Ok(Self::CookingTime),
            _ => bail!(
                "Unknown sort '{s}'. Use calories-low-to-high, calories-high-to-low, name-a-to-z, name-z-to-a, or cooking-time"
            ),
        }
    }
}

/// Keep meals of `meal_type`; `None` or "All" keeps everything.
#[must_use]
pub fn filter_by_type(meals: Vec<FavoriteMeal>, meal_type: Option<&str>) -> Vec<FavoriteMeal> {
    match meal_type {
        None => meals,
        Some(t) if t.eq_ignore_ascii_case("all") => meals,
        Some(t) => meals
            .into_iter()
            .filter(|m| m.meal_type.eq_ignore_ascii_case(t))
            .collect(),
    }
}

/// Stable sort; meals without calories or cooking time sort as zero.
pub fn sort_meals(meals: &mut [FavoriteMeal], sort: MealSort) {
    match sort {
        MealSort::CaloriesLowToHigh => meals.sort_by_key(|m| m.calories.unwrap_or(0)),
        MealSort::CaloriesHighToLow => {
            meals.sort_by_key(|m| std::cmp::Reverse(m.calories.unwrap_or(0)));
        }
        MealSort::NameAToZ => meals.sort_by_key(|m| m.title.to_lowercase()),
        MealSort::NameZToA => {
            meals.sort_by_key(|m| std::cmp::Reverse(m.title.to_lowercase()));
        }
        MealSort::CookingTime => meals.sort_by_key(|m| m.cooking_time.unwrap_or(0)),
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calories_per_serving(total: Option<i64>, servings: Option<i64>) -> i64 {
    match (total, servings) {
        (Some(total), Some(servings)) if total > 0 && servings > 0 => {
            (total as f64 / servings as f64).round() as i64
        }
        _ => 0,
    }
}

/// Minutes in a free-form duration such as "1h 30m", "45 minutes" or "20".
///
/// The first number followed by `h` counts as hours and the first followed
/// by `m` as minutes; later ones are ignored. If neither unit appears, the
/// first number is taken as minutes.
#[must_use]
pub fn cooking_time_to_minutes(text: &str) -> u32 {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    let mut hours: Option<u32> = None;
    let mut minutes: Option<u32> = None;
    let mut first: Option<u32> = None;
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let value: u32 = chars[start..i]
            .iter()
            .collect::<String>()
            .parse()
            .unwrap_or(0);
        first.get_or_insert(value);

        let mut j = i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        match chars.get(j) {
            Some('h') => {
                hours.get_or_insert(value);
            }
            Some('m') => {
                minutes.get_or_insert(value);
            }
            _ => {}
        }
    }
    let total = hours
        .unwrap_or(0)
        .saturating_mul(60)
        .saturating_add(minutes.unwrap_or(0));
    if total == 0 { first.unwrap_or(0) } else { total }
}

#[must_use]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// --- Lenient field decoding ---
//
// Records arrive from mobile clients, the hosted store and the language
// model, which disagree on whether numbers are numbers or strings.

pub(crate) fn count_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let t = s.trim();
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    value.as_str().is_some_and(|s| s.trim().is_empty())
}

/// Whole number given as a number or numeric text. Blank text reads as
/// absent; anything else is rejected.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None => Ok(None),
        Some(value) if is_blank(&value) => Ok(None),
        Some(value) => count_from_value(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected a number, found {value}"))),
    }
}

/// Minutes given as a number or a duration such as "1h 30m".
fn lenient_minutes<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None => Ok(None),
        Some(value) if is_blank(&value) => Ok(None),
        Some(Value::String(s)) if s.chars().any(|c| c.is_ascii_digit()) => {
            Ok(Some(i64::from(cooking_time_to_minutes(&s))))
        }
        Some(value) => count_from_value(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected a duration, found {value}"))),
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(display_value)
        .filter(|s| !s.trim().is_empty()))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn nutrient_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| display_value(v).map(|s| (k, s)))
        .collect())
}

pub(crate) fn display_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
