//! PostgREST wire details for the hosted store.
//!
//! Pure request/response plumbing; the HTTP client that uses it lives in the
//! binary crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::models::{MealTable, PlannedMeal, PlannedMealsRecord, SYSTEM_USER_ID, TableProbe};

/// Postgres `undefined_table`.
pub const UNDEFINED_TABLE: &str = "42P01";
/// PostgREST's "relation not found in schema cache".
pub const SCHEMA_CACHE_MISS: &str = "PGRST205";

const PLACEHOLDER_FAVORITE_ID: &str = "init-test";

/// Error body returned by PostgREST, e.g.
/// `{"code":"42P01","message":"relation \"public.x\" does not exist",...}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PostgrestError {
    #[serde(skip)]
    pub status: u16,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl PostgrestError {
    /// Decode an error response. Bodies that are not PostgREST JSON keep
    /// their raw text as the message.
    #[must_use]
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<PostgrestError>(body) {
            Ok(mut err) => {
                err.status = status;
                err
            }
            Err(_) => Self {
                status,
                message: Some(body.trim().to_string()).filter(|m| !m.is_empty()),
                ..Self::default()
            },
        }
    }

    #[must_use]
    pub fn is_undefined_relation(&self) -> bool {
        matches!(
            self.code.as_deref(),
            Some(UNDEFINED_TABLE | SCHEMA_CACHE_MISS)
        )
    }

    #[must_use]
    pub fn describe(&self) -> String {
        let message = self.message.as_deref().unwrap_or("request failed");
        match &self.code {
            Some(code) => format!("{message} (code {code}, HTTP {})", self.status),
            None => format!("{message} (HTTP {})", self.status),
        }
    }
}

impl fmt::Display for PostgrestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for PostgrestError {}

/// Classify the response to a trial `select=id&limit=1` read.
#[must_use]
pub fn classify_probe(status: u16, body: &str) -> TableProbe {
    if (200..300).contains(&status) {
        return TableProbe::Available;
    }
    let err = PostgrestError::from_body(status, body);
    if err.is_undefined_relation() {
        TableProbe::Missing(err.describe())
    } else {
        TableProbe::Unreachable(err.describe())
    }
}

/// `column=eq.value` query pair.
#[must_use]
pub fn eq_filter(column: &str, value: &str) -> (String, String) {
    (column.to_string(), format!("eq.{value}"))
}

/// Row shape of `planned_meals` as PostgREST returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannedMealsRow {
    pub user_id: String,
    #[serde(default)]
    pub meals_data: Option<Vec<PlannedMeal>>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl PlannedMealsRow {
    #[must_use]
    pub fn into_record(self) -> PlannedMealsRecord {
        PlannedMealsRecord {
            user_id: self.user_id,
            meals: self.meals_data.unwrap_or_default(),
            last_updated: self.last_updated,
        }
    }
}

/// Body for inserting or replacing a `planned_meals` row.
#[derive(Debug, Serialize)]
pub struct PlannedMealsWrite<'a> {
    pub user_id: &'a str,
    pub meals_data: &'a [PlannedMeal],
    pub last_updated: &'a str,
}

/// Row written while provisioning `table`, owned by the system user.
#[must_use]
pub fn placeholder_row(table: MealTable) -> Value {
    match table {
        MealTable::FavoriteMeals => json!({
            "id": PLACEHOLDER_FAVORITE_ID,
            "title": "Initialization Test",
            "type": "test",
            "user_id": SYSTEM_USER_ID,
        }),
        MealTable::PlannedMeals => json!({
            "user_id": SYSTEM_USER_ID,
            "meals_data": [],
        }),
    }
}

/// Filters that select exactly the placeholder row of `table`.
#[must_use]
pub fn placeholder_filters(table: MealTable) -> Vec<(String, String)> {
    match table {
        MealTable::FavoriteMeals => vec![
            eq_filter("id", PLACEHOLDER_FAVORITE_ID),
            eq_filter("user_id", SYSTEM_USER_ID),
        ],
        MealTable::PlannedMeals => vec![eq_filter("user_id", SYSTEM_USER_ID)],
    }
}
