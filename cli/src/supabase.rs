use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;

use mealplan_core::hosted::{
    PlannedMealsRow, PlannedMealsWrite, PostgrestError, classify_probe, eq_filter,
    placeholder_filters, placeholder_row,
};
use mealplan_core::models::{
    BackendKind, FavoriteMeal, MealTable, PlannedMeal, PlannedMealsRecord, TableProbe,
    now_rfc3339,
};
use mealplan_core::service::MealStore;

use crate::config::HostedCredentials;

/// [`MealStore`] over a Supabase project's PostgREST endpoint.
pub struct HostedStore {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl HostedStore {
    pub fn new(credentials: &HostedCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("mealplan/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: credentials.url.trim_end_matches('/').to_string(),
            anon_key: credentials.anon_key.clone(),
        })
    }

    fn request(&self, method: Method, table: MealTable) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    fn insert(&self, table: MealTable) -> RequestBuilder {
        self.request(Method::POST, table)
            .header("Prefer", "return=minimal")
    }

    /// Send `req`, returning the body of a 2xx response and the decoded
    /// PostgREST error otherwise.
    async fn send(req: RequestBuilder) -> Result<String> {
        let resp = req
            .send()
            .await
            .context("Failed to reach hosted database")?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .context("Failed to read hosted database response")?;
        if !status.is_success() {
            return Err(PostgrestError::from_body(status.as_u16(), &body).into());
        }
        Ok(body)
    }

    async fn fetch<T: DeserializeOwned>(req: RequestBuilder) -> Result<Vec<T>> {
        let body = Self::send(req).await?;
        serde_json::from_str(&body).context("Failed to parse hosted database response")
    }

    async fn planned_row_exists(&self, user_id: &str) -> Result<bool> {
        let rows: Vec<serde_json::Value> = Self::fetch(
            self.request(Method::GET, MealTable::PlannedMeals)
                .query(&[("select", "id"), ("limit", "1")])
                .query(&[eq_filter("user_id", user_id)]),
        )
        .await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl MealStore for HostedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    async fn probe_table(&self, table: MealTable) -> TableProbe {
        let resp = self
            .request(Method::GET, table)
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await;
        match resp {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match resp.text().await {
                    Ok(body) => classify_probe(status, &body),
                    Err(e) => TableProbe::Unreachable(e.to_string()),
                }
            }
            Err(e) => TableProbe::Unreachable(e.to_string()),
        }
    }

    async fn provision_table(&self, table: MealTable) -> Result<()> {
        Self::send(self.insert(table).json(&placeholder_row(table)))
            .await
            .with_context(|| format!("Failed to write placeholder row to {table}"))?;
        Self::send(
            self.request(Method::DELETE, table)
                .query(&placeholder_filters(table)),
        )
        .await
        .with_context(|| format!("Failed to remove placeholder row from {table}"))?;
        Ok(())
    }

    async fn list_favorites(&self, user_id: &str) -> Result<Vec<FavoriteMeal>> {
        Self::fetch(
            self.request(Method::GET, MealTable::FavoriteMeals)
                .query(&[("select", "*")])
                .query(&[eq_filter("user_id", user_id)]),
        )
        .await
    }

    async fn insert_favorite(&self, meal: &FavoriteMeal) -> Result<()> {
        Self::send(self.insert(MealTable::FavoriteMeals).json(meal)).await?;
        Ok(())
    }

    async fn delete_favorite(&self, id: &str, user_id: &str) -> Result<()> {
        Self::send(
            self.request(Method::DELETE, MealTable::FavoriteMeals)
                .query(&[eq_filter("id", id), eq_filter("user_id", user_id)]),
        )
        .await?;
        Ok(())
    }

    async fn favorite_exists(&self, id: &str, user_id: &str) -> Result<bool> {
        let rows: Vec<serde_json::Value> = Self::fetch(
            self.request(Method::GET, MealTable::FavoriteMeals)
                .query(&[("select", "id"), ("limit", "1")])
                .query(&[eq_filter("id", id), eq_filter("user_id", user_id)]),
        )
        .await?;
        Ok(!rows.is_empty())
    }

    async fn clear_favorites(&self, user_id: &str) -> Result<()> {
        Self::send(
            self.request(Method::DELETE, MealTable::FavoriteMeals)
                .query(&[eq_filter("user_id", user_id)]),
        )
        .await?;
        Ok(())
    }

    async fn planned_meals(&self, user_id: &str) -> Result<Option<PlannedMealsRecord>> {
        let rows: Vec<PlannedMealsRow> = Self::fetch(
            self.request(Method::GET, MealTable::PlannedMeals)
                .query(&[("select", "*"), ("limit", "1")])
                .query(&[eq_filter("user_id", user_id)]),
        )
        .await?;
        Ok(rows.into_iter().next().map(PlannedMealsRow::into_record))
    }

    async fn save_planned_meals(&self, user_id: &str, meals: &[PlannedMeal]) -> Result<()> {
        let last_updated = now_rfc3339();
        let write = PlannedMealsWrite {
            user_id,
            meals_data: meals,
            last_updated: &last_updated,
        };
        let req = if self.planned_row_exists(user_id).await? {
            self.request(Method::PATCH, MealTable::PlannedMeals)
                .query(&[eq_filter("user_id", user_id)])
                .json(&write)
        } else {
            self.insert(MealTable::PlannedMeals).json(&write)
        };
        Self::send(req).await?;
        Ok(())
    }

    async fn clear_planned_meals(&self, user_id: &str) -> Result<()> {
        Self::send(
            self.request(Method::DELETE, MealTable::PlannedMeals)
                .query(&[eq_filter("user_id", user_id)]),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use axum::{
        Json, Router,
        body::Bytes,
        extract::{Path, Query, State},
        http::{HeaderMap, Method, StatusCode},
        response::{IntoResponse, Response},
        routing::any,
    };
    use mealplan_core::service::{LocalTarget, MealService};
    use serde_json::{Value, json};

    use super::*;

    pub(crate) const TEST_KEY: &str = "test-anon-key";

    /// In-memory PostgREST: equality filters, `limit`, and the error shapes
    /// the store reacts to.
    #[derive(Default)]
    pub(crate) struct FakePostgrest {
        pub(crate) rows: Mutex<HashMap<String, Vec<Value>>>,
        pub(crate) missing: Mutex<HashSet<String>>,
        pub(crate) inserts: Mutex<Vec<String>>,
    }

    fn matches(row: &Value, filters: &[(String, String)]) -> bool {
        filters.iter().all(|(column, value)| {
            let Some(expected) = value.strip_prefix("eq.") else {
                return true;
            };
            match row.get(column) {
                Some(Value::String(s)) => s == expected,
                Some(other) => other.to_string() == expected,
                None => false,
            }
        })
    }

    async fn fake_table(
        State(fake): State<Arc<FakePostgrest>>,
        Path(table): Path<String>,
        method: Method,
        headers: HeaderMap,
        Query(params): Query<Vec<(String, String)>>,
        body: Bytes,
    ) -> Response {
        let authorized = headers.get("apikey").is_some_and(|k| k == TEST_KEY)
            && headers
                .get("authorization")
                .is_some_and(|v| v == format!("Bearer {TEST_KEY}").as_str());
        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"message": "Invalid API key"})),
            )
                .into_response();
        }
        if fake.missing.lock().unwrap().contains(&table) {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "code": "42P01",
                    "details": null,
                    "hint": null,
                    "message": format!("relation \"public.{table}\" does not exist"),
                })),
            )
                .into_response();
        }

        let limit = params
            .iter()
            .find(|(k, _)| k == "limit")
            .and_then(|(_, v)| v.parse::<usize>().ok());
        let filters: Vec<(String, String)> = params
            .into_iter()
            .filter(|(k, _)| k != "select" && k != "limit")
            .collect();

        let mut rows = fake.rows.lock().unwrap();
        let table_rows = rows.entry(table.clone()).or_default();
        match method {
            Method::GET => {
                let found: Vec<Value> = table_rows
                    .iter()
                    .filter(|row| matches(row, &filters))
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect();
                Json(found).into_response()
            }
            Method::POST => {
                let Ok(row) = serde_json::from_slice::<Value>(&body) else {
                    return StatusCode::BAD_REQUEST.into_response();
                };
                fake.inserts.lock().unwrap().push(table);
                table_rows.push(row);
                StatusCode::CREATED.into_response()
            }
            Method::PATCH => {
                let Ok(Value::Object(patch)) = serde_json::from_slice::<Value>(&body) else {
                    return StatusCode::BAD_REQUEST.into_response();
                };
                for row in table_rows.iter_mut().filter(|row| matches(row, &filters)) {
                    if let Value::Object(fields) = row {
                        fields.extend(patch.clone());
                    }
                }
                StatusCode::NO_CONTENT.into_response()
            }
            Method::DELETE => {
                table_rows.retain(|row| !matches(row, &filters));
                StatusCode::NO_CONTENT.into_response()
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        }
    }

    /// Serve `fake` on an ephemeral port, returning its base URL.
    pub(crate) async fn spawn_fake(fake: Arc<FakePostgrest>) -> String {
        let app = Router::new()
            .route("/rest/v1/{table}", any(fake_table))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn store(url: &str, key: &str) -> HostedStore {
        HostedStore::new(&HostedCredentials {
            url: url.to_string(),
            anon_key: key.to_string(),
        })
        .unwrap()
    }

    fn oats() -> FavoriteMeal {
        serde_json::from_value(json!({
            "id": "m1",
            "title": "Oats",
            "type": "breakfast",
            "calories": 300,
            "ingredients": ["oats", "milk"],
            "nutritionalInfo": {"protein": "10g"},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_probe_classifies_responses() {
        let fake = Arc::new(FakePostgrest::default());
        fake.missing
            .lock()
            .unwrap()
            .insert("planned_meals".to_string());
        let url = spawn_fake(fake).await;

        let good = store(&url, TEST_KEY);
        assert_eq!(
            good.probe_table(MealTable::FavoriteMeals).await,
            TableProbe::Available
        );
        assert!(good.probe_table(MealTable::PlannedMeals).await.is_missing());

        let bad_key = store(&url, "wrong");
        let probe = bad_key.probe_table(MealTable::FavoriteMeals).await;
        assert!(matches!(probe, TableProbe::Unreachable(ref m) if m.contains("Invalid API key")));
    }

    #[tokio::test]
    async fn test_favorites_round_trip() {
        let fake = Arc::new(FakePostgrest::default());
        let hosted = store(&spawn_fake(fake.clone()).await, TEST_KEY);

        let meal = oats().owned_by("alice");
        assert!(!hosted.favorite_exists("m1", "alice").await.unwrap());
        hosted.insert_favorite(&meal).await.unwrap();
        assert!(hosted.favorite_exists("m1", "alice").await.unwrap());
        assert!(!hosted.favorite_exists("m1", "bob").await.unwrap());

        let listed = hosted.list_favorites("alice").await.unwrap();
        assert_eq!(listed, vec![meal]);
        assert_eq!(fake.rows.lock().unwrap()["favorite_meals"][0]["type"], "breakfast");

        hosted.delete_favorite("m1", "alice").await.unwrap();
        assert!(hosted.list_favorites("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_planned_meals_upsert() {
        let fake = Arc::new(FakePostgrest::default());
        let hosted = store(&spawn_fake(fake.clone()).await, TEST_KEY);

        assert!(hosted.planned_meals("alice").await.unwrap().is_none());

        let first = vec![PlannedMeal::new("Oats", Some(300), "breakfast")];
        hosted.save_planned_meals("alice", &first).await.unwrap();
        let saved = hosted.planned_meals("alice").await.unwrap().unwrap();
        assert_eq!(saved.meals, first);
        assert!(saved.last_updated.is_some());

        std::thread::sleep(std::time::Duration::from_millis(5));

        let second = vec![PlannedMeal::new("Soup", Some(200), "dinner")];
        hosted.save_planned_meals("alice", &second).await.unwrap();

        assert_eq!(fake.rows.lock().unwrap()["planned_meals"].len(), 1);
        let record = hosted.planned_meals("alice").await.unwrap().unwrap();
        assert_eq!(record.meals, second);
        assert!(record.last_updated > saved.last_updated);

        hosted.clear_planned_meals("alice").await.unwrap();
        assert!(hosted.planned_meals("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_body_is_propagated() {
        let fake = Arc::new(FakePostgrest::default());
        fake.missing
            .lock()
            .unwrap()
            .insert("favorite_meals".to_string());
        let hosted = store(&spawn_fake(fake).await, TEST_KEY);

        let err = hosted.list_favorites("alice").await.unwrap_err();
        let postgrest = err.downcast_ref::<PostgrestError>().unwrap();
        assert_eq!(postgrest.code.as_deref(), Some("42P01"));
        assert_eq!(postgrest.status, 404);
    }

    #[tokio::test]
    async fn test_provision_cleans_up_placeholder() {
        let fake = Arc::new(FakePostgrest::default());
        let hosted = store(&spawn_fake(fake.clone()).await, TEST_KEY);

        for table in MealTable::ALL {
            hosted.provision_table(table).await.unwrap();
        }
        assert_eq!(fake.inserts.lock().unwrap().len(), 2);
        let rows = fake.rows.lock().unwrap();
        assert!(rows.values().all(Vec::is_empty));
    }

    #[tokio::test]
    async fn test_resolve_prefers_reachable_hosted() {
        let fake = Arc::new(FakePostgrest::default());
        let hosted: Arc<dyn MealStore> = Arc::new(store(&spawn_fake(fake).await, TEST_KEY));
        let service = MealService::resolve(Some(hosted), LocalTarget::InMemory).await;
        assert_eq!(service.backend(), Some(BackendKind::Hosted));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_missing_table() {
        let fake = Arc::new(FakePostgrest::default());
        fake.missing
            .lock()
            .unwrap()
            .insert("favorite_meals".to_string());
        let hosted: Arc<dyn MealStore> =
            Arc::new(store(&spawn_fake(fake.clone()).await, TEST_KEY));
        let service = MealService::resolve(Some(hosted), LocalTarget::InMemory).await;

        assert_eq!(service.backend(), Some(BackendKind::Local));
        assert!(fake.inserts.lock().unwrap().is_empty());

        service
            .add_favorite(&oats(), "default_user")
            .await
            .unwrap();
        assert!(service.is_favorite("m1", "default_user").await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_falls_back_when_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let hosted: Arc<dyn MealStore> = Arc::new(store(&format!("http://{addr}"), TEST_KEY));
        let service = MealService::resolve(Some(hosted), LocalTarget::InMemory).await;
        assert_eq!(service.backend(), Some(BackendKind::Local));

        let status = service.status().await;
        assert!(status.hosted.configured);
        assert!(!status.hosted.planned_meals.reachable);
        assert!(status.error.is_some());
    }
}
