use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::config::{Config, EnvStatus};
use crate::openai::OpenAiClient;
use crate::supabase::HostedStore;
use mealplan_core::mealgen::{self, GeneratedMeal, GenerationError, MealGenerator};
use mealplan_core::models::{
    DatabaseStatus, FavoriteMeal, ImageRequest, MealRequest, PlannedMeal, validate_favorite,
};
use mealplan_core::service::{LocalTarget, MealService, MealStore};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MiB

/// Backends the persistence façade is resolved from.
#[derive(Clone)]
pub struct Backends {
    pub hosted: Option<Arc<dyn MealStore>>,
    pub local: LocalTarget,
}

impl Backends {
    pub async fn resolve(&self) -> MealService {
        MealService::resolve(self.hosted.clone(), self.local.clone()).await
    }
}

#[derive(Clone)]
struct AppState {
    meals: Arc<RwLock<Arc<MealService>>>,
    backends: Backends,
    generator: Arc<dyn MealGenerator>,
    user_id: Arc<str>,
    env: EnvStatus,
}

impl AppState {
    /// Current façade. The lock is released before the caller awaits on it.
    async fn meals(&self) -> Arc<MealService> {
        Arc::clone(&*self.meals.read().await)
    }
}

// --- Error handling ---

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

enum ApiError {
    BadRequest(String),
    PayloadTooLarge(String),
    Internal {
        error: &'static str,
        source: anyhow::Error,
    },
    MealParse {
        raw: String,
        reason: String,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: msg,
                    message: None,
                }),
            )
                .into_response(),
            Self::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ErrorResponse {
                    error: msg,
                    message: None,
                }),
            )
                .into_response(),
            Self::Internal { error, source } => {
                error!("{error}: {source:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: error.to_string(),
                        message: Some(format!("{source:#}")),
                    }),
                )
                    .into_response()
            }
            Self::MealParse { raw, reason } => {
                warn!(%reason, chars = raw.len(), "meal reply could not be parsed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "Failed to parse meal data",
                        "rawResponse": raw,
                    })),
                )
                    .into_response()
            }
        }
    }
}

fn internal(error: &'static str) -> impl FnOnce(anyhow::Error) -> ApiError {
    move |source| ApiError::Internal { error, source }
}

fn generation_error(error: &'static str) -> impl FnOnce(GenerationError) -> ApiError {
    move |err| match err {
        GenerationError::InvalidRequest(msg) => ApiError::BadRequest(msg),
        GenerationError::Parse { raw, reason } => ApiError::MealParse { raw, reason },
        other => ApiError::Internal {
            error,
            source: other.into(),
        },
    }
}

fn bad_json(rejection: &JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(rejection.body_text())
    } else {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn success(ok: bool) -> Json<Value> {
    Json(json!({ "success": ok }))
}

// --- Meal handlers ---

async fn list_favorites(
    State(state): State<AppState>,
) -> Result<Json<Vec<FavoriteMeal>>, ApiError> {
    let meals = state.meals().await;
    let favorites = meals
        .list_favorites(&state.user_id)
        .await
        .map_err(internal("Failed to get favorite meals"))?;
    Ok(Json(favorites))
}

async fn add_favorite(
    State(state): State<AppState>,
    payload: Result<Json<FavoriteMeal>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(meal) = payload.map_err(|e| bad_json(&e))?;
    validate_favorite(&meal).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let meals = state.meals().await;
    let ok = meals
        .add_favorite(&meal, &state.user_id)
        .await
        .map_err(internal("Failed to save favorite meal"))?;
    Ok(success(ok))
}

async fn remove_favorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let meals = state.meals().await;
    let ok = meals
        .remove_favorite(&id, &state.user_id)
        .await
        .map_err(internal("Failed to remove favorite meal"))?;
    Ok(success(ok))
}

async fn check_favorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let meals = state.meals().await;
    let is_favorite = meals
        .is_favorite(&id, &state.user_id)
        .await
        .map_err(internal("Failed to check if meal is favorite"))?;
    Ok(Json(json!({ "isFavorite": is_favorite })))
}

async fn get_planned(State(state): State<AppState>) -> Result<Json<Vec<PlannedMeal>>, ApiError> {
    let meals = state.meals().await;
    let planned = meals
        .planned_meals(&state.user_id)
        .await
        .map_err(internal("Failed to get planned meals"))?;
    Ok(Json(planned))
}

async fn save_planned(
    State(state): State<AppState>,
    payload: Result<Json<Vec<PlannedMeal>>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(planned) = payload.map_err(|e| bad_json(&e))?;
    let meals = state.meals().await;
    let ok = meals
        .save_planned_meals(&planned, &state.user_id)
        .await
        .map_err(internal("Failed to save planned meals"))?;
    Ok(success(ok))
}

async fn clear_all(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let meals = state.meals().await;
    let ok = meals
        .clear_user_data(&state.user_id)
        .await
        .map_err(internal("Failed to clear all data"))?;
    Ok(success(ok))
}

async fn database_status(State(state): State<AppState>) -> Json<DatabaseStatus> {
    let meals = state.meals().await;
    Json(meals.status().await)
}

// --- Generation handlers ---

async fn generate_meal(
    State(state): State<AppState>,
    payload: Result<Json<MealRequest>, JsonRejection>,
) -> Result<Json<GeneratedMeal>, ApiError> {
    let Json(request) = payload.map_err(|e| bad_json(&e))?;
    let meal = mealgen::generate_meal(state.generator.as_ref(), &request)
        .await
        .map_err(generation_error("Failed to generate meal"))?;
    info!(id = %meal.id(), title = %meal.title(), "generated meal");
    Ok(Json(meal))
}

async fn generate_image(
    State(state): State<AppState>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|e| bad_json(&e))?;
    let url = mealgen::generate_image(state.generator.as_ref(), &request)
        .await
        .map_err(generation_error("Failed to generate image"))?;
    Ok(Json(json!({ "imageUrl": url })))
}

// --- Service endpoints ---

async fn index() -> Json<Value> {
    Json(json!({
        "message": "Meal planner API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "meals": "/api/meals/*",
            "openai": "/api/openai/*",
        },
    }))
}

async fn health() -> &'static str {
    "OK"
}

async fn env_status(State(state): State<AppState>) -> Json<EnvStatus> {
    Json(state.env.clone())
}

async fn initialize_database(State(state): State<AppState>) -> Json<Value> {
    info!("re-initializing database");
    let service = Arc::new(state.backends.resolve().await);
    let initialized = service.backend().is_some();
    *state.meals.write().await = service;
    Json(json!({
        "success": initialized,
        "message": if initialized {
            "Database initialized successfully"
        } else {
            "Database initialization had issues"
        },
    }))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route(
            "/api/meals/favorites",
            get(list_favorites).post(add_favorite),
        )
        .route(
            "/api/meals/favorites/{id}",
            get(check_favorite).delete(remove_favorite),
        )
        .route("/api/meals/planned", get(get_planned).post(save_planned))
        .route("/api/meals/all", delete(clear_all))
        .route("/api/meals/database/status", get(database_status))
        .route("/api/openai/generate-meal", post(generate_meal))
        .route("/api/openai/generate-image", post(generate_image))
        .route("/api/status/database", get(database_status))
        .route("/api/status/env", get(env_status))
        .route("/api/admin/initialize-database", post(initialize_database))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

/// Resolve the database from `backends` and build the router around it.
pub(crate) async fn app(
    backends: Backends,
    generator: Arc<dyn MealGenerator>,
    user_id: &str,
    env: EnvStatus,
) -> Router {
    let service = backends.resolve().await;
    match service.backend() {
        Some(kind) => info!(backend = %kind, "database initialized"),
        None => warn!("database initialization failed, serving diagnostics only"),
    }

    build_router(AppState {
        meals: Arc::new(RwLock::new(Arc::new(service))),
        backends,
        generator,
        user_id: Arc::from(user_id),
        env,
    })
}

pub async fn start_server(
    config: &Config,
    port: u16,
    bind: &str,
    local_only: bool,
) -> anyhow::Result<()> {
    let hosted: Option<Arc<dyn MealStore>> = match config.hosted() {
        Some(_) if local_only => {
            info!("--local-only given, skipping hosted database");
            None
        }
        Some(credentials) => Some(Arc::new(HostedStore::new(&credentials)?)),
        None => {
            if config.supabase_url.is_some() != config.supabase_anon_key.is_some() {
                warn!("only one of SUPABASE_URL and SUPABASE_ANON_KEY is set, ignoring both");
            }
            None
        }
    };
    let backends = Backends {
        hosted,
        local: LocalTarget::File(config.db_path.clone()),
    };

    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set, generation endpoints will fail");
    }
    let generator = Arc::new(OpenAiClient::new(config.openai_api_key.clone())?);

    let app = app(backends, generator, &config.user_id, config.env_status(port)).await;

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!("listening on http://{bind}:{port}");
    eprintln!("API base URL: http://{bind}:{port}/api");
    axum::serve(listener, app).await?;

    Ok(())
}
