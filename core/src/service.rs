use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::models::{
    BackendKind, DatabaseStatus, FavoriteMeal, HostedStatus, LocalStatus, MealTable, PlannedMeal,
    PlannedMealsRecord, TableProbe, TableStatus,
};

/// Storage backend for favorites and planned meals.
///
/// The CLI implements this over PostgREST with reqwest; [`LocalStore`] wraps
/// the SQLite [`Database`]. Every method is scoped to one user.
#[async_trait]
pub trait MealStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Trial read against `table`.
    async fn probe_table(&self, table: MealTable) -> TableProbe;

    /// Best-effort attempt to make `table` usable.
    async fn provision_table(&self, table: MealTable) -> Result<()>;

    async fn list_favorites(&self, user_id: &str) -> Result<Vec<FavoriteMeal>>;
    async fn insert_favorite(&self, meal: &FavoriteMeal) -> Result<()>;
    async fn delete_favorite(&self, id: &str, user_id: &str) -> Result<()>;
    async fn favorite_exists(&self, id: &str, user_id: &str) -> Result<bool>;
    async fn clear_favorites(&self, user_id: &str) -> Result<()>;

    async fn planned_meals(&self, user_id: &str) -> Result<Option<PlannedMealsRecord>>;
    async fn save_planned_meals(&self, user_id: &str, meals: &[PlannedMeal]) -> Result<()>;
    async fn clear_planned_meals(&self, user_id: &str) -> Result<()>;
}

/// Where the local fallback database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalTarget {
    File(PathBuf),
    InMemory,
}

impl LocalTarget {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::InMemory => None,
        }
    }
}

/// [`MealStore`] backed by a local SQLite file.
pub struct LocalStore {
    db: Mutex<Database>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::open(path)?;
        Ok(Self { db: Mutex::new(db) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db: Mutex::new(db) })
    }

    pub fn open_target(target: &LocalTarget) -> Result<Self> {
        match target {
            LocalTarget::File(path) => Self::open(path),
            LocalTarget::InMemory => Self::open_in_memory(),
        }
    }

    // A panic mid-statement leaves SQLite consistent, so a poisoned lock is still usable.
    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MealStore for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn probe_table(&self, table: MealTable) -> TableProbe {
        match self.db().table_exists(table) {
            Ok(true) => TableProbe::Available,
            Ok(false) => TableProbe::Missing(format!("no such table: {table}")),
            Err(e) => TableProbe::Unreachable(format!("{e:#}")),
        }
    }

    async fn provision_table(&self, table: MealTable) -> Result<()> {
        self.db().create_table(table)
    }

    async fn list_favorites(&self, user_id: &str) -> Result<Vec<FavoriteMeal>> {
        self.db().list_favorites(user_id)
    }

    async fn insert_favorite(&self, meal: &FavoriteMeal) -> Result<()> {
        self.db().insert_favorite(meal).map(|_| ())
    }

    async fn delete_favorite(&self, id: &str, user_id: &str) -> Result<()> {
        self.db().delete_favorite(id, user_id).map(|_| ())
    }

    async fn favorite_exists(&self, id: &str, user_id: &str) -> Result<bool> {
        self.db().favorite_exists(id, user_id)
    }

    async fn clear_favorites(&self, user_id: &str) -> Result<()> {
        self.db().clear_favorites(user_id).map(|_| ())
    }

    async fn planned_meals(&self, user_id: &str) -> Result<Option<PlannedMealsRecord>> {
        self.db().get_planned_meals(user_id)
    }

    async fn save_planned_meals(&self, user_id: &str, meals: &[PlannedMeal]) -> Result<()> {
        self.db().save_planned_meals(user_id, meals).map(|_| ())
    }

    async fn clear_planned_meals(&self, user_id: &str) -> Result<()> {
        self.db().clear_planned_meals(user_id).map(|_| ())
    }
}

/// Backend-agnostic access to favorites and planned meals.
///
/// Built once by [`MealService::resolve`], which picks the hosted store when
/// both of its tables answer and the local database otherwise. The choice is
/// fixed for the lifetime of the value.
pub struct MealService {
    store: Option<Arc<dyn MealStore>>,
    hosted: Option<Arc<dyn MealStore>>,
    local_path: Option<PathBuf>,
    fallback_reason: Option<String>,
    init_error: Option<String>,
}

impl MealService {
    /// Probe `hosted` (if any), provisioning missing tables once, and fall
    /// back to the local database when it cannot be used.
    pub async fn resolve(hosted: Option<Arc<dyn MealStore>>, local: LocalTarget) -> Self {
        let local_path = local.path().map(Path::to_path_buf);

        let fallback_reason = match &hosted {
            Some(store) => match check_hosted(store.as_ref()).await {
                Ok(()) => {
                    info!("using hosted database");
                    return Self {
                        store: Some(Arc::clone(store)),
                        hosted,
                        local_path,
                        fallback_reason: None,
                        init_error: None,
                    };
                }
                Err(reason) => {
                    warn!(%reason, "hosted database unavailable, falling back to local database");
                    Some(reason)
                }
            },
            None => {
                info!("hosted database not configured, using local database");
                None
            }
        };

        match LocalStore::open_target(&local) {
            Ok(store) => {
                info!(path = ?local_path, "using local database");
                Self {
                    store: Some(Arc::new(store)),
                    hosted,
                    local_path,
                    fallback_reason,
                    init_error: None,
                }
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "failed to open local database");
                Self {
                    store: None,
                    hosted,
                    local_path,
                    fallback_reason,
                    init_error: Some(format!("{e:#}")),
                }
            }
        }
    }

    #[must_use]
    pub fn backend(&self) -> Option<BackendKind> {
        self.store.as_ref().map(|store| store.kind())
    }

    #[must_use]
    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    fn store(&self) -> Result<&dyn MealStore> {
        self.store.as_deref().ok_or_else(|| {
            anyhow!(
                "database not initialized: {}",
                self.init_error.as_deref().unwrap_or("no backend available")
            )
        })
    }

    // --- Favorites ---

    pub async fn list_favorites(&self, user_id: &str) -> Result<Vec<FavoriteMeal>> {
        self.store()?.list_favorites(user_id).await
    }

    /// Store `meal` for `user_id`. Adding an id the user already has is a no-op.
    pub async fn add_favorite(&self, meal: &FavoriteMeal, user_id: &str) -> Result<bool> {
        let store = self.store()?;
        if store.favorite_exists(&meal.id, user_id).await? {
            debug!(id = %meal.id, user_id, "favorite already present");
            return Ok(true);
        }
        store.insert_favorite(&meal.owned_by(user_id)).await?;
        Ok(true)
    }

    pub async fn remove_favorite(&self, id: &str, user_id: &str) -> Result<bool> {
        self.store()?.delete_favorite(id, user_id).await?;
        Ok(true)
    }

    pub async fn is_favorite(&self, id: &str, user_id: &str) -> Result<bool> {
        self.store()?.favorite_exists(id, user_id).await
    }

    // --- Planned meals ---

    pub async fn planned_meals(&self, user_id: &str) -> Result<Vec<PlannedMeal>> {
        let record = self.store()?.planned_meals(user_id).await?;
        Ok(record.map(|r| r.meals).unwrap_or_default())
    }

    /// Replace the user's whole planned list.
    pub async fn save_planned_meals(&self, meals: &[PlannedMeal], user_id: &str) -> Result<bool> {
        self.store()?.save_planned_meals(user_id, meals).await?;
        Ok(true)
    }

    /// Delete favorites, then the planned record. Not atomic.
    pub async fn clear_user_data(&self, user_id: &str) -> Result<bool> {
        let store = self.store()?;
        store
            .clear_favorites(user_id)
            .await
            .context("Failed to clear favorite meals")?;
        store
            .clear_planned_meals(user_id)
            .await
            .context("Failed to clear planned meals (favorite meals were already removed)")?;
        info!(user_id, "cleared user data");
        Ok(true)
    }

    // --- Diagnostics ---

    /// Current view of both backends. Re-probes the hosted store.
    pub async fn status(&self) -> DatabaseStatus {
        let hosted = match &self.hosted {
            Some(store) => {
                let favorites = store.probe_table(MealTable::FavoriteMeals).await;
                let planned = store.probe_table(MealTable::PlannedMeals).await;
                HostedStatus {
                    configured: true,
                    favorite_meals: TableStatus::from(&favorites),
                    planned_meals: TableStatus::from(&planned),
                }
            }
            None => {
                let unconfigured = TableProbe::Unreachable("hosted database not configured".into());
                HostedStatus {
                    configured: false,
                    favorite_meals: TableStatus::from(&unconfigured),
                    planned_meals: TableStatus::from(&unconfigured),
                }
            }
        };

        let local = LocalStatus {
            exists: self.local_path.as_deref().is_some_and(Path::exists),
            path: self.local_path.as_ref().map(|p| p.display().to_string()),
            initialized: self.backend() == Some(BackendKind::Local),
        };

        DatabaseStatus {
            using: self.backend(),
            initialized: self.store.is_some(),
            hosted,
            local,
            error: self.init_error.clone().or_else(|| self.fallback_reason.clone()),
        }
    }
}

/// `Ok` when both hosted tables are readable, after at most one provisioning
/// attempt per missing table. `Err` carries the reason to fall back.
async fn check_hosted(store: &dyn MealStore) -> std::result::Result<(), String> {
    for table in MealTable::ALL {
        match store.probe_table(table).await {
            TableProbe::Available => debug!(%table, "hosted table available"),
            TableProbe::Unreachable(msg) => return Err(format!("{table}: {msg}")),
            TableProbe::Missing(msg) => {
                warn!(%table, %msg, "hosted table missing, attempting to provision");
                if let Err(e) = store.provision_table(table).await {
                    warn!(%table, error = %format!("{e:#}"), "provisioning failed");
                }
                let retry = store.probe_table(table).await;
                if let Some(msg) = retry.error_message() {
                    return Err(format!("{table}: {msg}"));
                }
                info!(%table, "hosted table provisioned");
            }
        }
    }
    Ok(())
}
