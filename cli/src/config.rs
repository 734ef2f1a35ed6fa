use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Serialize;
use std::path::PathBuf;

/// Connection details for the hosted PostgREST store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedCredentials {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub user_id: String,
}

/// Which settings are present, without revealing their values.
#[derive(Debug, Clone, Serialize)]
pub struct EnvStatus {
    pub supabase_url: bool,
    pub supabase_key: bool,
    pub openai_key: bool,
    pub port: u16,
}

impl Config {
    /// Load `.env` (if present) and read settings from the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |keys: &[&str]| {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
        };

        let data_dir = match var(&["MEALPLAN_DATA_DIR"]) {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("", "", "mealplan")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        let db_path = data_dir.join("meals.db");

        Ok(Config {
            db_path,
            supabase_url: var(&["SUPABASE_URL", "EXPO_PUBLIC_SUPABASE_URL"]),
            supabase_anon_key: var(&["SUPABASE_ANON_KEY", "EXPO_PUBLIC_SUPABASE_ANON_KEY"]),
            openai_api_key: var(&["OPENAI_API_KEY"]),
            user_id: var(&["MEALPLAN_USER_ID"])
                .unwrap_or_else(|| mealplan_core::models::DEFAULT_USER_ID.to_string()),
        })
    }

    /// Hosted store credentials, when both the URL and the key are set.
    #[must_use]
    pub fn hosted(&self) -> Option<HostedCredentials> {
        match (&self.supabase_url, &self.supabase_anon_key) {
            (Some(url), Some(anon_key)) => Some(HostedCredentials {
                url: url.trim_end_matches('/').to_string(),
                anon_key: anon_key.clone(),
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn env_status(&self, port: u16) -> EnvStatus {
        EnvStatus {
            supabase_url: self.supabase_url.is_some(),
            supabase_key: self.supabase_anon_key.is_some(),
            openai_key: self.openai_api_key.is_some(),
            port,
        }
    }
}
