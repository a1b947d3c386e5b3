//! Configuration management for plantsync using the prefer crate.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::orchestrator::{OrchestratorSettings, DEFAULT_EXCLUDED_PREFIXES};
use crate::sync::processor::DEFAULT_CHUNK_SIZE;

/// Default window for the advisory "already running" check, in minutes.
pub const DEFAULT_RUNNING_WINDOW_MINUTES: u64 = 60;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Base URL of the maintenance API.
    pub api_base_url: Option<String>,
    /// Bearer token for the maintenance API.
    pub api_token: Option<String>,
    /// User agent override for HTTP requests.
    pub user_agent: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
    /// Overall fetch timeout per domain type in seconds.
    pub fetch_timeout: u64,
    /// Domain types fetched concurrently.
    pub fetch_concurrency: usize,
    /// Items per processor chunk.
    pub chunk_size: usize,
    /// Material number prefixes never persisted.
    pub excluded_material_prefixes: Vec<String>,
    /// Window for the advisory running check, in minutes.
    pub running_window_minutes: u64,
    /// Endpoint path overrides keyed by domain type name.
    pub endpoints: HashMap<String, String>,
    /// Plants to seed, code -> name.
    pub plants: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to the platform data dir, e.g. ~/.local/share/plantsync
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("plantsync");

        Self {
            data_dir,
            database_filename: "plantsync.db".to_string(),
            api_base_url: None,
            api_token: None,
            user_agent: None,
            request_timeout: 60,
            fetch_timeout: 300,
            fetch_concurrency: 4,
            chunk_size: DEFAULT_CHUNK_SIZE,
            excluded_material_prefixes: DEFAULT_EXCLUDED_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            running_window_minutes: DEFAULT_RUNNING_WINDOW_MINUTES,
            endpoints: HashMap::new(),
            plants: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn running_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.running_window_minutes as i64)
    }

    /// Orchestrator tuning derived from these settings.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            chunk_size: self.chunk_size,
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            fetch_concurrency: self.fetch_concurrency,
            excluded_material_prefixes: self.excluded_material_prefixes.clone(),
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    /// Maintenance API base URL.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Maintenance API bearer token.
    #[serde(default)]
    pub api_token: Option<String>,
    /// User agent string.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// Fetch timeout per domain type in seconds.
    #[serde(default)]
    pub fetch_timeout: Option<u64>,
    /// Concurrent fetches.
    #[serde(default)]
    pub fetch_concurrency: Option<usize>,
    /// Items per processor chunk.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Excluded material prefixes; an empty list disables exclusion.
    #[serde(default)]
    pub excluded_material_prefixes: Option<Vec<String>>,
    /// Advisory running-check window in minutes.
    #[serde(default)]
    pub running_window_minutes: Option<u64>,
    /// Endpoint path overrides keyed by domain type name.
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    /// Plants to seed, code -> name.
    #[serde(default)]
    pub plants: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers plantsync config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("plantsync").await {
            Ok(pref_config) => Config {
                target: pref_config.get("target").ok(),
                database: pref_config.get("database").ok(),
                api_url: pref_config.get("api_url").ok(),
                api_token: pref_config.get("api_token").ok(),
                user_agent: pref_config.get("user_agent").ok(),
                request_timeout: pref_config.get("request_timeout").ok(),
                fetch_timeout: pref_config.get("fetch_timeout").ok(),
                fetch_concurrency: pref_config.get("fetch_concurrency").ok(),
                chunk_size: pref_config.get("chunk_size").ok(),
                excluded_material_prefixes: pref_config.get("excluded_material_prefixes").ok(),
                running_window_minutes: pref_config.get("running_window_minutes").ok(),
                endpoints: pref_config.get("endpoints").unwrap_or_default(),
                plants: pref_config
                    .get::<HashMap<String, String>>("plants")
                    .map(|m| m.into_iter().collect())
                    .unwrap_or_default(),
            },
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            let path = shellexpand::tilde(target);
            settings.data_dir = PathBuf::from(path.as_ref());
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref url) = self.api_url {
            settings.api_base_url = Some(url.clone());
        }
        if let Some(ref token) = self.api_token {
            settings.api_token = Some(token.clone());
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(timeout) = self.fetch_timeout {
            settings.fetch_timeout = timeout;
        }
        if let Some(concurrency) = self.fetch_concurrency {
            settings.fetch_concurrency = concurrency.max(1);
        }
        if let Some(chunk_size) = self.chunk_size {
            settings.chunk_size = chunk_size;
        }
        if let Some(ref prefixes) = self.excluded_material_prefixes {
            settings.excluded_material_prefixes = prefixes.clone();
        }
        if let Some(window) = self.running_window_minutes {
            settings.running_window_minutes = window;
        }
        settings
            .endpoints
            .extend(self.endpoints.iter().map(|(k, v)| (k.clone(), v.clone())));
        settings
            .plants
            .extend(self.plants.iter().map(|(k, v)| (k.trim().to_string(), v.clone())));
    }
}

/// Load settings from configuration (async version).
pub async fn load_settings() -> Settings {
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings
}
