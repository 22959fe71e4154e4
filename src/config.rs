use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{CFB_API_BASE, MANIFOLD_API_BASE};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Environment variable overriding `manifold.api_key`.
pub const MANIFOLD_API_KEY_VAR: &str = "MANIFOLD_API_KEY";

/// Environment variable overriding `stats.api_key`.
pub const CFB_API_KEY_VAR: &str = "CFB_API_KEY";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_manifold")]
    pub manifold: ApiConfig,
    #[serde(default = "default_stats")]
    pub stats: ApiConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// Base URL and static key for one REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
}

/// Local paths used by the commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Root of the etag-keyed response cache.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    /// Root under which live snapshots are written as `<sid>/<mid>.json`.
    #[serde(default = "default_live_data_path")]
    pub live_data_path: PathBuf,
    /// JSON map of `"<gameId>_<marketId>" -> bool`.
    #[serde(default = "default_matching_games_path")]
    pub matching_games_path: PathBuf,
}

fn default_manifold() -> ApiConfig {
    ApiConfig {
        api_url: MANIFOLD_API_BASE.to_string(),
        api_key: String::new(),
    }
}

fn default_stats() -> ApiConfig {
    ApiConfig {
        api_url: CFB_API_BASE.to_string(),
        api_key: String::new(),
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_live_data_path() -> PathBuf {
    PathBuf::from("./live-data")
}

fn default_matching_games_path() -> PathBuf {
    PathBuf::from("./matching-games.json")
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            live_data_path: default_live_data_path(),
            matching_games_path: default_matching_games_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            manifold: default_manifold(),
            stats: default_stats(),
            settings: SettingsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Load config if the file exists, otherwise fall back to defaults, then
    /// apply `.env` / environment key overrides.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|var| std::env::var(var).ok());
        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Replace API keys with non-empty values returned by `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(MANIFOLD_API_KEY_VAR).filter(|k| !k.trim().is_empty()) {
            self.manifold.api_key = key.trim().to_string();
        }
        if let Some(key) = lookup(CFB_API_KEY_VAR).filter(|k| !k.trim().is_empty()) {
            self.stats.api_key = key.trim().to_string();
        }
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
