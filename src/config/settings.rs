use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::quota::TierName;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// SQLite database file; defaults to the platform data dir
    pub path: Option<PathBuf>,

    /// Keep everything in memory (nothing persists)
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_general_ttl_hours")]
    pub general_ttl_hours: u64,

    #[serde(default = "default_specific_ttl_hours")]
    pub specific_ttl_hours: u64,

    /// Fuzzy matches must score strictly above this
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_fuzzy_candidate_limit")]
    pub fuzzy_candidate_limit: usize,

    #[serde(default = "default_fuzzy_min_quality")]
    pub fuzzy_min_quality: f64,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Never-hit entries older than this are evicted
    #[serde(default = "default_unused_retention_days")]
    pub unused_retention_days: i64,

    #[serde(default = "default_min_quality_to_store")]
    pub min_quality_to_store: f64,

    #[serde(default = "default_premium_providers")]
    pub premium_providers: Vec<String>,

    /// Per-category TTL overrides, in hours
    #[serde(default)]
    pub category_ttl_hours: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default)]
    pub default_tier: TierName,

    /// Append usage events as JSON lines here
    pub events_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    #[serde(default = "default_provider_model")]
    pub model: String,

    pub api_key_env: Option<String>,

    pub base_url: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

/// Ten years; longer lifetimes are treated as a typo
const MAX_TTL_HOURS: u64 = 10 * 365 * 24;

fn default_general_ttl_hours() -> u64 {
    7 * 24
}
fn default_specific_ttl_hours() -> u64 {
    24
}
fn default_similarity_threshold() -> f64 {
    0.8
}
fn default_fuzzy_candidate_limit() -> usize {
    50
}
fn default_fuzzy_min_quality() -> f64 {
    0.7
}
fn default_top_k() -> usize {
    3
}
fn default_unused_retention_days() -> i64 {
    30
}
fn default_min_quality_to_store() -> f64 {
    0.4
}
fn default_premium_providers() -> Vec<String> {
    vec!["gpt-4o".to_string(), "claude-sonnet-4-20250514".to_string()]
}
fn default_provider_kind() -> String {
    "openai".to_string()
}
fn default_provider_model() -> String {
    "gpt-4o".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_system_prompt() -> String {
    "Você é um farmacêutico especialista em manipulação magistral. Responda com fórmulas, \
     doses usuais e referências."
        .to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            general_ttl_hours: default_general_ttl_hours(),
            specific_ttl_hours: default_specific_ttl_hours(),
            similarity_threshold: default_similarity_threshold(),
            fuzzy_candidate_limit: default_fuzzy_candidate_limit(),
            fuzzy_min_quality: default_fuzzy_min_quality(),
            top_k: default_top_k(),
            unused_retention_days: default_unused_retention_days(),
            min_quality_to_store: default_min_quality_to_store(),
            premium_providers: default_premium_providers(),
            category_ttl_hours: HashMap::new(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_tier: TierName::Free,
            events_log: None,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            model: default_provider_model(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            base_url: None,
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Settings {
    /// Load from the platform config dir, writing defaults on first run
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let settings = Settings::default();
            settings.save()?;
            Ok(settings)
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let settings: Settings = toml::from_str(&content).context("Failed to parse config file")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the cache cannot honor
    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;
        let ttls = [
            ("general_ttl_hours", cache.general_ttl_hours),
            ("specific_ttl_hours", cache.specific_ttl_hours),
        ]
        .into_iter()
        .map(|(name, hours)| (name.to_string(), hours))
        .chain(
            cache
                .category_ttl_hours
                .iter()
                .map(|(category, hours)| (format!("category_ttl_hours.{}", category), *hours)),
        );

        for (name, hours) in ttls {
            if hours == 0 || hours > MAX_TTL_HOURS {
                bail!(
                    "cache.{} must be between 1 and {} hours, got {}",
                    name,
                    MAX_TTL_HOURS,
                    hours
                );
            }
        }

        if !(0.0..=1.0).contains(&cache.similarity_threshold) {
            bail!(
                "cache.similarity_threshold must be within [0, 1], got {}",
                cache.similarity_threshold
            );
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Configured database path, or `rxcache.db` in the platform data dir
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_dir().join("rxcache.db")),
        }
    }

    fn project_dirs() -> Result<directories::ProjectDirs> {
        directories::ProjectDirs::from("io", "rxcache", "rxcache")
            .context("Could not determine config directory")
    }
}
