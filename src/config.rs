use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "STORYLINE";

/// Known-good application identifier; bootstrap warns when the platform
/// script reports a different one.
pub const KNOWN_APP_ID: &str = "936619743392459";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_web_base")]
    pub web_base: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Query hash for the highlight tray call. Usually discovered at
    /// bootstrap; a configured value skips discovery.
    #[serde(default)]
    pub query_hash: String,
    #[serde(default = "default_referer")]
    pub referer: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            web_base: default_web_base(),
            api_base: default_api_base(),
            app_id: default_app_id(),
            query_hash: String::new(),
            referer: default_referer(),
        }
    }
}

fn default_web_base() -> String {
    "https://www.instagram.com".to_string()
}

fn default_api_base() -> String {
    "https://i.instagram.com/api/v1".to_string()
}

fn default_app_id() -> String {
    KNOWN_APP_ID.to_string()
}

fn default_referer() -> String {
    "https://www.instagram.com/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchConfig {
    /// Retry budget for metadata lookups.
    #[serde(default = "default_meta_retries")]
    pub meta_retries: u32,
    /// Retry budget for image/video payload downloads.
    #[serde(default = "default_media_retries")]
    pub media_retries: u32,
    /// Fixed delay between retries. No exponential growth.
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            meta_retries: default_meta_retries(),
            media_retries: default_media_retries(),
            backoff: default_backoff(),
            timeout: default_timeout(),
        }
    }
}

fn default_meta_retries() -> u32 {
    1
}

fn default_media_retries() -> u32 {
    2
}

fn default_backoff() -> Duration {
    Duration::from_millis(2000)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineConfig {
    /// Number of authors fetched per timeline page.
    #[serde(default = "default_reel_batch_size")]
    pub reel_batch_size: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            reel_batch_size: default_reel_batch_size(),
        }
    }
}

fn default_reel_batch_size() -> usize {
    9
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.web_base.is_empty() {
        base.api.web_base = other.api.web_base;
    }
    if !other.api.api_base.is_empty() {
        base.api.api_base = other.api.api_base;
    }
    if !other.api.app_id.is_empty() {
        base.api.app_id = other.api.app_id;
    }
    if !other.api.query_hash.is_empty() {
        base.api.query_hash = other.api.query_hash;
    }
    if !other.api.referer.is_empty() {
        base.api.referer = other.api.referer;
    }

    if other.fetch.meta_retries != 0 {
        base.fetch.meta_retries = other.fetch.meta_retries;
    }
    if other.fetch.media_retries != 0 {
        base.fetch.media_retries = other.fetch.media_retries;
    }
    if !other.fetch.backoff.is_zero() {
        base.fetch.backoff = other.fetch.backoff;
    }
    if !other.fetch.timeout.is_zero() {
        base.fetch.timeout = other.fetch.timeout;
    }

    if other.timeline.reel_batch_size != 0 {
        base.timeline.reel_batch_size = other.timeline.reel_batch_size;
    }

    base
}

/// Environment values mutate the merged config in place; an unset
/// variable leaves whatever the file pass produced.
fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.web_base" => cfg.api.web_base = value,
        "api.api_base" => cfg.api.api_base = value,
        "api.app_id" => cfg.api.app_id = value,
        "api.query_hash" => cfg.api.query_hash = value,
        "api.referer" => cfg.api.referer = value,
        "fetch.meta_retries" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.fetch.meta_retries = parsed;
            }
        }
        "fetch.media_retries" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.fetch.media_retries = parsed;
            }
        }
        "fetch.backoff" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.fetch.backoff = duration;
            }
        }
        "fetch.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.fetch.timeout = duration;
            }
        }
        "timeline.reel_batch_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.timeline.reel_batch_size = parsed;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("storyline").join("config.yaml"))
}
