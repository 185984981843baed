//! Service configuration
//!
//! Defaults, then `~/.config/reelcast/config.toml`, then environment.
//! The CLI applies its own flags last.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// Default service location
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Environment variable overriding the base URL
pub const BASE_URL_ENV: &str = "REELCAST_BASE_URL";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Where and how to reach the video service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Applies to connection setup only. Streams may run for minutes.
    pub connect_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ServiceConfig {
    /// `~/.config/reelcast/config.toml` (platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("reelcast").join("config.toml"))
    }

    /// Load from the default path and environment
    pub fn load() -> Result<Self> {
        let config = match Self::default_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    /// Load a TOML file; a missing file gives the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn with_env(self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        match lookup(BASE_URL_ENV) {
            Some(url) if !url.trim().is_empty() => self.with_base_url(&url),
            _ => Ok(self),
        }
    }

    /// Replace the base URL after validating it
    pub fn with_base_url(mut self, url: &str) -> Result<Self> {
        let parsed = parse_base_url(url)?;
        self.base_url = parsed.as_str().trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Parsed base URL
    pub fn url(&self) -> Result<Url> {
        parse_base_url(&self.base_url)
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid base url: {}", raw))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(anyhow!("Base url must be http(s): {}", raw));
    }
    Ok(url)
}
