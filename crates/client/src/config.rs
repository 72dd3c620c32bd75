// Client configuration.
//
// Global config: `~/.snapfeed/config.toml`
// Environment overrides: `SNAPFEED_SERVICE_URL`, `SNAPFEED_SESSION_TOKEN`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

pub const SERVICE_URL_ENV: &str = "SNAPFEED_SERVICE_URL";
pub const SESSION_TOKEN_ENV: &str = "SNAPFEED_SESSION_TOKEN";

const DEFAULT_SERVICE_URL: &str = "http://localhost:8080";
const DEFAULT_PAGE_SIZE: u32 = 10;
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Root directory for snapfeed state: `~/.snapfeed/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".snapfeed"))
}

/// Path to the config file: `~/.snapfeed/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Client config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub service: ServiceConfig,
    pub feed: FeedConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
}

impl ClientConfig {
    /// Load from `~/.snapfeed/config.toml`, then apply environment overrides.
    /// Returns defaults if the file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let mut config = match global_config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|error| {
                warn!(path = %path.display(), error = %error, "ignoring unreadable config");
                Self::default()
            }),
            _ => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to `~/.snapfeed/config.toml`.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = global_config_path().ok_or(ConfigError::NoHomeDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(SERVICE_URL_ENV).filter(|value| !value.trim().is_empty()) {
            self.service.base_url = url.trim().to_string();
        }
    }
}

/// Remote content service connection settings.
///
/// The session token is never stored here; it comes from
/// `SNAPFEED_SESSION_TOKEN`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ServiceConfig {
    pub fn url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url)
            .map_err(|source| ConfigError::InvalidUrl { url: self.base_url.clone(), source })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub page_size: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { page_size: DEFAULT_PAGE_SIZE }
    }
}

impl FeedConfig {
    /// Page size, never zero.
    pub fn page_size(&self) -> usize {
        self.page_size.max(1) as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Quiet interval before a search is issued. Clamped to [100, 2000] on use.
    pub debounce_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { debounce_ms: DEFAULT_SEARCH_DEBOUNCE_MS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are treated as stale (0 = fresh until invalidated).
    pub max_age_secs: u64,
}

impl CacheConfig {
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_secs > 0).then(|| Duration::from_secs(self.max_age_secs))
    }
}

/// Session token from `SNAPFEED_SESSION_TOKEN`, if set and non-empty.
pub fn session_token_from_env() -> Option<String> {
    std::env::var(SESSION_TOKEN_ENV).ok().filter(|token| !token.trim().is_empty())
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid service url `{url}`: {source}")]
    InvalidUrl { url: String, source: url::ParseError },
    #[error("could not determine home directory")]
    NoHomeDir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    // ── Defaults ───────────────────────────────────────────────────

    #[test]
    fn defaults_match_feed_behavior() {
        let config = ClientConfig::default();
        assert_eq!(config.feed.page_size(), 10);
        assert_eq!(config.search.debounce_ms, 500);
        assert_eq!(config.cache.max_age(), None);
        assert_eq!(config.service.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn zero_page_size_is_raised_to_one() {
        let feed = FeedConfig { page_size: 0 };
        assert_eq!(feed.page_size(), 1);
    }

    // ── Load / save ────────────────────────────────────────────────

    #[test]
    fn round_trips_through_toml_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ClientConfig::default();
        config.service.base_url = "https://feed.example.com".into();
        config.feed.page_size = 25;
        config.cache.max_age_secs = 60;
        config.save_to(&path).expect("save");

        let loaded = ClientConfig::load_from(&path).expect("load");
        assert_eq!(loaded, config);
        assert_eq!(loaded.cache.max_age(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[search]\ndebounce_ms = 300\n").expect("write");

        let loaded = ClientConfig::load_from(&path).expect("load");
        assert_eq!(loaded.search.debounce_ms, 300);
        assert_eq!(loaded.feed, FeedConfig::default());
        assert_eq!(loaded.service, ServiceConfig::default());
    }

    #[test]
    fn service_section_rejects_unknown_fields() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[service]\nsession_token = \"secret\"\n").expect("write");

        let error = ClientConfig::load_from(&path).expect_err("token must not be accepted");
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().expect("tempdir");
        let error = ClientConfig::load_from(&dir.path().join("absent.toml")).expect_err("missing");
        assert!(matches!(error, ConfigError::Io(_)));
    }

    // ── Overrides ──────────────────────────────────────────────────

    #[test]
    fn env_override_replaces_service_url() {
        let vars: HashMap<&str, &str> = [(SERVICE_URL_ENV, " https://api.example.com ")].into();
        let mut config = ClientConfig::default();
        config.apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.service.base_url, "https://api.example.com");
    }

    #[test]
    fn blank_env_override_is_ignored() {
        let mut config = ClientConfig::default();
        config.apply_env_overrides(|_| Some("   ".into()));
        assert_eq!(config.service.base_url, DEFAULT_SERVICE_URL);
    }

    #[test]
    fn invalid_service_url_is_reported() {
        let service = ServiceConfig { base_url: "not a url".into(), ..ServiceConfig::default() };
        assert!(matches!(service.url(), Err(ConfigError::InvalidUrl { .. })));
    }
}
