//! Configuration file parser for ~/.config/newswire/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they
//! are usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Settings that can never produce a working scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidConfigurationError {
    #[error("Poll interval must be greater than zero")]
    ZeroInterval,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// How often the scheduler polls every outlet.
///
/// The three parts are summed, so `minutes = 90` and `hours = 1, minutes =
/// 30` are equivalent. Parts left out of a `[poll]` table are zero; the
/// ten minute default applies only when the table itself is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollInterval {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl PollInterval {
    /// Used when the config has no `[poll]` table
    pub const DEFAULT: Self = Self {
        hours: 0,
        minutes: 10,
        seconds: 0,
    };

    pub fn from_secs(seconds: u64) -> Self {
        Self {
            hours: 0,
            minutes: 0,
            seconds,
        }
    }

    /// Total interval; fails when every part is zero.
    pub fn duration(&self) -> Result<Duration, InvalidConfigurationError> {
        let total = self
            .hours
            .saturating_mul(3600)
            .saturating_add(self.minutes.saturating_mul(60))
            .saturating_add(self.seconds);
        if total == 0 {
            return Err(InvalidConfigurationError::ZeroInterval);
        }
        Ok(Duration::from_secs(total))
    }
}

/// HTTP settings for fetching feed documents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for 429, 5xx and truncated responses
    pub max_retries: u32,
    /// Backoff base; retry `n` waits `base * 2^(n + 1)` milliseconds
    pub retry_base_delay_ms: u64,
    /// Upper bound on a feed document's size
    pub max_feed_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            max_feed_bytes: 10 * 1024 * 1024, // 10MB
            user_agent: concat!("newswire/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file; relative paths resolve against the config directory.
    pub database_path: String,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Outlets processed at the same time within one run (1 = sequential).
    pub concurrency: usize,

    pub poll: PollInterval,

    pub fetch: FetchSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "newswire.db".to_string(),
            log_level: "info".to_string(),
            concurrency: 4,
            poll: PollInterval::DEFAULT,
            fetch: FetchSettings::default(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] =
        ["database_path", "log_level", "concurrency", "poll", "fetch"];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            database = %config.database_path,
            concurrency = config.concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
