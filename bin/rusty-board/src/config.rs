//! Configuration layer: typed settings with layered precedence (file → env).

use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment, File};
use rb_core::SiteConfig;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const CONFIG_BASENAME: &str = "rusty-board";
const ENV_PREFIX: &str = "RUSTY_BOARD";

/// Selects the in-process backend for the store, media root or cache.
pub const MEMORY: &str = "memory";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `memory` or a `sqlite:` URL.
    pub database_url: String,
    /// `memory` or a directory for uploads.
    pub media_root: String,
    pub cache: CacheSettings,
    pub log: LogSettings,
    pub rebuild: RebuildSettings,
    /// Written to the store on first start only.
    pub site: SiteConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: MEMORY.to_string(),
            media_root: MEMORY.to_string(),
            cache: CacheSettings::default(),
            log: LogSettings::default(),
            rebuild: RebuildSettings::default(),
            site: SiteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheKind,
    pub redis_url: Option<SecretString>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Compact,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LogSettings {
    pub fn level_filter(&self) -> Result<LevelFilter, LoadError> {
        LevelFilter::from_str(&self.level)
            .map_err(|err| LoadError::invalid("log.level", err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RebuildSettings {
    pub on_start: bool,
    /// Periodic full rebuild; unset disables it.
    pub interval_secs: Option<u64>,
}

impl Default for RebuildSettings {
    fn default() -> Self {
        Self {
            on_start: true,
            interval_secs: None,
        }
    }
}

impl RebuildSettings {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings from `rusty-board.{toml,yaml,json}` (optional), then
/// `RUSTY_BOARD__*` environment variables.
pub fn load() -> Result<Settings, LoadError> {
    let config = Config::builder()
        .add_source(File::with_name(CONFIG_BASENAME).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;
    parse(config)
}

fn parse(config: Config) -> Result<Settings, LoadError> {
    let settings: Settings = config.try_deserialize()?;
    settings.log.level_filter()?;

    if settings.cache.backend == CacheKind::Redis && settings.cache.redis_url.is_none() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when cache.backend is redis",
        ));
    }
    if settings.rebuild.interval_secs == Some(0) {
        return Err(LoadError::invalid("rebuild.interval_secs", "must be positive"));
    }
    if settings.site.title.trim().is_empty() {
        return Err(LoadError::invalid("site.title", "must not be empty"));
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(overrides: &[(&str, &str)]) -> Result<Settings, LoadError> {
        let mut builder = Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        parse(builder.build().unwrap())
    }

    #[test]
    fn defaults_run_fully_in_memory() {
        let settings = with(&[]).unwrap();
        assert_eq!(settings.database_url, MEMORY);
        assert_eq!(settings.media_root, MEMORY);
        assert_eq!(settings.cache.backend, CacheKind::Memory);
        assert!(settings.rebuild.on_start);
        assert_eq!(settings.rebuild.interval(), None);
        assert_eq!(settings.log.level_filter().unwrap(), LevelFilter::INFO);
        assert_eq!(settings.site, SiteConfig::default());
    }

    #[test]
    fn redis_backend_needs_a_url() {
        let err = with(&[("cache.backend", "redis")]).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "cache.redis_url", .. }));

        let settings = with(&[
            ("cache.backend", "redis"),
            ("cache.redis_url", "redis://127.0.0.1:6379"),
        ])
        .unwrap();
        assert_eq!(settings.cache.backend, CacheKind::Redis);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(with(&[("log.level", "chatty")]).is_err());
        assert!(with(&[("rebuild.interval_secs", "0")]).is_err());
        let settings = with(&[("rebuild.interval_secs", "300"), ("log.format", "json")]).unwrap();
        assert_eq!(settings.rebuild.interval(), Some(Duration::from_secs(300)));
        assert_eq!(settings.log.format, LogFormat::Json);
    }
}
