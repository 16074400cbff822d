//! File-based configuration.
//!
//! With the `config` feature (on by default), configuration is loaded from
//! TOML with the following resolution order:
//! 1. an explicit path
//! 2. `~/.mimir/config.toml` (user)
//! 3. `/etc/mimir/config.toml` (system)
//!
//! Every section is optional and falls back to its defaults:
//!
//! ```toml
//! [cache]
//! prefix = "chat-cache"
//! ttl_secs = 600
//! jail_threshold = 5
//! jail_policy = "reset_on_promotion"
//!
//! [store]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379/0"
//!
//! [quota]
//! limit_ttl_secs = 30
//!
//! [history]
//! max_messages = 20
//! ```

use std::sync::Arc;

use serde::Deserialize;

use crate::cache::{CacheConfig, CacheStore, MemoryStore};
use crate::middleware::{HistoryConfig, QuotaConfig};
use crate::{MimirError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub quota: QuotaConfig,
    pub history: HistoryConfig,
}

/// Which [`CacheStore`] backs the caching middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Cache store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Capacity of the memory store (default: 10,000 entries).
    pub max_entries: u64,
    /// Redis URL, required for the redis backend.
    pub redis_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            max_entries: 10_000,
            redis_url: None,
        }
    }
}

impl StoreConfig {
    /// Construct the configured store.
    pub fn build(&self) -> Result<Arc<dyn CacheStore>> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::with_max_entries(self.max_entries))),
            StoreBackend::Redis => self.build_redis(),
        }
    }

    #[cfg(feature = "redis")]
    fn build_redis(&self) -> Result<Arc<dyn CacheStore>> {
        let url = self.redis_url.as_deref().ok_or_else(|| {
            MimirError::Configuration("store.redis_url is required for the redis backend".into())
        })?;
        Ok(Arc::new(crate::cache::RedisStore::open(url)?))
    }

    #[cfg(not(feature = "redis"))]
    fn build_redis(&self) -> Result<Arc<dyn CacheStore>> {
        Err(MimirError::Configuration(
            "redis backend requires the `redis` feature".into(),
        ))
    }
}

impl Config {
    /// Check the sections that can be invalid.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.quota.validate()?;
        if self.history.max_messages == 0 {
            return Err(MimirError::Configuration(
                "history.max_messages must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "config")]
mod load {
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::Config;
    use crate::{MimirError, Result};

    impl Config {
        /// Load configuration from the standard locations.
        ///
        /// Resolution order:
        /// 1. Explicit path (if provided)
        /// 2. `~/.mimir/config.toml`
        /// 3. `/etc/mimir/config.toml`
        pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
            let path = Self::resolve_config_path(explicit_path)?;
            let content = fs::read_to_string(&path).map_err(|e| {
                MimirError::Configuration(format!("failed to read config file {path:?}: {e}"))
            })?;
            Self::from_toml_str(&content).map_err(|e| match e {
                MimirError::Configuration(msg) => {
                    MimirError::Configuration(format!("{path:?}: {msg}"))
                }
                other => other,
            })
        }

        /// Parse and validate configuration text.
        pub fn from_toml_str(content: &str) -> Result<Self> {
            let config: Config = toml::from_str(content).map_err(|e| {
                MimirError::Configuration(format!("failed to parse config: {e}"))
            })?;
            config.validate()?;
            Ok(config)
        }

        fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
            if let Some(path) = explicit {
                if path.exists() {
                    return Ok(path.to_path_buf());
                }
                return Err(MimirError::Configuration(format!(
                    "config file not found: {path:?}"
                )));
            }

            if let Some(home) = dirs::home_dir() {
                let user_config = home.join(".mimir").join("config.toml");
                if user_config.exists() {
                    return Ok(user_config);
                }
            }

            let system_config = PathBuf::from("/etc/mimir/config.toml");
            if system_config.exists() {
                return Ok(system_config);
            }

            Err(MimirError::Configuration(
                "no config file found. Create ~/.mimir/config.toml or /etc/mimir/config.toml"
                    .to_string(),
            ))
        }
    }
}

#[cfg(all(test, feature = "config"))]
mod tests {
    use super::*;
    use crate::cache::JailPolicy;

    #[test]
    fn empty_config_is_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn parse_sections() {
        let toml = r#"
            [cache]
            prefix = "chat"
            jail_threshold = 5
            jail_policy = "reset_on_promotion"

            [store]
            max_entries = 64

            [quota]
            default_subject = "team-a"

            [history]
            max_messages = 8
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.cache.prefix, "chat");
        assert_eq!(config.cache.jail_threshold, 5);
        assert_eq!(config.cache.jail_policy, JailPolicy::ResetOnPromotion);
        // Defaults preserved
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.store.max_entries, 64);
        assert_eq!(config.quota.default_subject, "team-a");
        assert_eq!(config.quota.limit_ttl_secs, 60);
        assert_eq!(config.history.max_messages, 8);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml_str("[cache]\njail_threshold = 0").is_err());
        assert!(Config::from_toml_str("[history]\nmax_messages = 0").is_err());
        assert!(matches!(
            Config::from_toml_str("[quota]\nlimit_ttl_secs = 0"),
            Err(MimirError::Configuration(_))
        ));
        assert!(Config::from_toml_str("[cache\n").is_err());
    }

    #[test]
    fn memory_store_builds() {
        let store = StoreConfig::default().build().unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn redis_backend_needs_feature() {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            ..StoreConfig::default()
        };
        assert!(matches!(config.build(), Err(MimirError::Configuration(_))));
    }
}
