use roydental_cache::{LockPolicy, RedisConfig};
use roydental_db_postgres::PostgresConfig;
use roydental_repo::RepositorySettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    /// Shared cache and lock store
    #[serde(default)]
    pub redis: RedisConfig,
    /// Lock retry and expiry policy
    #[serde(default)]
    pub locks: LockPolicy,
    #[serde(default)]
    pub repository: RepositorySettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref pg) = self.storage.postgres {
            pg.check().map_err(|e| format!("storage.postgres: {e}"))?;
        }
        if self.redis.enabled && self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        // Lock validations
        if self.locks.attempts == 0 {
            return Err("locks.attempts must be > 0".into());
        }
        if self.locks.record_ttl_secs == 0 || self.locks.aggregate_ttl_secs == 0 {
            return Err("lock TTLs must be > 0".into());
        }
        if self.repository.read_timeout_ms == 0 {
            return Err("repository.read_timeout_ms must be > 0".into());
        }
        if self.repository.cache_ttl_secs == 0 {
            return Err("repository.cache_ttl_secs must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// PostgreSQL backing store; the in-memory store is used when unset
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "roydental.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }
        // Environment variable overrides, e.g., ROYDENTAL__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("ROYDENTAL")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::loader::load_config;
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.storage.postgres.is_none());
        assert!(!cfg.redis.enabled);
        assert_eq!(cfg.locks.attempts, 3);
        assert_eq!(cfg.repository.read_timeout_ms, 5000);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
[storage.postgres]
url = "postgres://clinic:secret@db:5432/roydental"
pool_size = 4

[redis]
enabled = true
url = "redis://cache:6379"

[locks]
backoff_ms = 500

[logging]
level = "debug"
"#,
        );
        let cfg = load_config(file.path().to_str()).unwrap();

        let pg = cfg.storage.postgres.unwrap();
        assert_eq!(pg.url, "postgres://clinic:secret@db:5432/roydental");
        assert_eq!(pg.pool_size, 4);
        assert!(cfg.redis.enabled);
        assert_eq!(cfg.redis.pool_size, 10);
        assert_eq!(cfg.locks.backoff_ms, 500);
        // Unset fields keep their defaults
        assert_eq!(cfg.locks.attempts, 3);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(load_config(Some("/nonexistent/roydental.toml")).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.locks.attempts = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));

        let mut cfg = AppConfig::default();
        cfg.storage.postgres = Some(PostgresConfig::new("postgres://localhost/roydental").with_pool_size(0));
        let err = cfg.validate().unwrap_err();
        assert!(err.starts_with("storage.postgres:"), "{err}");
        assert!(err.contains("pool_size"), "{err}");

        let mut cfg = AppConfig::default();
        cfg.repository.read_timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }
}
