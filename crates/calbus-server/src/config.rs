//! Process-level configuration for the server binary.
//!
//! Component configs (consumer, sharing cache, transport, pool) read their own
//! variables; this only covers what the binary itself decides.

/// Default log filter when neither `RUST_LOG` nor `CALBUS_LOG_LEVEL` is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// PostgreSQL URL. Absent means the in-memory directory is used.
    pub database_url: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Apply embedded migrations on startup (PostgreSQL only).
    pub run_migrations: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::Text,
            run_migrations: true,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DATABASE_URL` | unset | PostgreSQL URL; unset uses the in-memory directory |
    /// | `CALBUS_LOG_LEVEL` | `info` | Filter used when `RUST_LOG` is unset |
    /// | `CALBUS_LOG_FORMAT` | `text` | `text` or `json` |
    /// | `CALBUS_RUN_MIGRATIONS` | `true` | Apply migrations on startup |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let log_level = lookup("CALBUS_LOG_LEVEL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.log_level);

        let log_format = match lookup("CALBUS_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let run_migrations = lookup("CALBUS_RUN_MIGRATIONS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(defaults.run_migrations);

        Self {
            database_url,
            log_level,
            log_format,
            run_migrations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(config_from(&[]), ServerConfig::default());
    }

    #[test]
    fn test_reads_variables() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://calbus@localhost/calbus"),
            ("CALBUS_LOG_LEVEL", "calbus_jobs=debug"),
            ("CALBUS_LOG_FORMAT", "json"),
            ("CALBUS_RUN_MIGRATIONS", "0"),
        ]);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://calbus@localhost/calbus")
        );
        assert_eq!(config.log_level, "calbus_jobs=debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.run_migrations);
    }

    #[test]
    fn test_blank_database_url_means_memory() {
        let config = config_from(&[("DATABASE_URL", "  ")]);
        assert!(config.database_url.is_none());
    }
}
