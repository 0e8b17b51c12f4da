//! # Settings
//!
//! Runtime settings for the `comply` binary, layered from lowest to highest
//! precedence:
//!
//! 1. built-in defaults,
//! 2. an optional YAML file (`--config`),
//! 3. environment variables,
//! 4. explicit command-line flags.
//!
//! | Variable                       | Field                  |
//! |--------------------------------|------------------------|
//! | `DATABASE_URL`                 | `database_url`         |
//! | `COMPLY_MAX_CONNECTIONS`       | `max_connections`      |
//! | `COMPLY_MIN_CONNECTIONS`       | `min_connections`      |
//! | `COMPLY_ACQUIRE_TIMEOUT_SECS`  | `acquire_timeout_secs` |
//! | `COMPLY_BATCH_SIZE`            | `batch_size`           |
//! | `COMPLY_INSERT_CHUNK_SIZE`     | `insert_chunk_size`    |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use comply_db::PoolConfig;
use comply_engine::{DEFAULT_BATCH_SIZE, DEFAULT_INSERT_CHUNK_SIZE};

/// Errors raised while assembling [`Settings`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("min_connections ({min}) exceeds max_connections ({max})")]
    PoolBounds { min: u32, max: u32 },

    /// A database command was run without `DATABASE_URL` or `--database-url`.
    #[error("no database url configured (set DATABASE_URL or pass --database-url)")]
    MissingDatabaseUrl,
}

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub batch_size: usize,
    pub insert_chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 5,
            batch_size: DEFAULT_BATCH_SIZE,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        }
    }
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub max_connections: Option<u32>,
    pub batch_size: Option<usize>,
    pub insert_chunk_size: Option<usize>,
}

impl Settings {
    /// Layer defaults, `file`, the process environment and `overrides`.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::resolve(file, |var| std::env::var(var).ok(), overrides)
    }

    /// As [`Settings::load`], reading variables through `env`.
    pub fn resolve(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let mut settings = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(url) = env("DATABASE_URL") {
            settings.database_url = Some(url);
        }
        apply_env(&env, "COMPLY_MAX_CONNECTIONS", &mut settings.max_connections)?;
        apply_env(&env, "COMPLY_MIN_CONNECTIONS", &mut settings.min_connections)?;
        apply_env(
            &env,
            "COMPLY_ACQUIRE_TIMEOUT_SECS",
            &mut settings.acquire_timeout_secs,
        )?;
        apply_env(&env, "COMPLY_BATCH_SIZE", &mut settings.batch_size)?;
        apply_env(&env, "COMPLY_INSERT_CHUNK_SIZE", &mut settings.insert_chunk_size)?;

        if let Some(url) = &overrides.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(n) = overrides.max_connections {
            settings.max_connections = n;
        }
        if let Some(n) = overrides.batch_size {
            settings.batch_size = n;
        }
        if let Some(n) = overrides.insert_chunk_size {
            settings.insert_chunk_size = n;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Parse a YAML settings file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Zero { field: "batch_size" });
        }
        if self.insert_chunk_size == 0 {
            return Err(ConfigError::Zero {
                field: "insert_chunk_size",
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Zero {
                field: "max_connections",
            });
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::PoolBounds {
                min: self.min_connections,
                max: self.max_connections,
            });
        }
        Ok(())
    }

    /// Pool options for `comply-db`.
    pub fn pool_config(&self) -> Result<PoolConfig, ConfigError> {
        let url = self
            .database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)?;
        Ok(PoolConfig {
            database_url: url.to_string(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        })
    }
}

fn apply_env<T: FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = env(var) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { var, value })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    fn yaml_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_any_source() {
        let settings = Settings::resolve(None, env(&[]), &Overrides::default()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.insert_chunk_size, 500);
    }

    #[test]
    fn file_then_env_then_flags() {
        let file = yaml_file(
            "database_url: postgres://file/db\nbatch_size: 4\ninsert_chunk_size: 50\nmax_connections: 8\n",
        );
        let settings = Settings::resolve(
            Some(file.path()),
            env(&[("COMPLY_BATCH_SIZE", "6"), ("DATABASE_URL", "postgres://env/db")]),
            &Overrides {
                batch_size: Some(9),
                ..Overrides::default()
            },
        )
        .unwrap();

        assert_eq!(settings.database_url.as_deref(), Some("postgres://env/db"));
        assert_eq!(settings.batch_size, 9);
        assert_eq!(settings.insert_chunk_size, 50);
        assert_eq!(settings.max_connections, 8);
        assert_eq!(settings.min_connections, 2);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = Settings::resolve(None, env(&[("COMPLY_BATCH_SIZE", "0")]), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "batch_size" }));

        let err = Settings::resolve(
            None,
            env(&[]),
            &Overrides {
                insert_chunk_size: Some(0),
                ..Overrides::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Zero {
                field: "insert_chunk_size"
            }
        ));
    }

    #[test]
    fn unparsable_env_names_the_variable() {
        let err = Settings::resolve(
            None,
            env(&[("COMPLY_INSERT_CHUNK_SIZE", "lots")]),
            &Overrides::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value \"lots\" for COMPLY_INSERT_CHUNK_SIZE"
        );
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let file = yaml_file("batch_sise: 3\n");
        let err = Settings::resolve(Some(file.path()), env(&[]), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let err = Settings::resolve(Some(&path), env(&[]), &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn pool_bounds_are_checked() {
        let err = Settings::resolve(
            None,
            env(&[("COMPLY_MIN_CONNECTIONS", "30")]),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::PoolBounds { min: 30, max: 20 }));
    }

    #[test]
    fn pool_config_requires_a_url() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.pool_config(),
            Err(ConfigError::MissingDatabaseUrl)
        ));

        settings.database_url = Some("postgres://localhost/comply".into());
        settings.acquire_timeout_secs = 12;
        let pool = settings.pool_config().unwrap();
        assert_eq!(pool.database_url, "postgres://localhost/comply");
        assert_eq!(pool.acquire_timeout, Duration::from_secs(12));
        assert_eq!(pool.max_connections, 20);
    }
}
