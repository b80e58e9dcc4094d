//! # configs
//!
//! Layered application settings: built-in defaults, then an optional
//! `skillboard.toml` (or the file named by `SKILLBOARD_CONFIG`), then
//! `SKILLBOARD__SECTION__KEY` environment variables. A `.env` file is read
//! first so it can feed the environment layer.

use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

const ENV_PREFIX: &str = "SKILLBOARD";
const CONFIG_PATH_VAR: &str = "SKILLBOARD_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "skillboard";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub transactions: TransactionSettings,
    pub auth: AuthSettings,
    pub media: MediaSettings,
    pub log: LogSettings,
    /// `.env` file read by [`Settings::load`], if any. Reported by the caller
    /// once logging is up.
    #[serde(skip)]
    pub env_file: Option<PathBuf>,
}

/// Bounded retry of optimistic transactions.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl TransactionSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    pub min_password_length: usize,
    pub max_failed_attempts: u32,
    pub lockout_secs: u64,
    #[serde(default)]
    pub password_pepper: Option<SecretString>,
}

impl AuthSettings {
    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSettings {
    pub root: PathBuf,
    pub url_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Settings {
    /// Loads `.env`, the optional config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let env_file = dotenvy::dotenv().ok();
        let file = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());

        let settings: Settings = defaults()?
            .add_source(File::with_name(&file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Settings { env_file, ..settings }.validate()
    }

    /// Defaults overlaid with an inline TOML document.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        let tx = &self.transactions;
        if tx.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "transactions.max_attempts must be at least 1".into(),
            ));
        }
        if tx.base_delay_ms > tx.max_delay_ms {
            return Err(ConfigError::Invalid(
                "transactions.base_delay_ms must not exceed transactions.max_delay_ms".into(),
            ));
        }
        if self.auth.min_password_length == 0 {
            return Err(ConfigError::Invalid(
                "auth.min_password_length must be at least 1".into(),
            ));
        }
        Ok(self)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(Config::builder()
        .set_default("transactions.max_attempts", 5_i64)?
        .set_default("transactions.base_delay_ms", 5_i64)?
        .set_default("transactions.max_delay_ms", 200_i64)?
        .set_default("auth.min_password_length", 6_i64)?
        .set_default("auth.max_failed_attempts", 5_i64)?
        .set_default("auth.lockout_secs", 60_i64)?
        .set_default("media.root", "./data/blobs")?
        .set_default("media.url_prefix", "/static/blobs")?
        .set_default("log.format", "pretty")?
        .set_default("log.filter", "info")?)
}
