//! Typed settings for Liquida, layered from built-in defaults, an optional
//! TOML file and `LIQUIDA__*` environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides, e.g. `LIQUIDA__LEDGER__STRICT_RECONCILIATION=true`.
pub const ENV_PREFIX: &str = "LIQUIDA";
const ENV_SEPARATOR: &str = "__";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LiquidaConfig {
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding rules, contracts, entries and settlements.
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/liquida.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Refuse to book entries whose split raised a reconciliation warning.
    pub strict_reconciliation: bool,
    /// Permit the section-wide last-resort rule.
    pub allow_fallback_rule: bool,
    pub rounding_scale: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            strict_reconciliation: false,
            allow_fallback_rule: true,
            rounding_scale: 2,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub json: bool,
    /// Directory for daily rolling log files. Console only when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            directory: None,
        }
    }
}

impl LiquidaConfig {
    /// Load defaults, then `path` (when given), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`LiquidaConfig::load`] but reads overrides from `env` instead
    /// of the process environment when provided.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );
        let settings = builder.build().with_context(|| match path {
            Some(path) => format!("failed to read configuration from {}", path.display()),
            None => "failed to read configuration from environment".to_string(),
        })?;
        let config: LiquidaConfig = settings
            .try_deserialize()
            .context("invalid configuration values")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.rounding_scale > 10 {
            anyhow::bail!(
                "ledger.rounding_scale must be at most 10, got {}",
                self.ledger.rounding_scale
            );
        }
        if self.database.path.as_os_str().is_empty() {
            anyhow::bail!("database.path must not be empty");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }
}
