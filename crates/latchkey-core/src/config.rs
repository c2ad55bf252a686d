//! Registry configuration
//!
//! Values come from defaults, then an optional TOML file, then
//! `LATCHKEY_*` environment variables, each layer overriding the last:
//!
//! ```toml
//! sweep = "periodic"
//! sweep_interval_ms = 5000
//! ```

use crate::errors::{Result, TokenError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "LATCHKEY_";

/// Default period between sweeps in periodic mode
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

/// When expired tokens are removed from the indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepMode {
    /// Every `register` call sweeps due expiration slots
    #[default]
    Lazy,
    /// A background task sweeps on a fixed interval
    Periodic,
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepMode::Lazy => f.write_str("lazy"),
            SweepMode::Periodic => f.write_str("periodic"),
        }
    }
}

impl FromStr for SweepMode {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lazy" => Ok(SweepMode::Lazy),
            "periodic" => Ok(SweepMode::Periodic),
            other => Err(TokenError::config(format!(
                "unknown sweep mode `{other}` (expected `lazy` or `periodic`)"
            ))),
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Sweep strategy
    pub sweep: SweepMode,
    /// Milliseconds between sweeps in periodic mode
    pub sweep_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep: SweepMode::Lazy,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

/// Layered configuration: defaults, then a TOML file, then environment
pub trait LatchkeyConfig: Clone + Default + DeserializeOwned + Send + Sync + 'static {
    /// Keys accepted by [`LatchkeyConfig::set_from_string`]
    const KEYS: &'static [&'static str];

    /// Default configuration values
    fn defaults() -> Self {
        Self::default()
    }

    /// Parse a TOML document; missing keys take their defaults.
    fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TokenError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Override fields from `LATCHKEY_*` environment variables
    fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Override fields from `(name, value)` pairs named like environment
    /// variables. Names without the prefix or naming no key are ignored.
    fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let Some(key) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            if !Self::KEYS.contains(&key.as_str()) {
                tracing::trace!(key = %key, "Ignoring unrelated environment variable");
                continue;
            }
            self.set_from_string(&key, value.as_ref())?;
            tracing::debug!(key = %key, "Configuration overridden from environment");
        }
        self.validate()
    }

    /// Take every field of `other` that differs from its default
    fn merge_with(&mut self, other: &Self) -> Result<()>;

    /// Set one field from its textual form
    fn set_from_string(&mut self, key: &str, value: &str) -> Result<()>;

    /// Check cross-field constraints
    fn validate(&self) -> Result<()>;
}

impl LatchkeyConfig for RegistryConfig {
    const KEYS: &'static [&'static str] = &["sweep", "sweep_mode", "sweep_interval_ms"];

    fn merge_with(&mut self, other: &Self) -> Result<()> {
        let defaults = Self::defaults();
        if other.sweep != defaults.sweep {
            self.sweep = other.sweep;
        }
        if other.sweep_interval_ms != defaults.sweep_interval_ms {
            self.sweep_interval_ms = other.sweep_interval_ms;
        }
        self.validate()
    }

    fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "sweep" | "sweep_mode" => self.sweep = value.parse()?,
            "sweep_interval_ms" => {
                self.sweep_interval_ms = value.trim().parse().map_err(|e| {
                    TokenError::config(format!("invalid sweep_interval_ms `{value}`: {e}"))
                })?;
            }
            other => {
                return Err(TokenError::config(format!(
                    "unknown configuration key `{other}`"
                )))
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.sweep == SweepMode::Periodic && self.sweep_interval_ms == 0 {
            return Err(TokenError::config(
                "periodic sweeping needs a non-zero sweep_interval_ms",
            ));
        }
        Ok(())
    }
}

impl RegistryConfig {
    /// Sweep period as a `Duration`
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
