//! Strongly-typed configuration for the scout engine.
//!
//! Configuration values can be constructed from defaults, loaded from
//! environment variables (with optional `.env` support), or merged with
//! explicit overrides for programmatic updates. Credentials are only ever
//! sourced from the environment or explicit configuration — never from
//! source-level constants.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use thiserror::Error;

/// Verbosity level for engine logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Minimal,
    Medium,
    Detailed,
}

impl Verbosity {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Medium
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Portal login credentials.
#[derive(Clone, PartialEq, Eq, DeriveSerialize, DeriveDeserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration values for one workflow run.
#[derive(Debug, Clone, DeriveSerialize, DeriveDeserialize)]
#[serde(default)]
pub struct ScoutConfig {
    pub credentials: Option<Credentials>,
    pub headless: bool,
    #[serde(alias = "chromeExecutable")]
    pub chrome_executable: Option<PathBuf>,
    #[serde(alias = "viewportWidth")]
    pub viewport_width: u32,
    #[serde(alias = "viewportHeight")]
    pub viewport_height: u32,
    #[serde(alias = "navTimeoutMs")]
    pub nav_timeout_ms: u64,
    #[serde(alias = "actionTimeoutMs")]
    pub action_timeout_ms: u64,
    #[serde(alias = "dismissAttempts")]
    pub dismiss_attempts: usize,
    #[serde(alias = "dismissSettleMs")]
    pub dismiss_settle_ms: u64,
    #[serde(alias = "blockedRetries")]
    pub blocked_retries: usize,
    #[serde(alias = "artifactsDir")]
    pub artifacts_dir: Option<PathBuf>,
    pub verbose: Verbosity,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        ScoutConfig {
            credentials: None,
            headless: false,
            chrome_executable: None,
            viewport_width: 1288,
            viewport_height: 711,
            nav_timeout_ms: 15_000,
            action_timeout_ms: 5_000,
            dismiss_attempts: 5,
            dismiss_settle_ms: 2_000,
            blocked_retries: 2,
            artifacts_dir: None,
            verbose: Verbosity::Medium,
        }
    }
}

impl ScoutConfig {
    /// Construct a configuration by reading relevant environment variables,
    /// after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ScoutConfigError> {
        let _ = dotenv();
        let mut config = ScoutConfig::default();

        let email = env_var("SCOUT_EMAIL");
        let password = env_var("SCOUT_PASSWORD");
        if let (Some(email), Some(password)) = (email, password) {
            config.credentials = Some(Credentials { email, password });
        }

        if let Some(value) = env_var("SCOUT_HEADLESS") {
            config.headless = parse_bool("SCOUT_HEADLESS", &value)?;
        }

        if let Some(value) = env_var("SCOUT_CHROME_BIN") {
            config.chrome_executable = Some(PathBuf::from(value));
        }

        if let Some(value) = env_var("SCOUT_NAV_TIMEOUT_MS") {
            config.nav_timeout_ms = parse_u64("SCOUT_NAV_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("SCOUT_ACTION_TIMEOUT_MS") {
            config.action_timeout_ms = parse_u64("SCOUT_ACTION_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("SCOUT_DISMISS_ATTEMPTS") {
            config.dismiss_attempts = parse_u64("SCOUT_DISMISS_ATTEMPTS", &value)? as usize;
        }

        if let Some(value) = env_var("SCOUT_DISMISS_SETTLE_MS") {
            config.dismiss_settle_ms = parse_u64("SCOUT_DISMISS_SETTLE_MS", &value)?;
        }

        if let Some(value) = env_var("SCOUT_BLOCKED_RETRIES") {
            config.blocked_retries = parse_u64("SCOUT_BLOCKED_RETRIES", &value)? as usize;
        }

        if let Some(value) = env_var("SCOUT_ARTIFACTS_DIR") {
            config.artifacts_dir = Some(PathBuf::from(value));
        }

        if let Some(value) = env_var("SCOUT_VERBOSE") {
            let parsed = parse_u8("SCOUT_VERBOSE", &value)?;
            config.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                ScoutConfigError::invalid_enum("SCOUT_VERBOSE", parsed.to_string())
            })?;
        }

        Ok(config)
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: ScoutConfigOverrides) -> ScoutConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.credentials {
            next.credentials = value;
        }
        if let Some(value) = overrides.headless {
            next.headless = value;
        }
        if let Some(value) = overrides.chrome_executable {
            next.chrome_executable = value;
        }
        if let Some(value) = overrides.nav_timeout_ms {
            next.nav_timeout_ms = value;
        }
        if let Some(value) = overrides.action_timeout_ms {
            next.action_timeout_ms = value;
        }
        if let Some(value) = overrides.dismiss_attempts {
            next.dismiss_attempts = value;
        }
        if let Some(value) = overrides.dismiss_settle_ms {
            next.dismiss_settle_ms = value;
        }
        if let Some(value) = overrides.blocked_retries {
            next.blocked_retries = value;
        }
        if let Some(value) = overrides.artifacts_dir {
            next.artifacts_dir = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }

        next
    }

    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.nav_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn dismiss_settle(&self) -> Duration {
        Duration::from_millis(self.dismiss_settle_ms)
    }
}

/// Field-level overrides for [`ScoutConfig::with_overrides`].
#[derive(Debug, Default, Clone)]
pub struct ScoutConfigOverrides {
    pub credentials: Option<Option<Credentials>>,
    pub headless: Option<bool>,
    pub chrome_executable: Option<Option<PathBuf>>,
    pub nav_timeout_ms: Option<u64>,
    pub action_timeout_ms: Option<u64>,
    pub dismiss_attempts: Option<usize>,
    pub dismiss_settle_ms: Option<u64>,
    pub blocked_retries: Option<usize>,
    pub artifacts_dir: Option<Option<PathBuf>>,
    pub verbose: Option<Verbosity>,
}

impl ScoutConfigOverrides {
    /// Builder-style helper to set the `headless` override.
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    /// Builder-style helper to set the `credentials` override.
    pub fn credentials<T: Into<Option<Credentials>>>(mut self, credentials: T) -> Self {
        self.credentials = Some(credentials.into());
        self
    }
}

/// Errors that can arise while constructing a [`ScoutConfig`].
#[derive(Debug, Error)]
pub enum ScoutConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

impl ScoutConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        ScoutConfigError::InvalidEnumVariant { field, value }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ScoutConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ScoutConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, ScoutConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| ScoutConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ScoutConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| ScoutConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}
