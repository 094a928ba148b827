//! Library configuration fixed once per process.
//!
//! The only knob is what happens when a release function fails while a
//! wrapper is being torn down. The choice is made once, before wrappers are
//! in use, and never changes afterwards.
//!
//! ```rust
//! use holdfast::config::{Config, ReleaseFailurePolicy};
//!
//! let config = Config::new().with_release_failure(ReleaseFailurePolicy::Log);
//! assert_eq!(config.release_failure, ReleaseFailurePolicy::Log);
//! ```

use std::fmt;
use std::sync::OnceLock;

/// Environment variable read by [`Config::from_env`].
pub const RELEASE_FAILURE_ENV: &str = "HOLDFAST_RELEASE_FAILURE";

static INSTALLED: OnceLock<Config> = OnceLock::new();
static DEFAULT: Config = Config::new();

/// What a wrapper does when its release function fails during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ReleaseFailurePolicy {
    /// Log the failure and continue.
    #[default]
    Log,
    /// Log the failure and abort the process.
    Abort,
}

impl std::str::FromStr for ReleaseFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(ReleaseFailurePolicy::Log),
            "abort" => Ok(ReleaseFailurePolicy::Abort),
            _ => Err(ConfigError::InvalidValue {
                key: RELEASE_FAILURE_ENV,
                value: s.to_string(),
            }),
        }
    }
}

/// Process-wide library configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Config {
    /// Policy applied to release failures.
    pub release_failure: ReleaseFailurePolicy,
}

impl Config {
    /// The default configuration: release failures are logged.
    pub const fn new() -> Self {
        Self {
            release_failure: ReleaseFailurePolicy::Log,
        }
    }

    /// Set the release failure policy.
    pub fn with_release_failure(mut self, policy: ReleaseFailurePolicy) -> Self {
        self.release_failure = policy;
        self
    }

    /// Build a configuration from the environment.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();
        if let Some(raw) = lookup(RELEASE_FAILURE_ENV) {
            config.release_failure = raw.parse()?;
        }
        Ok(config)
    }

    /// Fix this configuration for the rest of the process.
    ///
    /// Fails if a configuration was already installed.
    pub fn install(self) -> Result<(), ConfigError> {
        INSTALLED
            .set(self)
            .map_err(|_| ConfigError::AlreadyInstalled)
    }
}

/// The installed configuration, or the default if none was installed.
pub fn current() -> &'static Config {
    INSTALLED.get().unwrap_or(&DEFAULT)
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration was already installed for this process.
    AlreadyInstalled,
    /// A configuration value could not be parsed.
    InvalidValue {
        /// The offending key.
        key: &'static str,
        /// The raw value.
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::AlreadyInstalled => write!(f, "configuration already installed"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value {:?} for {}", value, key)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_log() {
        assert_eq!(Config::default().release_failure, ReleaseFailurePolicy::Log);
        assert_eq!(Config::new(), Config::default());
    }

    #[test]
    fn parses_policy_case_insensitively() {
        assert_eq!(
            "ABORT".parse::<ReleaseFailurePolicy>(),
            Ok(ReleaseFailurePolicy::Abort)
        );
        assert_eq!(
            " log ".parse::<ReleaseFailurePolicy>(),
            Ok(ReleaseFailurePolicy::Log)
        );
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = "explode".parse::<ReleaseFailurePolicy>().unwrap_err();
        assert!(err.to_string().contains("explode"));
    }

    #[test]
    fn lookup_overrides_default() {
        let config = Config::from_lookup(|key| {
            (key == RELEASE_FAILURE_ENV).then(|| "abort".to_string())
        })
        .unwrap();
        assert_eq!(config.release_failure, ReleaseFailurePolicy::Abort);
    }

    #[test]
    fn missing_lookup_keeps_default() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::new());
    }

    #[test]
    fn current_defaults_to_log() {
        // Nothing in the unit test binary installs an Abort config.
        assert_eq!(current().release_failure, ReleaseFailurePolicy::Log);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_serde_roundtrip() {
        let config = Config::new().with_release_failure(ReleaseFailurePolicy::Abort);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"release_failure":"abort"}"#);
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let empty: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, Config::new());
    }
}
