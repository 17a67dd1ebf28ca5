//! Workflow Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ActivationError, Result};

/// Scopes requested for a new feature key when none are configured
pub const DEFAULT_SCOPES: [&str; 2] = ["enhance_jd", "extract_and_match_jd_cv"];

/// Tunables for the activation workflow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Scopes attached to issued feature keys
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Delay before each payment status request
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub poll_interval: Duration,

    /// Status requests before giving up with a timeout
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Tell the backend to cancel the order when polling is cancelled
    #[serde(default)]
    pub cancel_order_on_abandon: bool,
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_max_poll_attempts() -> u32 {
    60
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            scopes: default_scopes(),
            poll_interval: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            cancel_order_on_abandon: false,
        }
    }
}

impl ActivationConfig {
    /// Read overrides from `ACTIVATION_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("ACTIVATION_FEATURE_KEY_SCOPES") {
            let scopes: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
                ActivationError::Config(format!("ACTIVATION_FEATURE_KEY_SCOPES must be a JSON array: {}", e))
            })?;
            config.scopes = scopes;
        }

        if let Some(raw) = lookup("ACTIVATION_POLL_INTERVAL_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ActivationError::Config(format!("invalid ACTIVATION_POLL_INTERVAL_SECS: {}", raw))
            })?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("ACTIVATION_POLL_MAX_ATTEMPTS") {
            config.max_poll_attempts = raw.trim().parse().map_err(|_| {
                ActivationError::Config(format!("invalid ACTIVATION_POLL_MAX_ATTEMPTS: {}", raw))
            })?;
        }

        if let Some(raw) = lookup("ACTIVATION_CANCEL_ORDER_ON_ABANDON") {
            config.cancel_order_on_abandon = matches!(
                raw.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(ActivationError::Config("poll_interval must be at least 1 second".into()));
        }
        if self.max_poll_attempts == 0 {
            return Err(ActivationError::Config("max_poll_attempts must be at least 1".into()));
        }
        if self.scopes.is_empty() {
            return Err(ActivationError::Config("at least one feature key scope is required".into()));
        }
        Ok(())
    }

    /// Upper bound on how long polling can take
    pub fn polling_ceiling(&self) -> Duration {
        self.poll_interval * self.max_poll_attempts
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
