//! Backend Connection Settings

use activation_core::{ActivationError, Result};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Where the subscription backend lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL for `/api/v1/users/*` endpoints
    pub base_url: String,

    /// Base URL for admin endpoints (`/add-client`)
    pub admin_base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            admin_base_url: DEFAULT_BASE_URL.into(),
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            admin_base_url: base_url.clone(),
            base_url,
            ..Default::default()
        }
    }

    /// Read `ACTIVATION_API_BASE_URL`, `ACTIVATION_ADMIN_API_BASE_URL` and
    /// `ACTIVATION_HTTP_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("ACTIVATION_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let admin_base_url = lookup("ACTIVATION_ADMIN_API_BASE_URL").unwrap_or_else(|| base_url.clone());
        let timeout_secs = match lookup("ACTIVATION_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                ActivationError::Config(format!("invalid ACTIVATION_HTTP_TIMEOUT_SECS: {}", raw))
            })?,
            None => 30,
        };

        Ok(Self {
            base_url,
            admin_base_url,
            timeout_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_url_defaults_to_base() {
        let config = BackendConfig::from_lookup(|k| {
            (k == "ACTIVATION_API_BASE_URL").then(|| "https://api.example.com".to_string())
        })
        .unwrap();

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.admin_base_url, "https://api.example.com");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_bad_timeout() {
        let result = BackendConfig::from_lookup(|k| {
            (k == "ACTIVATION_HTTP_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}
