//! Account Endpoints
//!
//! Registration, login, usage analytics, subscription lookup and admin key
//! provisioning. None of these are needed by the activation workflow itself;
//! analytics and subscription back the CLI's auxiliary commands.

use std::collections::BTreeMap;

use activation_core::{ActivationError, ApiKey, Result};
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::http::{ErrorField, HttpBackend, read_json, transport};

/// New account details
#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company_name: String,
    pub position: String,
    pub password: String,
}

impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("company_name", &self.company_name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Account returned by register and login
#[derive(Clone, Debug, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub position: String,
    pub api_key: ApiKey,
    #[serde(default)]
    pub is_active: bool,
}

/// One logged API call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub endpoint: String,
    #[serde(default)]
    pub request_data: String,
    #[serde(default)]
    pub response_data: String,
    pub status_code: u16,
    pub timestamp: String,
}

/// Current subscription
#[derive(Clone, Debug, Deserialize)]
pub struct SubscriptionSummary {
    pub plan: String,
    pub status: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub usage_summary: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClientKeyResponse {
    pub api_key: ApiKey,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddClientRequest<'a> {
    client_email: &'a str,
}

/// Counts over a set of [`AnalyticsRecord`]s
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AnalyticsSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub by_status: BTreeMap<u16, usize>,
    pub by_endpoint: BTreeMap<String, usize>,
    pub last_seen: Option<String>,
}

impl AnalyticsSummary {
    pub fn from_records(records: &[AnalyticsRecord]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            if (200..300).contains(&record.status_code) {
                summary.succeeded += 1;
            } else if record.status_code >= 400 {
                summary.failed += 1;
            }
            *summary.by_status.entry(record.status_code).or_default() += 1;
            *summary
                .by_endpoint
                .entry(record.endpoint.clone())
                .or_default() += 1;

            // RFC 3339 timestamps order lexically
            if summary
                .last_seen
                .as_deref()
                .is_none_or(|seen| record.timestamp.as_str() > seen)
            {
                summary.last_seen = Some(record.timestamp.clone());
            }
        }

        summary
    }

    /// Share of 2xx responses, 0.0 when empty
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64
    }

    /// Endpoints by call count, busiest first
    pub fn top_endpoints(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut endpoints: Vec<_> = self
            .by_endpoint
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        endpoints.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        endpoints.truncate(limit);
        endpoints
    }
}

impl HttpBackend {
    pub(crate) fn register_call(&self, request: &RegisterRequest) -> Result<RequestBuilder> {
        Ok(self
            .request(Method::POST, self.users_url(&["register"])?)
            .json(request))
    }

    pub(crate) fn login_call(&self, request: &LoginRequest) -> Result<RequestBuilder> {
        Ok(self
            .request(Method::POST, self.users_url(&["login"])?)
            .json(request))
    }

    pub(crate) fn add_client_call(
        &self,
        client_email: &str,
        admin_username: &str,
        admin_password: &str,
    ) -> Result<RequestBuilder> {
        Ok(self
            .request(Method::POST, self.admin_url(&["add-client"])?)
            .basic_auth(admin_username, Some(admin_password))
            .json(&AddClientRequest { client_email }))
    }

    pub async fn register_user(&self, request: &RegisterRequest) -> Result<UserAccount> {
        tracing::info!(email = %request.email, "Registering user");
        let response = self
            .register_call(request)?
            .send()
            .await
            .map_err(transport)?;
        read_json(response, ErrorField::Message, "Registration failed").await
    }

    pub async fn login_user(&self, request: &LoginRequest) -> Result<UserAccount> {
        tracing::info!(email = %request.email, "Logging in");
        let response = self.login_call(request)?.send().await.map_err(transport)?;
        read_json(response, ErrorField::Message, "Login failed").await
    }

    /// Logged API calls for the key's owner
    pub async fn user_analytics(&self, key: &ApiKey) -> Result<Vec<AnalyticsRecord>> {
        let url = self.users_url(&["analytics"])?;

        let response = self
            .authed(Method::GET, url, key)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActivationError::Server {
                status: status.as_u16(),
                message: "Failed to fetch analytics".into(),
            });
        }
        response.json().await.map_err(transport)
    }

    pub async fn subscription(&self, key: &ApiKey) -> Result<SubscriptionSummary> {
        let url = self.users_url(&["subscription"])?;

        let response = self
            .authed(Method::GET, url, key)
            .send()
            .await
            .map_err(transport)?;
        read_json(response, ErrorField::Detail, "Failed to get subscription").await
    }

    /// Provision an API key for a client through the admin service
    pub async fn create_client_key(
        &self,
        client_email: &str,
        admin_username: &str,
        admin_password: &str,
    ) -> Result<ClientKeyResponse> {
        tracing::info!(client_email, "Creating client API key");
        let response = self
            .add_client_call(client_email, admin_username, admin_password)?
            .send()
            .await
            .map_err(transport)?;
        read_json(response, ErrorField::Message, "API key creation failed").await
    }
}
