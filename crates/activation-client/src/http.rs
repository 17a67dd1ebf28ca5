//! HTTP Backend
//!
//! `reqwest` implementation of [`BackendApi`] against the users API.

use std::time::Duration;

use activation_core::{
    ActivationError, ApiKey, BackendApi, Credential, Order, PaymentStatus, PlanCode, ProfileData,
    Result,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

use crate::config::BackendConfig;

const API_KEY_HEADER: &str = "x-api-key";
const USERS_PATH: [&str; 3] = ["api", "v1", "users"];

/// Which JSON field carries the error text for an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ErrorField {
    Message,
    Detail,
}

impl ErrorField {
    fn key(self) -> &'static str {
        match self {
            ErrorField::Message => "message",
            ErrorField::Detail => "detail",
        }
    }
}

/// Pull the backend's error text out of a failed response body
pub(crate) fn error_message(body: &serde_json::Value, field: ErrorField, fallback: &str) -> String {
    body.get(field.key())
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(fallback)
        .to_string()
}

pub(crate) fn transport(err: reqwest::Error) -> ActivationError {
    ActivationError::Transport(err.to_string())
}

/// Read a JSON body, or turn a non-2xx answer into `ActivationError::Server`
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    field: ErrorField,
    fallback: &str,
) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport)?;

    if !status.is_success() {
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_default();
        let message = error_message(&body, field, fallback);
        tracing::warn!(status = status.as_u16(), %message, "Backend request failed");
        return Err(ActivationError::Server {
            status: status.as_u16(),
            message,
        });
    }

    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    plan: &'a str,
}

/// `create-order` wire shape; `amount`/`currency` map onto the order fields
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct OrderResponse {
    order_id: Option<String>,
    amount: Option<Decimal>,
    currency: Option<String>,
    key_id: Option<String>,
    skip_payment: Option<bool>,
    subscription_id: Option<i64>,
    message: Option<String>,
}

impl From<OrderResponse> for Order {
    fn from(wire: OrderResponse) -> Self {
        Order {
            order_id: wire.order_id.unwrap_or_default(),
            order_amount: wire.amount,
            order_currency: wire.currency,
            key_id: wire.key_id,
            skip_payment: wire.skip_payment.unwrap_or(false),
            subscription_id: wire.subscription_id,
            message: wire.message,
        }
    }
}

#[derive(Debug, Serialize)]
struct FeatureKeyRequest<'a> {
    scopes: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FeatureKeyResponse {
    feature_key: Option<String>,
    message: Option<String>,
}

impl FeatureKeyResponse {
    pub(crate) fn into_credential(self, status: u16) -> Result<Credential> {
        match self.feature_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => Ok(Credential::new(key)),
            None => Err(ActivationError::Server {
                status,
                message: self
                    .message
                    .unwrap_or_else(|| "No feature key received from server".into()),
            }),
        }
    }
}

/// Subscription backend over HTTP
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    admin_base_url: Url,
}

impl HttpBackend {
    /// Build a client from configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = parse_base(&config.base_url)?;
        let admin_base_url = parse_base(&config.admin_base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ActivationError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            admin_base_url,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(&BackendConfig::from_env()?)
    }

    /// `{base}/api/v1/users/{segments..}`
    pub(crate) fn users_url(&self, segments: &[&str]) -> Result<Url> {
        join(&self.base_url, USERS_PATH.iter().copied().chain(segments.iter().copied()))
    }

    pub(crate) fn admin_url(&self, segments: &[&str]) -> Result<Url> {
        join(&self.admin_base_url, segments.iter().copied())
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub(crate) fn authed(&self, method: Method, url: Url, key: &ApiKey) -> RequestBuilder {
        self.request(method, url).header(API_KEY_HEADER, key.as_str())
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| ActivationError::Config(format!("invalid base URL {:?}: {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(ActivationError::Config(format!("{:?} cannot be a base URL", raw)));
    }
    Ok(url)
}

/// Append path segments, percent-encoding each one
fn join<'a>(base: &Url, segments: impl Iterator<Item = &'a str>) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ActivationError::Config(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn save_profile(&self, key: &ApiKey, profile: &ProfileData) -> Result<()> {
        let url = self.users_url(&["profile"])?;
        tracing::debug!(%url, "Saving profile");

        let response = self
            .authed(Method::PUT, url, key)
            .json(profile)
            .send()
            .await
            .map_err(transport)?;
        let _: serde_json::Value =
            read_json(response, ErrorField::Message, "Profile update failed").await?;
        Ok(())
    }

    async fn create_order(&self, key: &ApiKey, plan: PlanCode) -> Result<Order> {
        let url = self.users_url(&["create-order"])?;
        tracing::debug!(%url, plan = %plan, "Creating order");

        let response = self
            .authed(Method::POST, url, key)
            .json(&CreateOrderRequest { plan: plan.as_str() })
            .send()
            .await
            .map_err(transport)?;
        let wire: OrderResponse =
            read_json(response, ErrorField::Detail, "Subscription creation failed").await?;
        Ok(wire.into())
    }

    async fn poll_order_status(&self, key: &ApiKey, order_id: &str) -> Result<PaymentStatus> {
        let url = self.users_url(&["payment-status", order_id])?;

        let response = self
            .authed(Method::GET, url, key)
            .send()
            .await
            .map_err(transport)?;
        read_json(response, ErrorField::Detail, "Failed to get payment status").await
    }

    async fn issue_feature_credential(
        &self,
        key: &ApiKey,
        plan: PlanCode,
        scopes: &[String],
    ) -> Result<Credential> {
        let mut url = self.users_url(&["feature-key"])?;
        url.query_pairs_mut().append_pair("plan", plan.as_str());
        tracing::debug!(plan = %plan, scopes = ?scopes, "Requesting feature key");

        let response = self
            .authed(Method::POST, url, key)
            .json(&FeatureKeyRequest { scopes })
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        let wire: FeatureKeyResponse =
            read_json(response, ErrorField::Message, "Feature key creation failed").await?;
        wire.into_credential(status)
    }

    async fn cancel_order(&self, key: &ApiKey, order_id: &str) -> Result<()> {
        let url = self.users_url(&["cancel-payment", order_id])?;
        tracing::info!(order_id, "Cancelling order");

        let response = self
            .authed(Method::POST, url, key)
            .send()
            .await
            .map_err(transport)?;
        let _: serde_json::Value =
            read_json(response, ErrorField::Detail, "Failed to cancel payment").await?;
        Ok(())
    }
}
