//! Backend Collaborator
//!
//! The workflow talks to the subscription backend only through this trait,
//! so an HTTP client, a test double or any other transport can be plugged in.
//!
//! The session key is passed into every call instead of being read from
//! ambient state.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ApiKey, Credential, Order, PaymentStatus, PlanCode};
use crate::profile::ProfileData;

/// Subscription backend (Strategy pattern)
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Store the user's profile
    async fn save_profile(&self, key: &ApiKey, profile: &ProfileData) -> Result<()>;

    /// Create a subscription order for a plan
    async fn create_order(&self, key: &ApiKey, plan: PlanCode) -> Result<Order>;

    /// Fetch the current payment status of an order
    async fn poll_order_status(&self, key: &ApiKey, order_id: &str) -> Result<PaymentStatus>;

    /// Issue a feature key for the plan with the given scopes
    async fn issue_feature_credential(
        &self,
        key: &ApiKey,
        plan: PlanCode,
        scopes: &[String],
    ) -> Result<Credential>;

    /// Ask the backend to drop an abandoned order
    async fn cancel_order(&self, key: &ApiKey, order_id: &str) -> Result<()>;
}
