//! # activation-client
//!
//! HTTP client for the subscription backend.
//!
//! [`HttpBackend`] implements [`activation_core::BackendApi`] and also exposes
//! the account endpoints (register, login, analytics, subscription, admin key
//! provisioning). Every authenticated call sends the user's key in the
//! `x-api-key` header.

pub mod account;
pub mod config;
pub mod http;

pub use account::{
    AnalyticsRecord, AnalyticsSummary, ClientKeyResponse, LoginRequest, RegisterRequest,
    SubscriptionSummary, UserAccount,
};
pub use config::BackendConfig;
pub use http::HttpBackend;
