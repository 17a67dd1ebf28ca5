//! # activation-core
//!
//! Subscription activation workflow: profile submission, order creation,
//! payment confirmation polling and feature-key issuance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ActivationController                      │
//! │  ┌────────────────────┐  ┌────────────┐  ┌────────────────┐  │
//! │  │ ActivationWorkflow │  │ BackendApi │  │ PaymentGateway │  │
//! │  │  (state machine)   │──│ (Strategy) │──│   (Strategy)   │  │
//! │  └────────────────────┘  └────────────┘  └────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The workflow is pure state; the controller performs the calls, runs the
//! polling timer and broadcasts [`ActivationEvent`]s for a UI layer.
//! `BackendApi` and `PaymentGateway` keep the transport and the checkout
//! widget swappable (HTTP client, console prompt, test doubles).

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod gateway;
pub mod mock;
pub mod model;
pub mod profile;
pub mod workflow;

pub use api::BackendApi;
pub use config::ActivationConfig;
pub use controller::{ActivationController, PollCanceller, Settlement, Step};
pub use error::{ActivationError, IssuanceContext, Result, ValidationErrors};
pub use event::{ActivationEvent, Notice, NoticeLevel};
pub use gateway::{CheckoutEvent, CheckoutSignal, PaymentGateway};
pub use model::{
    ApiKey, CheckoutDescriptor, Credential, Order, PaymentState, PaymentStatus, Plan, PlanCode,
};
pub use profile::ProfileData;
pub use workflow::{ActivationState, ActivationWorkflow};
