//! Test Doubles
//!
//! Scripted collaborators for tests and offline demos.

mod backend;
mod gateway;

pub use backend::{CallLog, MockBackend};
pub use gateway::{GatewayBehavior, MockGateway};
