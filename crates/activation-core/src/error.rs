//! Error Types

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::ActivationState;

/// Result type alias for activation operations
pub type Result<T> = std::result::Result<T, ActivationError>;

/// Where a credential issuance attempt came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuanceContext {
    /// Free plan, issued right after the profile was saved
    FreePlan,

    /// Order came back with `skip_payment` (trial)
    Trial,

    /// Paid plan after the backend confirmed the payment
    PaidPlan,
}

impl IssuanceContext {
    /// Whether money has already changed hands when issuance runs
    pub fn payment_succeeded(&self) -> bool {
        matches!(self, IssuanceContext::PaidPlan)
    }
}

/// A single failing profile field
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// All failing profile fields, in schema order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &'static str, message: &'static str) {
        self.fields.push(FieldError { field, message });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.fields
    }

    /// Message for a given field, if it failed
    pub fn message_for(&self, field: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|f| f.field == field)
            .map(|f| f.message)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Activation error types
#[derive(Error, Debug)]
pub enum ActivationError {
    /// Profile input failed the schema
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Network failure talking to the backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Order response was missing required fields
    #[error("Order error: {0}")]
    Order(String),

    /// Backend reported the payment as failed or cancelled
    #[error("Payment {status} for order {order_id}")]
    PaymentOutcome { order_id: String, status: String },

    /// Polling cap exhausted without a terminal status
    #[error("Payment status unknown for order {order_id} after {attempts} attempts")]
    Timeout { order_id: String, attempts: u32 },

    /// Feature key could not be issued
    #[error("Credential issuance failed ({context:?}): {message}")]
    CredentialIssuance {
        context: IssuanceContext,
        message: String,
    },

    /// Operation called from a state that does not allow it
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ActivationState,
    },

    /// No session API key to authenticate collaborator calls
    #[error("User API key missing")]
    MissingSessionKey,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ActivationError {
    /// Check if the same call can simply be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActivationError::Transport(_)
                | ActivationError::Server { .. }
                | ActivationError::Order(_)
                | ActivationError::CredentialIssuance { .. }
        )
    }

    /// Issuance failed after the payment already went through
    pub fn payment_succeeded(&self) -> bool {
        matches!(
            self,
            ActivationError::CredentialIssuance { context, .. } if context.payment_succeeded()
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            ActivationError::Validation(errors) => {
                format!("Please correct the highlighted fields: {}", errors)
            }
            ActivationError::Transport(_) => {
                "Could not reach the server. Please try again.".into()
            }
            ActivationError::Server { message, .. } => message.clone(),
            ActivationError::Order(_) => "Invalid order details from server".into(),
            ActivationError::PaymentOutcome { .. } => {
                "Your payment was not successful. Please try again.".into()
            }
            ActivationError::Timeout { .. } => {
                "Unable to confirm payment status. Please contact support if payment was deducted."
                    .into()
            }
            ActivationError::CredentialIssuance { context, message } => {
                if context.payment_succeeded() {
                    "Payment was successful but there was an issue generating your API key. Please contact support."
                        .into()
                } else {
                    message.clone()
                }
            }
            ActivationError::MissingSessionKey => "User API key missing".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paid_issuance_keeps_payment_fact() {
        let paid = ActivationError::CredentialIssuance {
            context: IssuanceContext::PaidPlan,
            message: "boom".into(),
        };
        let free = ActivationError::CredentialIssuance {
            context: IssuanceContext::FreePlan,
            message: "boom".into(),
        };

        assert!(paid.payment_succeeded());
        assert!(paid.user_message().contains("Payment was successful"));
        assert!(!free.payment_succeeded());
        assert_eq!(free.user_message(), "boom");
    }

    #[test]
    fn test_timeout_is_not_a_payment_failure() {
        let err = ActivationError::Timeout {
            order_id: "ord_1".into(),
            attempts: 60,
        };
        assert!(!matches!(err, ActivationError::PaymentOutcome { .. }));
        assert!(!err.is_retryable());
        assert!(err.user_message().contains("contact support"));
    }

    #[test]
    fn test_validation_display() {
        let mut errors = ValidationErrors::new();
        errors.push("industry", "Industry is required");
        errors.push("website", "Enter a valid website URL");

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.message_for("website"), Some("Enter a valid website URL"));
        assert_eq!(
            errors.to_string(),
            "industry: Industry is required; website: Enter a valid website URL"
        );
    }
}
