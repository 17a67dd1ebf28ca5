//! Domain Model
//!
//! Plans, orders, payment status snapshots and the keys that flow through
//! the activation workflow.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ActivationError, Result};

/// Backend plan code sent with order and feature-key requests
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanCode {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl PlanCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanCode::Free => "free",
            PlanCode::Pro => "pro",
            PlanCode::Enterprise => "enterprise",
        }
    }

    /// Map a plan's display name to its backend code.
    ///
    /// Unrecognized names fall back to `free`.
    pub fn from_display_name(name: &str) -> Self {
        match name {
            "Professional" => PlanCode::Pro,
            "Enterprise" => PlanCode::Enterprise,
            _ => PlanCode::Free,
        }
    }
}

impl std::fmt::Display for PlanCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price label used by free plans
pub const FREE_PRICE: &str = "Free";

/// A pricing tier picked before checkout starts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Display name (Starter, Professional, Enterprise)
    pub name: String,

    /// Currency string, or "Free"
    pub price: String,

    /// Billing period label
    #[serde(default)]
    pub period: String,

    #[serde(default)]
    pub description: String,
}

impl Plan {
    pub fn new(
        name: impl Into<String>,
        price: impl Into<String>,
        period: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            price: price.into(),
            period: period.into(),
            description: description.into(),
        }
    }

    pub fn starter() -> Self {
        Self::new(
            "Starter",
            FREE_PRICE,
            "forever",
            "Perfect for exploring your career potential",
        )
    }

    pub fn professional() -> Self {
        Self::new(
            "Professional",
            "₹999",
            "per month",
            "Advanced matching and JD enhancement for growing teams",
        )
    }

    pub fn enterprise() -> Self {
        Self::new(
            "Enterprise",
            "₹4,999",
            "per month",
            "Unlimited screening with priority support",
        )
    }

    /// Look up a preset by display name (case-insensitive)
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "starter" | "free" => Some(Self::starter()),
            "professional" | "pro" => Some(Self::professional()),
            "enterprise" => Some(Self::enterprise()),
            _ => None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.price == FREE_PRICE
    }

    pub fn code(&self) -> PlanCode {
        PlanCode::from_display_name(&self.name)
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::starter()
    }
}

/// The user's existing session key, sent as `x-api-key`
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey({})", mask_key(&self.0))
    }
}

/// Issued feature key
///
/// Display and Debug only show the masked form.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key. Only hand this to the user.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        mask_key(&self.0)
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

/// First 12 chars, a run of bullets, last 4 chars
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 16 {
        return "•".repeat(chars.len());
    }
    let head: String = chars[..12].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "•".repeat(16), tail)
}

/// Subscription order as returned by order creation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub order_id: String,

    #[serde(default)]
    pub order_amount: Option<Decimal>,

    #[serde(default)]
    pub order_currency: Option<String>,

    /// Public gateway key for the checkout widget
    #[serde(default)]
    pub key_id: Option<String>,

    /// Set when no payment is needed (trial)
    #[serde(default)]
    pub skip_payment: bool,

    #[serde(default)]
    pub subscription_id: Option<i64>,

    #[serde(default)]
    pub message: Option<String>,
}

impl Order {
    /// Build the descriptor handed to the payment gateway.
    ///
    /// Fails unless the order has an id, a positive amount and a currency.
    pub fn checkout_descriptor(&self, plan: &Plan) -> Result<CheckoutDescriptor> {
        if self.order_id.trim().is_empty() {
            return Err(ActivationError::Order("order response has no order_id".into()));
        }
        let amount = match self.order_amount {
            Some(amount) if amount > Decimal::ZERO => amount,
            Some(amount) => {
                return Err(ActivationError::Order(format!(
                    "order amount must be positive, got {}",
                    amount
                )))
            }
            None => return Err(ActivationError::Order("order response has no amount".into())),
        };
        let currency = match self.order_currency.as_deref().map(str::trim) {
            Some(currency) if !currency.is_empty() => currency.to_string(),
            _ => return Err(ActivationError::Order("order response has no currency".into())),
        };

        Ok(CheckoutDescriptor {
            order_id: self.order_id.clone(),
            amount,
            currency,
            key_id: self.key_id.clone(),
            description: format!("Subscribe to {}", plan.name),
        })
    }
}

/// Everything the payment widget needs to open checkout
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutDescriptor {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub key_id: Option<String>,
    pub description: String,
}

/// Settlement state reported by the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Success,
    Failed,
    Cancelled,
    /// Anything the backend sends that we do not know about
    #[serde(other)]
    Unknown,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Success => "success",
            PaymentState::Failed => "failed",
            PaymentState::Cancelled => "cancelled",
            PaymentState::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::Success | PaymentState::Failed | PaymentState::Cancelled
        )
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payment status snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub order_id: String,
    pub status: PaymentState,

    #[serde(default)]
    pub amount: Decimal,

    #[serde(default)]
    pub plan: String,

    #[serde(default)]
    pub payment_id: Option<String>,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub updated_at: Option<String>,
}

impl PaymentStatus {
    /// Minimal snapshot, mostly for tests and mocks
    pub fn new(order_id: impl Into<String>, status: PaymentState) -> Self {
        Self {
            order_id: order_id.into(),
            status,
            amount: Decimal::ZERO,
            plan: String::new(),
            payment_id: None,
            created_at: None,
            updated_at: None,
        }
    }
}
