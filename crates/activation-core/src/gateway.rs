//! Payment Gateway Adapter
//!
//! Third-party checkout widgets are fire-and-forget: they receive an order
//! descriptor and report back once, when the user closes checkout. That
//! report is advisory. Only the backend's payment status says whether money
//! actually settled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::model::CheckoutDescriptor;

/// What the widget reported when it closed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutEvent {
    /// Widget's success callback fired
    Completed,

    /// User closed the widget without paying
    Dismissed,
}

/// One-shot completion callback handed to the gateway.
///
/// Consuming `self` guarantees a single transition per launch.
#[derive(Debug)]
pub struct CheckoutSignal {
    tx: oneshot::Sender<CheckoutEvent>,
}

impl CheckoutSignal {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<CheckoutEvent>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn complete(self) {
        self.send(CheckoutEvent::Completed);
    }

    pub fn dismiss(self) {
        self.send(CheckoutEvent::Dismissed);
    }

    pub fn send(self, event: CheckoutEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(?event, "Checkout signal dropped, controller no longer waiting");
        }
    }
}

/// Payment widget integration (Razorpay, Stripe Elements, a console prompt...)
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open checkout for the order. Must return promptly; completion is
    /// reported later through `signal`.
    async fn launch(&self, checkout: CheckoutDescriptor, signal: CheckoutSignal) -> Result<()>;

    /// Gateway name for logs
    fn name(&self) -> &str;
}
