//! Mock Payment Gateway

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{ActivationError, Result};
use crate::gateway::{CheckoutSignal, PaymentGateway};
use crate::model::CheckoutDescriptor;

/// How the mock widget behaves once launched
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayBehavior {
    /// Fire the success callback right away
    Complete,

    /// User closes the widget
    Dismiss,

    /// Keep the signal; the test fires it with [`MockGateway::take_signal`]
    Hold,

    /// Widget fails to open
    Fail,
}

/// Recording [`PaymentGateway`]
pub struct MockGateway {
    behavior: GatewayBehavior,
    launches: Mutex<Vec<CheckoutDescriptor>>,
    held: Mutex<Option<CheckoutSignal>>,
}

impl MockGateway {
    pub fn new(behavior: GatewayBehavior) -> Self {
        Self {
            behavior,
            launches: Mutex::new(Vec::new()),
            held: Mutex::new(None),
        }
    }

    /// Orders the widget was opened for
    pub fn launches(&self) -> Vec<CheckoutDescriptor> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Signal kept by [`GatewayBehavior::Hold`]
    pub fn take_signal(&self) -> Option<CheckoutSignal> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn launch(&self, checkout: CheckoutDescriptor, signal: CheckoutSignal) -> Result<()> {
        if self.behavior == GatewayBehavior::Fail {
            return Err(ActivationError::Transport("payment widget unavailable".into()));
        }
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(checkout);

        match self.behavior {
            GatewayBehavior::Complete => signal.complete(),
            GatewayBehavior::Dismiss => signal.dismiss(),
            GatewayBehavior::Hold | GatewayBehavior::Fail => {
                *self.held.lock().unwrap_or_else(PoisonError::into_inner) = Some(signal);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
