//! Console Payment Gateway
//!
//! Stands in for the hosted payment widget: prints the order and waits for
//! the operator to confirm that the payment went through.

use std::io::BufRead;

use activation_core::{CheckoutDescriptor, CheckoutEvent, CheckoutSignal, PaymentGateway, Result};
use async_trait::async_trait;

pub struct ConsoleGateway;

/// Map an operator answer to a widget outcome
pub fn parse_answer(answer: &str) -> CheckoutEvent {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "paid" => CheckoutEvent::Completed,
        _ => CheckoutEvent::Dismissed,
    }
}

#[async_trait]
impl PaymentGateway for ConsoleGateway {
    async fn launch(&self, checkout: CheckoutDescriptor, signal: CheckoutSignal) -> Result<()> {
        println!();
        println!("  {}", checkout.description);
        println!("  Order:    {}", checkout.order_id);
        println!("  Amount:   {} {}", checkout.amount, checkout.currency);
        if let Some(key_id) = &checkout.key_id {
            println!("  Gateway:  {}", key_id);
        }
        println!();
        println!("Complete the payment, then type 'y' (anything else closes checkout):");

        // detached so an interrupted run can exit while stdin is still blocked
        std::thread::spawn(move || {
            let mut line = String::new();
            let event = match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => CheckoutEvent::Dismissed,
                Ok(_) => parse_answer(&line),
            };
            signal.send(event);
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}
