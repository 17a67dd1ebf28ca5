//! `activate` command

use std::sync::Arc;

use activation_client::HttpBackend;
use activation_core::{
    ActivationConfig, ActivationController, ActivationEvent, ApiKey, CheckoutEvent, Credential,
    NoticeLevel, ProfileData, Settlement, Step,
};
use anyhow::{Context, Result, bail};
use tokio::sync::broadcast;

use crate::cli::ActivateArgs;
use crate::console::ConsoleGateway;
use crate::{print_error, print_info, print_success, print_warning};

const INTERRUPTED: &str = "activation interrupted";

pub async fn run(args: ActivateArgs, backend: HttpBackend, key: ApiKey) -> Result<()> {
    let raw = std::fs::read_to_string(&args.profile)
        .with_context(|| format!("reading profile {}", args.profile.display()))?;
    let profile: ProfileData = serde_json::from_str(&raw).context("parsing profile JSON")?;

    let mut config = ActivationConfig::from_env()?;
    if args.cancel_on_abandon {
        config.cancel_order_on_abandon = true;
    }
    tracing::debug!(
        interval = ?config.poll_interval,
        max_attempts = config.max_poll_attempts,
        ceiling = ?config.polling_ceiling(),
        "Activation settings"
    );

    let plan = args.plan.plan();
    print_info(&format!("Activating {} ({} {})", plan.name, plan.price, plan.period));

    let mut controller = ActivationController::new(
        plan,
        key,
        Arc::new(backend),
        Arc::new(ConsoleGateway),
        config,
    )?;
    let printer = tokio::spawn(print_events(controller.subscribe()));

    let outcome = drive(&mut controller, &profile, ctrl_c).await;
    let final_state = controller.state();
    drop(controller);
    let _ = printer.await;

    match outcome? {
        Some(credential) => {
            print_success("Feature key issued. Store it now, it is only shown once:");
            println!("{}", credential.expose());
        }
        None => print_warning(&format!("No feature key issued (state: {})", final_state)),
    }
    Ok(())
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}

/// Run `step` unless `interrupt` resolves first
async fn interruptible<T, F>(step: impl Future<Output = T>, interrupt: F) -> Result<T>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        output = step => Ok(output),
        () = interrupt => bail!(INTERRUPTED),
    }
}

/// Take the session from profile to credential.
///
/// `interrupt` aborts every step except polling; while polling it cancels
/// the loop and the session falls back to `AwaitingPayment`.
async fn drive<I, F>(
    controller: &mut ActivationController,
    profile: &ProfileData,
    interrupt: I,
) -> Result<Option<Credential>>
where
    I: Fn() -> F,
    F: Future<Output = ()>,
{
    match interruptible(controller.submit_profile(profile), interrupt()).await? {
        Ok(Step::Activated(credential)) => return Ok(Some(credential)),
        Ok(Step::AwaitingPayment | Step::CheckoutLaunched(_)) => {}
        Err(e) if controller.workflow().pending_issuance().is_some() => {
            print_warning(&format!("{}; retrying once", e.user_message()));
            let credential =
                interruptible(controller.retry_credential_issuance(), interrupt()).await??;
            return Ok(Some(credential));
        }
        Err(e) => return Err(e.into()),
    }

    if let Step::Activated(credential) =
        interruptible(controller.initiate_payment(), interrupt()).await??
    {
        return Ok(Some(credential));
    }

    if interruptible(controller.await_checkout(), interrupt()).await?? == CheckoutEvent::Dismissed {
        return Ok(None);
    }

    let canceller = controller.poll_canceller();
    let settlement = {
        let poll = controller.poll_payment();
        tokio::pin!(poll);
        tokio::select! {
            settlement = &mut poll => settlement?,
            () = interrupt() => {
                print_warning("Cancelling payment polling");
                canceller.cancel();
                poll.await?
            }
        }
    };

    match settlement {
        Settlement::Activated(credential) => Ok(Some(credential)),
        Settlement::CredentialPending(e) => {
            print_warning(&format!("{}; retrying once", e.user_message()));
            let credential =
                interruptible(controller.retry_credential_issuance(), interrupt()).await??;
            Ok(Some(credential))
        }
        Settlement::Cancelled | Settlement::Dismissed => Ok(None),
    }
}

async fn print_events(mut events: broadcast::Receiver<ActivationEvent>) {
    loop {
        match events.recv().await {
            Ok(ActivationEvent::Notice(notice)) => {
                let line = format!("{}: {}", notice.title, notice.description);
                match notice.level {
                    NoticeLevel::Success => print_success(&line),
                    NoticeLevel::Info => print_info(&line),
                    NoticeLevel::Warning => print_warning(&line),
                    NoticeLevel::Error => print_error(&line),
                }
            }
            Ok(ActivationEvent::Status(status)) => {
                tracing::info!(order_id = %status.order_id, status = %status.status, "Payment status");
            }
            Ok(ActivationEvent::Transition(t)) => {
                tracing::debug!(from = %t.from, to = %t.to, "State changed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use activation_core::mock::{GatewayBehavior, MockBackend, MockGateway};
    use activation_core::{ActivationState, Order, Plan};
    use rust_decimal::Decimal;

    use super::*;

    fn profile() -> ProfileData {
        ProfileData {
            industry: "Software".into(),
            company_size: "11-50".into(),
            country: "India".into(),
            job_title: "Engineering Manager".into(),
            website: "https://example.com".into(),
            linkedin_url: "https://www.linkedin.com/in/someone".into(),
            referral_source: "Search".into(),
            interested_features: "JD enhancement".into(),
            marketing_opt_in: false,
        }
    }

    fn paid_order() -> Order {
        Order {
            order_id: "ord_1".into(),
            order_amount: Some(Decimal::new(99900, 0)),
            order_currency: Some("INR".into()),
            ..Default::default()
        }
    }

    fn controller(backend: &Arc<MockBackend>, gateway: &Arc<MockGateway>) -> ActivationController {
        ActivationController::new(
            Plan::professional(),
            ApiKey::new("user_key_123"),
            backend.clone(),
            gateway.clone(),
            ActivationConfig::default(),
        )
        .unwrap()
    }

    fn after(secs: u64) -> impl Fn() -> tokio::time::Sleep {
        move || tokio::time::sleep(Duration::from_secs(secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_at_checkout_prompt_stops_the_run() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order())]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Hold));
        let mut controller = controller(&backend, &gateway);

        let err = drive(&mut controller, &profile(), after(10)).await.unwrap_err();

        assert_eq!(err.to_string(), INTERRUPTED);
        assert_eq!(controller.state(), ActivationState::AwaitingPayment);

        // a late confirmation no longer starts polling
        gateway.take_signal().unwrap().complete();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(backend.calls().poll.is_empty());
        assert!(backend.calls().issue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_polling_cancels_polling() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order())]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(&backend, &gateway);

        let outcome = drive(&mut controller, &profile(), after(10)).await.unwrap();

        assert!(outcome.is_none());
        assert_eq!(controller.state(), ActivationState::AwaitingPayment);
        assert_eq!(backend.calls().poll.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninterrupted_run_activates() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order())]).with_statuses([
            Ok(activation_core::PaymentStatus::new(
                "ord_1",
                activation_core::PaymentState::Success,
            )),
        ]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(&backend, &gateway);

        let credential = drive(&mut controller, &profile(), after(3600)).await.unwrap();

        assert!(credential.is_some());
        assert_eq!(controller.state(), ActivationState::Activated);
    }
}
