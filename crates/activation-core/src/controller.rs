//! Activation Controller
//!
//! Drives one checkout session: saves the profile, creates the order, hands
//! it to the payment gateway, polls the backend until the payment settles and
//! finally issues the feature key.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut controller = ActivationController::new(
//!     Plan::professional(),
//!     ApiKey::new(user_api_key),
//!     backend,
//!     gateway,
//!     ActivationConfig::default(),
//! )?;
//!
//! controller.submit_profile(&profile).await?;
//! controller.initiate_payment().await?;
//! match controller.run_checkout().await? {
//!     Settlement::Activated(key) => println!("{}", key.expose()),
//!     other => println!("{:?}", other),
//! }
//! ```
//!
//! Polling is serialized: the controller waits one interval, sends one status
//! request, applies the answer and only then schedules the next one. A
//! [`PollCanceller`] stops the loop from outside; a request already in flight
//! is allowed to settle and its answer is discarded.

use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, watch};
use uuid::Uuid;

use crate::api::BackendApi;
use crate::config::ActivationConfig;
use crate::error::{ActivationError, IssuanceContext, Result};
use crate::event::{ActivationEvent, Notice};
use crate::gateway::{CheckoutEvent, CheckoutSignal, PaymentGateway};
use crate::model::{ApiKey, CheckoutDescriptor, Credential, Plan};
use crate::profile::ProfileData;
use crate::workflow::{ActivationState, ActivationWorkflow, OrderNext, PollUpdate, ProfileNext};

const EVENT_CAPACITY: usize = 64;

/// Where a step left the session
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Credential issued, nothing left to do
    Activated(Credential),

    /// Profile saved for a paid plan; call `initiate_payment` next
    AwaitingPayment,

    /// Payment widget is open for this order
    CheckoutLaunched(CheckoutDescriptor),
}

/// How a checkout ended
#[derive(Debug)]
pub enum Settlement {
    /// Payment confirmed and credential issued
    Activated(Credential),

    /// Payment confirmed but issuance failed; retry with
    /// `retry_credential_issuance`
    CredentialPending(ActivationError),

    /// Polling was cancelled locally
    Cancelled,

    /// User closed the payment widget without paying
    Dismissed,
}

/// Handle that stops a running (or about to run) poll loop
#[derive(Clone, Debug)]
pub struct PollCanceller {
    tx: Arc<watch::Sender<u64>>,
}

impl PollCanceller {
    pub fn cancel(&self) {
        self.tx.send_modify(|epoch| *epoch += 1);
    }
}

/// Controller for one checkout session
pub struct ActivationController {
    id: Uuid,
    session_key: ApiKey,
    backend: Arc<dyn BackendApi>,
    gateway: Arc<dyn PaymentGateway>,
    config: ActivationConfig,
    workflow: ActivationWorkflow,
    checkout: Option<oneshot::Receiver<CheckoutEvent>>,
    cancel_tx: Arc<watch::Sender<u64>>,
    poll_cancel: Option<watch::Receiver<u64>>,
    events: broadcast::Sender<ActivationEvent>,
}

impl ActivationController {
    /// Create a controller for the selected plan
    pub fn new(
        plan: Plan,
        session_key: ApiKey,
        backend: Arc<dyn BackendApi>,
        gateway: Arc<dyn PaymentGateway>,
        config: ActivationConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (cancel_tx, _) = watch::channel(0u64);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            id: Uuid::new_v4(),
            session_key,
            backend,
            gateway,
            workflow: ActivationWorkflow::new(plan, config.max_poll_attempts),
            config,
            checkout: None,
            cancel_tx: Arc::new(cancel_tx),
            poll_cancel: None,
            events,
        })
    }

    /// Session id used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ActivationState {
        self.workflow.state()
    }

    pub fn workflow(&self) -> &ActivationWorkflow {
        &self.workflow
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.workflow.credential()
    }

    pub fn config(&self) -> &ActivationConfig {
        &self.config
    }

    /// Receive transitions, status snapshots and notices
    pub fn subscribe(&self) -> broadcast::Receiver<ActivationEvent> {
        self.events.subscribe()
    }

    pub fn poll_canceller(&self) -> PollCanceller {
        PollCanceller {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    fn key(&self) -> Result<ApiKey> {
        if self.session_key.is_empty() {
            return Err(ActivationError::MissingSessionKey);
        }
        Ok(self.session_key.clone())
    }

    fn emit(&self, event: ActivationEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn notify(&self, notice: Notice) {
        self.emit(ActivationEvent::Notice(notice));
    }

    fn flush_transitions(&mut self) {
        for transition in self.workflow.take_transitions() {
            tracing::info!(
                session = %self.id,
                from = %transition.from,
                to = %transition.to,
                "Activation state changed"
            );
            self.emit(ActivationEvent::Transition(transition));
        }
    }

    /// Validate and save the profile, then either activate a free plan or
    /// wait for payment
    pub async fn submit_profile(&mut self, profile: &ProfileData) -> Result<Step> {
        self.workflow.begin_profile()?;
        let key = self.key().inspect_err(|e| self.notify(Notice::from_error("Error", e)))?;

        if let Err(e) = profile.validate() {
            tracing::debug!(session = %self.id, error = %e, "Profile rejected");
            self.notify(Notice::from_error("Invalid Profile", &e));
            return Err(e);
        }

        tracing::info!(session = %self.id, "Updating user profile");
        if let Err(e) = self.backend.save_profile(&key, profile).await {
            tracing::warn!(session = %self.id, error = %e, "Profile update failed");
            self.notify(Notice::from_error("Error", &e));
            return Err(e);
        }

        let next = self.workflow.profile_saved()?;
        self.flush_transitions();
        self.notify(Notice::success(
            "Profile Updated",
            "Your details have been saved successfully.",
        ));

        match next {
            ProfileNext::IssueCredential(_) => {
                tracing::info!(session = %self.id, "Free plan detected, issuing credential directly");
                self.issue_credential().await.map(Step::Activated)
            }
            ProfileNext::AwaitPayment => Ok(Step::AwaitingPayment),
        }
    }

    /// Create an order for the plan and open the payment widget
    pub async fn initiate_payment(&mut self) -> Result<Step> {
        let key = self.key().inspect_err(|e| self.notify(Notice::from_error("Error", e)))?;
        let code = self.workflow.begin_order()?;
        self.flush_transitions();
        self.checkout = None;

        tracing::info!(
            session = %self.id,
            plan = %self.workflow.plan().name,
            code = %code,
            "Creating subscription order"
        );
        let order = match self.backend.create_order(&key, code).await {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Order creation failed");
                self.notify(Notice::from_error("Error", &e));
                return Err(e);
            }
        };
        let trial_message = order.message.clone();

        match self.workflow.order_created(order) {
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Order response rejected");
                self.notify(Notice::from_error("Error", &e));
                Err(e)
            }
            Ok(OrderNext::IssueCredential(_)) => {
                tracing::info!(session = %self.id, "Payment skipped, issuing trial credential");
                self.notify(Notice::success(
                    "Free Trial Activated",
                    trial_message.unwrap_or_else(|| "Your free trial is now active.".into()),
                ));
                self.issue_credential().await.map(Step::Activated)
            }
            Ok(OrderNext::Checkout(descriptor)) => {
                let (signal, rx) = CheckoutSignal::channel();
                if let Err(e) = self.gateway.launch(descriptor.clone(), signal).await {
                    tracing::warn!(session = %self.id, error = %e, "Payment widget failed to open");
                    self.notify(Notice::from_error("Error", &e));
                    return Err(e);
                }
                self.checkout = Some(rx);
                tracing::info!(
                    session = %self.id,
                    order_id = %descriptor.order_id,
                    gateway = self.gateway.name(),
                    "Checkout launched"
                );
                Ok(Step::CheckoutLaunched(descriptor))
            }
        }
    }

    /// Wait for the payment widget's one-shot completion signal.
    ///
    /// `Completed` moves the session to `PollingPayment`. A dismissed widget
    /// (or a dropped signal) leaves it in `AwaitingPayment`.
    pub async fn await_checkout(&mut self) -> Result<CheckoutEvent> {
        let rx = self.checkout.take().ok_or(ActivationError::InvalidState {
            operation: "await checkout",
            state: self.workflow.state(),
        })?;
        let event = rx.await.unwrap_or(CheckoutEvent::Dismissed);

        match event {
            CheckoutEvent::Completed => {
                let receiver = self.cancel_tx.subscribe();
                let generation = self.workflow.checkout_completed()?;
                self.poll_cancel = Some(receiver);
                self.flush_transitions();
                tracing::info!(session = %self.id, generation, "Checkout completed, verifying payment");
                self.notify(Notice::info(
                    "Payment Processing",
                    "Payment was successful. Verifying and generating API key...",
                ));
            }
            CheckoutEvent::Dismissed => {
                tracing::info!(session = %self.id, "Checkout dismissed");
            }
        }
        Ok(event)
    }

    /// Poll the backend until the payment settles, the attempt cap is hit or
    /// polling is cancelled
    pub async fn poll_payment(&mut self) -> Result<Settlement> {
        if self.workflow.state() != ActivationState::PollingPayment {
            return Err(ActivationError::InvalidState {
                operation: "poll payment",
                state: self.workflow.state(),
            });
        }
        // a previous call may have been dropped mid-request
        if let Some(PollUpdate::TimedOut { order_id, attempts }) = self.workflow.release_in_flight() {
            self.flush_transitions();
            return Err(self.timed_out(order_id, attempts));
        }
        let key = self.key()?;
        let backend = Arc::clone(&self.backend);
        let mut cancel_rx = self
            .poll_cancel
            .take()
            .unwrap_or_else(|| self.cancel_tx.subscribe());
        let interval = self.config.poll_interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel_rx.changed() => {
                    self.cancel_polling().await?;
                    return Ok(Settlement::Cancelled);
                }
            }

            let Some(ticket) = self.workflow.next_poll() else {
                return Err(ActivationError::InvalidState {
                    operation: "poll payment",
                    state: self.workflow.state(),
                });
            };
            tracing::debug!(
                session = %self.id,
                order_id = %ticket.order_id,
                attempt = ticket.attempt,
                max_attempts = self.config.max_poll_attempts,
                generation = ticket.generation,
                "Polling payment status"
            );

            let fetch = backend.poll_order_status(&key, &ticket.order_id);
            tokio::pin!(fetch);
            let result = tokio::select! {
                result = &mut fetch => result,
                _ = cancel_rx.changed() => {
                    self.cancel_polling().await?;
                    // in-flight request is not aborted; its answer is dropped
                    let late = fetch.await;
                    let update = self.workflow.apply_poll(&ticket, late);
                    tracing::debug!(session = %self.id, ?update, "Late status response after cancel");
                    return Ok(Settlement::Cancelled);
                }
            };

            let update = self.workflow.apply_poll(&ticket, result);
            self.flush_transitions();

            match update {
                PollUpdate::Discarded => {}
                PollUpdate::Pending { attempt, status } => {
                    tracing::debug!(session = %self.id, attempt, status = %status.status, "Payment not settled yet");
                    self.emit(ActivationEvent::Status(status));
                }
                PollUpdate::Errored { attempt, error } => {
                    tracing::warn!(session = %self.id, attempt, error = %error, "Payment status request failed");
                }
                PollUpdate::Settled(status) => {
                    tracing::info!(
                        session = %self.id,
                        order_id = %status.order_id,
                        payment_id = ?status.payment_id,
                        "Payment confirmed"
                    );
                    self.emit(ActivationEvent::Status(status));
                    return Ok(match self.issue_credential().await {
                        Ok(credential) => Settlement::Activated(credential),
                        Err(e) => Settlement::CredentialPending(e),
                    });
                }
                PollUpdate::Failed(status) => {
                    tracing::warn!(
                        session = %self.id,
                        order_id = %status.order_id,
                        status = %status.status,
                        "Payment failed"
                    );
                    let error = ActivationError::PaymentOutcome {
                        order_id: status.order_id.clone(),
                        status: status.status.to_string(),
                    };
                    self.emit(ActivationEvent::Status(status));
                    self.notify(Notice::from_error("Payment Failed", &error));
                    return Err(error);
                }
                PollUpdate::TimedOut { order_id, attempts } => {
                    return Err(self.timed_out(order_id, attempts));
                }
            }
        }
    }

    fn timed_out(&self, order_id: String, attempts: u32) -> ActivationError {
        tracing::warn!(session = %self.id, order_id = %order_id, attempts, "Payment polling timed out");
        let error = ActivationError::Timeout { order_id, attempts };
        self.notify(Notice::warning("Payment Status Timeout", error.user_message()));
        error
    }

    /// Wait for the widget and, if it completed, poll until settlement
    pub async fn run_checkout(&mut self) -> Result<Settlement> {
        match self.await_checkout().await? {
            CheckoutEvent::Completed => self.poll_payment().await,
            CheckoutEvent::Dismissed => Ok(Settlement::Dismissed),
        }
    }

    /// Stop polling and forget the order.
    ///
    /// Local reset only; the backend is told to cancel the order when
    /// `cancel_order_on_abandon` is set, and a failure there is just logged.
    pub async fn cancel_polling(&mut self) -> Result<()> {
        let order_id = self.workflow.cancel_polling()?;
        self.poll_cancel = None;
        self.flush_transitions();
        tracing::info!(session = %self.id, order_id = ?order_id, "Payment polling cancelled");

        if let (true, Some(order_id)) = (self.config.cancel_order_on_abandon, order_id.as_deref()) {
            if let Ok(key) = self.key() {
                if let Err(e) = self.backend.cancel_order(&key, order_id).await {
                    tracing::warn!(session = %self.id, order_id, error = %e, "Backend order cancellation failed");
                }
            }
        }

        self.notify(Notice::info(
            "Payment Cancelled",
            "Your payment order has been cancelled.",
        ));
        Ok(())
    }

    /// Try the pending issuance again (paid plan after an issuance error, or
    /// a free plan whose first issuance failed)
    pub async fn retry_credential_issuance(&mut self) -> Result<Credential> {
        self.issue_credential().await
    }

    async fn issue_credential(&mut self) -> Result<Credential> {
        let (code, context) = self
            .workflow
            .pending_issuance()
            .ok_or(ActivationError::InvalidState {
                operation: "issue credential",
                state: self.workflow.state(),
            })?;
        let key = self.key()?;

        tracing::info!(session = %self.id, plan = %code, context = ?context, "Issuing feature key");
        match self
            .backend
            .issue_feature_credential(&key, code, &self.config.scopes)
            .await
        {
            Ok(credential) => {
                self.workflow.credential_issued(credential.clone())?;
                self.flush_transitions();
                tracing::info!(session = %self.id, credential = %credential, "Feature key issued");
                self.notify(match context {
                    IssuanceContext::PaidPlan => Notice::success(
                        "Payment Successful!",
                        "Your subscription is now active. API key generated.",
                    ),
                    IssuanceContext::FreePlan => Notice::success(
                        "Success!",
                        "Your free plan is now active. API key generated.",
                    ),
                    IssuanceContext::Trial => {
                        Notice::success("Success!", "Your trial is now active. API key generated.")
                    }
                });
                Ok(credential)
            }
            Err(e) => {
                tracing::error!(session = %self.id, plan = %code, error = %e, "Feature key issuance failed");
                let error = ActivationError::CredentialIssuance {
                    context,
                    message: e.user_message(),
                };
                self.notify(if context.payment_succeeded() {
                    Notice::warning("Payment Successful, but API Key Error", error.user_message())
                } else {
                    Notice::from_error("API Key Generation Error", &error)
                });
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use tokio::time::Instant;

    use super::*;
    use crate::event::NoticeLevel;
    use crate::mock::{GatewayBehavior, MockBackend, MockGateway};
    use crate::model::{Order, PaymentState, PaymentStatus, PlanCode};
    use crate::profile::sample_profile;

    fn paid_order(id: &str) -> Order {
        Order {
            order_id: id.into(),
            order_amount: Some(dec!(99900)),
            order_currency: Some("INR".into()),
            key_id: Some("rzp_test_key".into()),
            ..Default::default()
        }
    }

    fn status(state: PaymentState) -> Result<PaymentStatus> {
        Ok(PaymentStatus::new("ord_1", state))
    }

    fn controller(plan: Plan, backend: &Arc<MockBackend>, gateway: &Arc<MockGateway>) -> ActivationController {
        ActivationController::new(
            plan,
            ApiKey::new("user_key_123"),
            backend.clone(),
            gateway.clone(),
            ActivationConfig::default(),
        )
        .unwrap()
    }

    fn notices(rx: &mut broadcast::Receiver<ActivationEvent>) -> Vec<Notice> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ActivationEvent::Notice(notice)) => out.push(notice),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
        out
    }

    async fn into_polling(controller: &mut ActivationController) {
        assert_eq!(
            controller.submit_profile(&sample_profile()).await.unwrap(),
            Step::AwaitingPayment
        );
        assert!(matches!(
            controller.initiate_payment().await.unwrap(),
            Step::CheckoutLaunched(_)
        ));
        assert_eq!(controller.await_checkout().await.unwrap(), CheckoutEvent::Completed);
        assert_eq!(controller.state(), ActivationState::PollingPayment);
    }

    #[tokio::test]
    async fn test_free_plan_activates_without_order() {
        let backend = Arc::new(MockBackend::new());
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::starter(), &backend, &gateway);

        let step = controller.submit_profile(&sample_profile()).await.unwrap();

        assert!(matches!(step, Step::Activated(_)));
        assert_eq!(
            controller.workflow().history(),
            &[
                ActivationState::CollectingProfile,
                ActivationState::ProfileSaved,
                ActivationState::Activated
            ]
        );
        let calls = backend.calls();
        assert_eq!(calls.save_profile, 1);
        assert!(calls.create_order.is_empty());
        assert_eq!(calls.issue.len(), 1);
        assert_eq!(calls.issue[0].0, PlanCode::Free);
        assert_eq!(calls.issue[0].1, vec!["enhance_jd", "extract_and_match_jd_cv"]);
        assert!(calls.keys.iter().all(|k| k == "user_key_123"));
        assert!(gateway.launches().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_profile_stays_collecting() {
        let backend = Arc::new(MockBackend::new());
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::starter(), &backend, &gateway);

        let profile = ProfileData {
            linkedin_url: "linkedin".into(),
            ..sample_profile()
        };
        let err = controller.submit_profile(&profile).await.unwrap_err();

        assert!(matches!(err, ActivationError::Validation(_)));
        assert_eq!(controller.state(), ActivationState::CollectingProfile);
        assert_eq!(backend.calls().save_profile, 0);
    }

    #[tokio::test]
    async fn test_profile_save_failure_allows_retry() {
        let backend = Arc::new(MockBackend::new().with_save_results([Err(ActivationError::Transport(
            "connection refused".into(),
        ))]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::starter(), &backend, &gateway);
        let mut events = controller.subscribe();

        assert!(controller.submit_profile(&sample_profile()).await.is_err());
        assert_eq!(controller.state(), ActivationState::CollectingProfile);
        match events.try_recv().unwrap() {
            ActivationEvent::Notice(notice) => assert_eq!(notice.level, NoticeLevel::Error),
            other => panic!("expected notice, got {:?}", other),
        }

        assert!(controller.submit_profile(&sample_profile()).await.is_ok());
        assert_eq!(controller.state(), ActivationState::Activated);
        assert_eq!(backend.calls().save_profile, 2);
    }

    #[tokio::test]
    async fn test_missing_session_key() {
        let backend = Arc::new(MockBackend::new());
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = ActivationController::new(
            Plan::starter(),
            ApiKey::new(""),
            backend.clone(),
            gateway,
            ActivationConfig::default(),
        )
        .unwrap();

        let err = controller.submit_profile(&sample_profile()).await.unwrap_err();
        assert!(matches!(err, ActivationError::MissingSessionKey));
        assert_eq!(backend.calls().save_profile, 0);
    }

    #[tokio::test]
    async fn test_free_issuance_failure_can_be_retried() {
        let backend = Arc::new(MockBackend::new().with_issue_results([Err(ActivationError::Server {
            status: 500,
            message: "Feature key creation failed".into(),
        })]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::starter(), &backend, &gateway);

        let err = controller.submit_profile(&sample_profile()).await.unwrap_err();
        assert!(matches!(
            err,
            ActivationError::CredentialIssuance {
                context: IssuanceContext::FreePlan,
                ..
            }
        ));
        assert!(!err.payment_succeeded());
        assert_eq!(controller.state(), ActivationState::ProfileSaved);

        controller.retry_credential_issuance().await.unwrap();
        assert_eq!(controller.state(), ActivationState::Activated);
        assert!(controller.credential().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_professional_settles_after_third_poll() {
        let backend = Arc::new(
            MockBackend::new()
                .with_orders([Ok(paid_order("ord_1"))])
                .with_statuses([
                    status(PaymentState::Pending),
                    status(PaymentState::Pending),
                    status(PaymentState::Success),
                ]),
        );
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        into_polling(&mut controller).await;
        let started = Instant::now();
        let settlement = controller.poll_payment().await.unwrap();

        assert!(matches!(settlement, Settlement::Activated(_)));
        assert!(started.elapsed() >= Duration::from_secs(6));
        let calls = backend.calls();
        assert_eq!(calls.poll, vec!["ord_1", "ord_1", "ord_1"]);
        assert_eq!(calls.create_order, vec![PlanCode::Pro]);
        assert_eq!(calls.issue[0].0, PlanCode::Pro);
        assert_eq!(controller.state(), ActivationState::Activated);

        // nothing polls after the terminal status
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.calls().poll.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enterprise_failed_on_first_poll() {
        let backend = Arc::new(
            MockBackend::new()
                .with_orders([Ok(paid_order("ord_1"))])
                .with_statuses([status(PaymentState::Failed)]),
        );
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::enterprise(), &backend, &gateway);

        into_polling(&mut controller).await;
        let err = controller.poll_payment().await.unwrap_err();

        assert!(matches!(err, ActivationError::PaymentOutcome { ref status, .. } if status == "failed"));
        assert_eq!(controller.state(), ActivationState::PaymentFailed);
        assert!(controller.credential().is_none());
        assert!(backend.calls().issue.is_empty());
        assert_eq!(backend.calls().create_order, vec![PlanCode::Enterprise]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_times_out_at_cap() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order("ord_1"))]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        into_polling(&mut controller).await;
        let mut events = controller.subscribe();
        let started = Instant::now();
        let err = controller.poll_payment().await.unwrap_err();

        assert!(matches!(err, ActivationError::Timeout { attempts: 60, .. }));
        assert!(!matches!(err, ActivationError::PaymentOutcome { .. }));
        assert_eq!(controller.state(), ActivationState::PollingTimedOut);
        assert_eq!(backend.calls().poll.len(), 60);
        assert!(started.elapsed() >= Duration::from_secs(180));

        let timeout = notices(&mut events)
            .into_iter()
            .find(|n| n.title == "Payment Status Timeout")
            .unwrap();
        assert_eq!(timeout.level, NoticeLevel::Warning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_resumes_after_caller_drops_it() {
        let backend = Arc::new(
            MockBackend::new()
                .with_orders([Ok(paid_order("ord_1"))])
                .with_statuses([status(PaymentState::Success)])
                .with_poll_latency(Duration::from_secs(5)),
        );
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        into_polling(&mut controller).await;
        let dropped = tokio::time::timeout(Duration::from_secs(4), controller.poll_payment()).await;
        assert!(dropped.is_err());
        assert_eq!(controller.state(), ActivationState::PollingPayment);

        let settlement = controller.poll_payment().await.unwrap();
        assert!(matches!(settlement, Settlement::Activated(_)));
        assert_eq!(backend.calls().poll.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_count_toward_cap() {
        let backend = Arc::new(
            MockBackend::new()
                .with_orders([Ok(paid_order("ord_1"))])
                .with_statuses([
                    Err(ActivationError::Transport("timeout".into())),
                    Err(ActivationError::Transport("timeout".into())),
                    status(PaymentState::Success),
                ]),
        );
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        into_polling(&mut controller).await;
        assert!(matches!(
            controller.poll_payment().await.unwrap(),
            Settlement::Activated(_)
        ));
        assert_eq!(backend.calls().poll.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_halts_polling() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order("ord_1"))]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        into_polling(&mut controller).await;
        let canceller = controller.poll_canceller();
        let (settlement, _) = tokio::join!(controller.poll_payment(), async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            canceller.cancel();
        });

        assert!(matches!(settlement.unwrap(), Settlement::Cancelled));
        assert_eq!(controller.state(), ActivationState::AwaitingPayment);
        assert!(controller.workflow().order().is_none());
        assert!(controller.credential().is_none());
        assert_eq!(backend.calls().poll.len(), 2);
        assert!(backend.calls().cancel.is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.calls().poll.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_in_flight_at_cancel_is_discarded() {
        let backend = Arc::new(
            MockBackend::new()
                .with_orders([Ok(paid_order("ord_1"))])
                .with_statuses([status(PaymentState::Success)])
                .with_poll_latency(Duration::from_secs(2)),
        );
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        into_polling(&mut controller).await;
        let canceller = controller.poll_canceller();
        let (settlement, _) = tokio::join!(controller.poll_payment(), async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            canceller.cancel();
        });

        assert!(matches!(settlement.unwrap(), Settlement::Cancelled));
        assert_eq!(backend.calls().poll.len(), 1);
        assert_eq!(controller.state(), ActivationState::AwaitingPayment);
        assert!(controller.workflow().latest_status().is_none());
        assert!(controller.credential().is_none());
        assert!(backend.calls().issue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_calls_backend_when_configured() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order("ord_1"))]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let config = ActivationConfig {
            cancel_order_on_abandon: true,
            ..Default::default()
        };
        let mut controller = ActivationController::new(
            Plan::professional(),
            ApiKey::new("user_key_123"),
            backend.clone(),
            gateway,
            config,
        )
        .unwrap();

        into_polling(&mut controller).await;
        controller.cancel_polling().await.unwrap();

        assert_eq!(backend.calls().cancel, vec!["ord_1"]);
        assert!(backend.calls().poll.is_empty());
    }

    #[tokio::test]
    async fn test_skip_payment_issues_without_polling() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(Order {
            skip_payment: true,
            message: Some("14 day trial started".into()),
            ..Default::default()
        })]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        controller.submit_profile(&sample_profile()).await.unwrap();
        let step = controller.initiate_payment().await.unwrap();

        assert!(matches!(step, Step::Activated(_)));
        assert!(!controller
            .workflow()
            .history()
            .contains(&ActivationState::PollingPayment));
        assert!(gateway.launches().is_empty());
        assert!(backend.calls().poll.is_empty());
        assert_eq!(backend.calls().issue[0].0, PlanCode::Free);
    }

    #[tokio::test]
    async fn test_order_without_id_is_rejected() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order(""))]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        controller.submit_profile(&sample_profile()).await.unwrap();
        let err = controller.initiate_payment().await.unwrap_err();

        assert!(matches!(err, ActivationError::Order(_)));
        assert_eq!(controller.state(), ActivationState::AwaitingPayment);
        assert!(gateway.launches().is_empty());
        assert!(controller.await_checkout().await.is_err());
        assert!(controller.poll_payment().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paid_issuance_failure_keeps_activation() {
        let backend = Arc::new(
            MockBackend::new()
                .with_orders([Ok(paid_order("ord_1"))])
                .with_statuses([status(PaymentState::Success)])
                .with_issue_results([Err(ActivationError::Transport("reset".into()))]),
        );
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        into_polling(&mut controller).await;
        let mut events = controller.subscribe();
        match controller.poll_payment().await.unwrap() {
            Settlement::CredentialPending(err) => assert!(err.payment_succeeded()),
            other => panic!("expected pending credential, got {:?}", other),
        }
        let warning = notices(&mut events)
            .into_iter()
            .find(|n| n.title == "Payment Successful, but API Key Error")
            .unwrap();
        assert_eq!(warning.level, NoticeLevel::Warning);
        assert_eq!(controller.state(), ActivationState::Activated);
        assert!(controller.credential().is_none());

        let credential = controller.retry_credential_issuance().await.unwrap();
        assert_eq!(controller.credential(), Some(&credential));
        assert!(controller.retry_credential_issuance().await.is_err());
    }

    #[tokio::test]
    async fn test_dismissed_checkout_keeps_awaiting_payment() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order("ord_1"))]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Dismiss));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        controller.submit_profile(&sample_profile()).await.unwrap();
        controller.initiate_payment().await.unwrap();

        assert!(matches!(
            controller.run_checkout().await.unwrap(),
            Settlement::Dismissed
        ));
        assert_eq!(controller.state(), ActivationState::AwaitingPayment);
        assert_eq!(gateway.launches().len(), 1);
        assert_eq!(gateway.launches()[0].order_id, "ord_1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_order_after_failure() {
        let backend = Arc::new(
            MockBackend::new()
                .with_orders([Ok(paid_order("ord_1")), Ok(paid_order("ord_2"))])
                .with_statuses([
                    status(PaymentState::Cancelled),
                    Ok(PaymentStatus::new("ord_2", PaymentState::Success)),
                ]),
        );
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Complete));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        into_polling(&mut controller).await;
        assert!(controller.poll_payment().await.is_err());

        controller.initiate_payment().await.unwrap();
        assert!(matches!(
            controller.run_checkout().await.unwrap(),
            Settlement::Activated(_)
        ));
        assert_eq!(backend.calls().poll, vec!["ord_1", "ord_2"]);
        assert_eq!(controller.workflow().generation(), 2);
    }

    #[tokio::test]
    async fn test_checkout_signal_is_one_shot() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order("ord_1"))]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Hold));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        controller.submit_profile(&sample_profile()).await.unwrap();
        controller.initiate_payment().await.unwrap();

        let signal = gateway.take_signal().unwrap();
        assert!(gateway.take_signal().is_none());
        signal.complete();

        assert_eq!(controller.await_checkout().await.unwrap(), CheckoutEvent::Completed);
        assert_eq!(controller.state(), ActivationState::PollingPayment);
        assert!(controller.await_checkout().await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_signal_counts_as_dismissed() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order("ord_1"))]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Hold));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        controller.submit_profile(&sample_profile()).await.unwrap();
        controller.initiate_payment().await.unwrap();
        drop(gateway.take_signal());

        assert_eq!(controller.await_checkout().await.unwrap(), CheckoutEvent::Dismissed);
        assert_eq!(controller.state(), ActivationState::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_gateway_launch_failure() {
        let backend = Arc::new(MockBackend::new().with_orders([Ok(paid_order("ord_1"))]));
        let gateway = Arc::new(MockGateway::new(GatewayBehavior::Fail));
        let mut controller = controller(Plan::professional(), &backend, &gateway);

        controller.submit_profile(&sample_profile()).await.unwrap();
        assert!(controller.initiate_payment().await.is_err());
        assert_eq!(controller.state(), ActivationState::AwaitingPayment);
        assert!(controller.await_checkout().await.is_err());
    }
}
