//! Activation State Machine
//!
//! Pure, I/O-free state for one checkout session. The async controller asks
//! it what to do next and feeds collaborator results back in.
//!
//! ```text
//! CollectingProfile ──▶ ProfileSaved ──┬──────────────────────────▶ Activated
//!                                      │ (paid)                      ▲
//!                                      ▼                             │
//!                               AwaitingPayment ──▶ PollingPayment ──┤
//!                                      ▲                 │           │
//!                                      └── cancel ───────┤           │
//!                                                        ├──▶ PaymentFailed
//!                                                        └──▶ PollingTimedOut
//! ```
//!
//! Every status request carries a [`PollTicket`] stamped with the poll
//! generation and attempt number. Responses for an older generation, an
//! attempt that is not newer than the last applied one, or arriving after
//! polling stopped are discarded.

use serde::{Deserialize, Serialize};

use crate::error::{ActivationError, IssuanceContext, Result};
use crate::model::{CheckoutDescriptor, Credential, Order, PaymentState, PaymentStatus, Plan, PlanCode};

/// Workflow states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    CollectingProfile,
    ProfileSaved,
    AwaitingPayment,
    PollingPayment,
    Activated,
    PaymentFailed,
    PollingTimedOut,
}

impl ActivationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationState::CollectingProfile => "collecting profile",
            ActivationState::ProfileSaved => "profile saved",
            ActivationState::AwaitingPayment => "awaiting payment",
            ActivationState::PollingPayment => "polling payment",
            ActivationState::Activated => "activated",
            ActivationState::PaymentFailed => "payment failed",
            ActivationState::PollingTimedOut => "polling timed out",
        }
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded state change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ActivationState,
    pub to: ActivationState,
}

/// What to do after the profile was saved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileNext {
    IssueCredential(PlanCode),
    AwaitPayment,
}

/// What to do with a freshly created order
#[derive(Clone, Debug, PartialEq)]
pub enum OrderNext {
    /// Trial: skip payment and issue straight away
    IssueCredential(PlanCode),

    /// Open the payment widget
    Checkout(CheckoutDescriptor),
}

/// Identifies one status request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollTicket {
    pub generation: u64,
    pub attempt: u32,
    pub order_id: String,
}

/// Result of feeding a status response into the workflow
#[derive(Debug)]
pub enum PollUpdate {
    /// Stale or late response, ignored
    Discarded,

    /// Non-terminal status, keep polling
    Pending { attempt: u32, status: PaymentStatus },

    /// Request failed; it still counted toward the cap
    Errored { attempt: u32, error: ActivationError },

    /// Payment confirmed, credential should be issued
    Settled(PaymentStatus),

    /// Payment failed or was cancelled
    Failed(PaymentStatus),

    /// Cap reached with no terminal status
    TimedOut { order_id: String, attempts: u32 },
}

#[derive(Debug)]
struct PollSession {
    generation: u64,
    order_id: String,
    issued: u32,
    last_applied: u32,
    in_flight: bool,
}

/// State for one checkout session
#[derive(Debug)]
pub struct ActivationWorkflow {
    plan: Plan,
    state: ActivationState,
    history: Vec<ActivationState>,
    transitions: Vec<Transition>,
    order: Option<Order>,
    latest_status: Option<PaymentStatus>,
    credential: Option<Credential>,
    pending_issuance: Option<(PlanCode, IssuanceContext)>,
    poll: Option<PollSession>,
    generation: u64,
    max_attempts: u32,
}

impl ActivationWorkflow {
    pub fn new(plan: Plan, max_attempts: u32) -> Self {
        Self {
            plan,
            state: ActivationState::CollectingProfile,
            history: vec![ActivationState::CollectingProfile],
            transitions: Vec::new(),
            order: None,
            latest_status: None,
            credential: None,
            pending_issuance: None,
            poll: None,
            generation: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn state(&self) -> ActivationState {
        self.state
    }

    /// Every state visited so far, starting with `CollectingProfile`
    pub fn history(&self) -> &[ActivationState] {
        &self.history
    }

    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    pub fn latest_status(&self) -> Option<&PaymentStatus> {
        self.latest_status.as_ref()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Plan code and context of an issuance that still has to succeed
    pub fn pending_issuance(&self) -> Option<(PlanCode, IssuanceContext)> {
        self.pending_issuance
    }

    /// Current poll generation (0 before the first checkout completes)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Status requests issued in the current poll session
    pub fn attempts(&self) -> u32 {
        self.poll.as_ref().map_or(0, |p| p.issued)
    }

    /// Drain transitions recorded since the last call
    pub fn take_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.transitions)
    }

    fn transition(&mut self, to: ActivationState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        tracing::debug!(from = %from, to = %to, "Activation state change");
        self.state = to;
        self.history.push(to);
        self.transitions.push(Transition { from, to });
    }

    fn ensure(&self, operation: &'static str, allowed: &[ActivationState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ActivationError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Check a profile may be submitted now
    pub fn begin_profile(&self) -> Result<()> {
        self.ensure("submit profile", &[ActivationState::CollectingProfile])
    }

    /// Profile save succeeded
    pub fn profile_saved(&mut self) -> Result<ProfileNext> {
        self.begin_profile()?;
        self.transition(ActivationState::ProfileSaved);

        if self.plan.is_free() {
            self.pending_issuance = Some((PlanCode::Free, IssuanceContext::FreePlan));
            Ok(ProfileNext::IssueCredential(PlanCode::Free))
        } else {
            self.transition(ActivationState::AwaitingPayment);
            Ok(ProfileNext::AwaitPayment)
        }
    }

    /// Start a new order attempt, returning the backend plan code
    pub fn begin_order(&mut self) -> Result<PlanCode> {
        self.ensure(
            "initiate payment",
            &[ActivationState::AwaitingPayment, ActivationState::PaymentFailed],
        )?;
        self.transition(ActivationState::AwaitingPayment);
        self.order = None;
        self.latest_status = None;
        Ok(self.plan.code())
    }

    /// Order creation returned
    pub fn order_created(&mut self, order: Order) -> Result<OrderNext> {
        self.ensure("accept order", &[ActivationState::AwaitingPayment])?;

        if order.skip_payment {
            self.order = Some(order);
            self.pending_issuance = Some((PlanCode::Free, IssuanceContext::Trial));
            return Ok(OrderNext::IssueCredential(PlanCode::Free));
        }

        let descriptor = order.checkout_descriptor(&self.plan)?;
        self.order = Some(order);
        Ok(OrderNext::Checkout(descriptor))
    }

    /// The gateway reported checkout completion; start a new poll generation
    pub fn checkout_completed(&mut self) -> Result<u64> {
        self.ensure("start polling", &[ActivationState::AwaitingPayment])?;

        let order_id = match self.order.as_ref() {
            Some(order) if !order.skip_payment && !order.order_id.trim().is_empty() => {
                order.order_id.clone()
            }
            _ => return Err(ActivationError::Order("no payable order to poll".into())),
        };

        self.generation += 1;
        self.poll = Some(PollSession {
            generation: self.generation,
            order_id,
            issued: 0,
            last_applied: 0,
            in_flight: false,
        });
        self.transition(ActivationState::PollingPayment);
        Ok(self.generation)
    }

    /// Next status request, if one may be issued now.
    ///
    /// `None` when not polling, when a request is still in flight, or when
    /// the attempt cap is used up.
    pub fn next_poll(&mut self) -> Option<PollTicket> {
        if self.state != ActivationState::PollingPayment {
            return None;
        }
        let max_attempts = self.max_attempts;
        let session = self.poll.as_mut()?;
        if session.in_flight || session.issued >= max_attempts {
            return None;
        }
        session.issued += 1;
        session.in_flight = true;
        Some(PollTicket {
            generation: session.generation,
            attempt: session.issued,
            order_id: session.order_id.clone(),
        })
    }

    /// Apply the outcome of a status request
    pub fn apply_poll(&mut self, ticket: &PollTicket, result: Result<PaymentStatus>) -> PollUpdate {
        if self.state != ActivationState::PollingPayment {
            tracing::debug!(
                generation = ticket.generation,
                attempt = ticket.attempt,
                state = %self.state,
                "Discarding status response after polling stopped"
            );
            return PollUpdate::Discarded;
        }

        let max_attempts = self.max_attempts;
        let Some(session) = self.poll.as_mut() else {
            return PollUpdate::Discarded;
        };
        if session.generation != ticket.generation || ticket.attempt <= session.last_applied {
            tracing::debug!(
                generation = ticket.generation,
                current_generation = session.generation,
                attempt = ticket.attempt,
                last_applied = session.last_applied,
                "Discarding stale status response"
            );
            return PollUpdate::Discarded;
        }
        session.last_applied = ticket.attempt;
        session.in_flight = false;
        let cap_reached = ticket.attempt >= max_attempts;

        match result {
            Ok(status) => {
                self.latest_status = Some(status.clone());
                match status.status {
                    PaymentState::Success => {
                        self.poll = None;
                        self.pending_issuance = Some((self.plan.code(), IssuanceContext::PaidPlan));
                        self.transition(ActivationState::Activated);
                        PollUpdate::Settled(status)
                    }
                    PaymentState::Failed | PaymentState::Cancelled => {
                        self.poll = None;
                        self.transition(ActivationState::PaymentFailed);
                        PollUpdate::Failed(status)
                    }
                    PaymentState::Pending | PaymentState::Unknown if cap_reached => {
                        self.time_out(ticket)
                    }
                    PaymentState::Pending | PaymentState::Unknown => PollUpdate::Pending {
                        attempt: ticket.attempt,
                        status,
                    },
                }
            }
            Err(_) if cap_reached => self.time_out(ticket),
            Err(error) => PollUpdate::Errored {
                attempt: ticket.attempt,
                error,
            },
        }
    }

    fn time_out(&mut self, ticket: &PollTicket) -> PollUpdate {
        self.poll = None;
        self.transition(ActivationState::PollingTimedOut);
        PollUpdate::TimedOut {
            order_id: ticket.order_id.clone(),
            attempts: ticket.attempt,
        }
    }

    /// Forget a request whose caller went away before applying it.
    ///
    /// The abandoned attempt still counts toward the cap and any late answer
    /// for it is discarded. Returns `TimedOut` when that attempt was the last
    /// one allowed.
    pub fn release_in_flight(&mut self) -> Option<PollUpdate> {
        if self.state != ActivationState::PollingPayment {
            return None;
        }
        let max_attempts = self.max_attempts;
        let session = self.poll.as_mut()?;
        if !session.in_flight {
            return None;
        }
        session.in_flight = false;
        session.last_applied = session.issued;
        tracing::debug!(
            generation = session.generation,
            attempt = session.issued,
            "Releasing abandoned status request"
        );

        if session.issued < max_attempts {
            return None;
        }
        let ticket = PollTicket {
            generation: session.generation,
            attempt: session.issued,
            order_id: session.order_id.clone(),
        };
        Some(self.time_out(&ticket))
    }

    /// Stop polling locally and drop the order, returning its id
    pub fn cancel_polling(&mut self) -> Result<Option<String>> {
        self.ensure("cancel polling", &[ActivationState::PollingPayment])?;
        self.poll = None;
        self.latest_status = None;
        let order_id = self.order.take().map(|o| o.order_id);
        self.transition(ActivationState::AwaitingPayment);
        Ok(order_id)
    }

    /// Store the issued credential (write-once)
    pub fn credential_issued(&mut self, credential: Credential) -> Result<()> {
        if self.credential.is_some() || self.pending_issuance.is_none() {
            return Err(ActivationError::InvalidState {
                operation: "store credential",
                state: self.state,
            });
        }
        self.credential = Some(credential);
        self.pending_issuance = None;
        self.transition(ActivationState::Activated);
        Ok(())
    }
}
