//! Mock Backend
//!
//! Scripted backend for tests and offline demos. Each call pops the next
//! scripted result for its operation; once a script runs dry the backend
//! falls back to a benign default (saved profile, pending payment, freshly
//! minted key).

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::BackendApi;
use crate::error::{ActivationError, Result};
use crate::model::{ApiKey, Credential, Order, PaymentState, PaymentStatus, PlanCode};
use crate::profile::ProfileData;

/// Everything the mock was asked to do
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    pub save_profile: u32,
    pub create_order: Vec<PlanCode>,
    /// Order ids polled, in request order
    pub poll: Vec<String>,
    pub issue: Vec<(PlanCode, Vec<String>)>,
    pub cancel: Vec<String>,
    /// Session key seen by each call
    pub keys: Vec<String>,
}

#[derive(Default)]
struct Script {
    save: VecDeque<Result<()>>,
    orders: VecDeque<Result<Order>>,
    statuses: VecDeque<Result<PaymentStatus>>,
    issues: VecDeque<Result<Credential>>,
}

/// Scripted [`BackendApi`]
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<Script>,
    calls: Mutex<CallLog>,
    poll_latency: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_results(self, results: impl IntoIterator<Item = Result<()>>) -> Self {
        lock(&self.script).save.extend(results);
        self
    }

    pub fn with_orders(self, results: impl IntoIterator<Item = Result<Order>>) -> Self {
        lock(&self.script).orders.extend(results);
        self
    }

    pub fn with_statuses(self, results: impl IntoIterator<Item = Result<PaymentStatus>>) -> Self {
        lock(&self.script).statuses.extend(results);
        self
    }

    pub fn with_issue_results(self, results: impl IntoIterator<Item = Result<Credential>>) -> Self {
        lock(&self.script).issues.extend(results);
        self
    }

    /// Delay every status response
    pub fn with_poll_latency(mut self, latency: Duration) -> Self {
        self.poll_latency = latency;
        self
    }

    /// Snapshot of recorded calls
    pub fn calls(&self) -> CallLog {
        lock(&self.calls).clone()
    }

    fn record(&self, key: &ApiKey, f: impl FnOnce(&mut CallLog)) {
        let mut calls = lock(&self.calls);
        calls.keys.push(key.as_str().to_string());
        f(&mut calls);
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn save_profile(&self, key: &ApiKey, _profile: &ProfileData) -> Result<()> {
        self.record(key, |c| c.save_profile += 1);
        lock(&self.script).save.pop_front().unwrap_or(Ok(()))
    }

    async fn create_order(&self, key: &ApiKey, plan: PlanCode) -> Result<Order> {
        self.record(key, |c| c.create_order.push(plan));
        lock(&self.script)
            .orders
            .pop_front()
            .unwrap_or_else(|| Err(ActivationError::Transport("no order scripted".into())))
    }

    async fn poll_order_status(&self, key: &ApiKey, order_id: &str) -> Result<PaymentStatus> {
        self.record(key, |c| c.poll.push(order_id.to_string()));
        if !self.poll_latency.is_zero() {
            tokio::time::sleep(self.poll_latency).await;
        }
        lock(&self.script)
            .statuses
            .pop_front()
            .unwrap_or_else(|| Ok(PaymentStatus::new(order_id, PaymentState::Pending)))
    }

    async fn issue_feature_credential(
        &self,
        key: &ApiKey,
        plan: PlanCode,
        scopes: &[String],
    ) -> Result<Credential> {
        let issued = {
            let mut calls = lock(&self.calls);
            calls.keys.push(key.as_str().to_string());
            calls.issue.push((plan, scopes.to_vec()));
            calls.issue.len()
        };
        lock(&self.script).issues.pop_front().unwrap_or_else(|| {
            Ok(Credential::new(format!("fk_mock_{}_{:04}_0000000000000000", plan, issued)))
        })
    }

    async fn cancel_order(&self, key: &ApiKey, order_id: &str) -> Result<()> {
        self.record(key, |c| c.cancel.push(order_id.to_string()));
        Ok(())
    }
}
