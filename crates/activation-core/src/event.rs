//! Activation Events
//!
//! What the controller tells the UI layer: state changes, fresh payment
//! status snapshots and user-facing notices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ActivationError;
use crate::model::PaymentStatus;
use crate::workflow::Transition;

/// Notice severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-facing notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(level: NoticeLevel, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            description: description.into(),
            at: Utc::now(),
        }
    }

    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, description)
    }

    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, title, description)
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, title, description)
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, description)
    }

    /// Notice for a failed operation
    pub fn from_error(title: impl Into<String>, error: &ActivationError) -> Self {
        Self::error(title, error.user_message())
    }
}

/// Events broadcast by the controller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationEvent {
    Transition(Transition),
    Status(PaymentStatus),
    Notice(Notice),
}
