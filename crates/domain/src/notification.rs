//! Notification seam for credit decision results.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::value_objects::{CustomerId, Money};

/// Message sent to a customer once a credit decision is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub customer_id: CustomerId,
    pub approved: bool,
    pub approved_limit: Money,
    pub reason: Option<String>,
}

/// Errors reported by a notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    /// The channel could not be reached.
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),

    /// The channel refused the message.
    #[error("Notification rejected: {0}")]
    Rejected(String),
}

impl NotificationError {
    /// Returns true if resending may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NotificationError::Unavailable(_))
    }
}

/// Delivers notifications to customers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    failures: VecDeque<NotificationError>,
}

/// In-memory notifier that records everything it sends.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` sends fail with `error`.
    pub async fn fail_next(&self, error: NotificationError, times: usize) {
        let mut state = self.state.write().await;
        for _ in 0..times {
            state.failures.push_back(error.clone());
        }
    }

    /// Returns every notification delivered so far.
    pub async fn sent(&self) -> Vec<Notification> {
        self.state.read().await.sent.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        let mut state = self.state.write().await;
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        state.sent.push(notification);
        Ok(())
    }
}
