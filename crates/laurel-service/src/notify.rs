//! Outbound notifications.
//!
//! Notifications are fire-and-forget: they are sent from a spawned task after the
//! award has committed, and a delivery failure is logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use laurel_core::{AwardRecord, BadgeDefinition, BadgeId, Rarity, UserId};

use crate::blocking::StoreRunner;

/// A message for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A badge was awarded.
    BadgeEarned {
        /// Recipient.
        user_id: UserId,
        /// The badge.
        badge_id: BadgeId,
        /// Badge name.
        badge_name: String,
        /// Human-readable name.
        display_name: String,
        /// Rarity tier.
        rarity: Rarity,
    },
    /// A user is close to a badge.
    CloseToEarning {
        /// Recipient.
        user_id: UserId,
        /// Badge name.
        badge_name: String,
        /// Human-readable name.
        display_name: String,
        /// Current progress.
        percentage: u8,
    },
}

impl Notification {
    /// The recipient.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        match self {
            Self::BadgeEarned { user_id, .. } | Self::CloseToEarning { user_id, .. } => user_id,
        }
    }
}

/// Delivery failure.
#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Where notifications go.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sink that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload =
            serde_json::to_string(notification).map_err(|e| NotifyError(e.to_string()))?;
        tracing::info!(user_id = %notification.user_id(), %payload, "Notification");
        Ok(())
    }
}

/// Spawns notification deliveries.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    runner: StoreRunner,
}

impl Notifier {
    /// Create a notifier delivering to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>, runner: StoreRunner) -> Self {
        Self { sink, runner }
    }

    /// Announce a committed award. Marks it notified once delivered.
    pub fn badge_earned(&self, award: &AwardRecord, badge: &BadgeDefinition) {
        let notification = Notification::BadgeEarned {
            user_id: award.user_id,
            badge_id: badge.id,
            badge_name: badge.name.clone(),
            display_name: badge.display_name.clone(),
            rarity: badge.rarity,
        };
        let sink = Arc::clone(&self.sink);
        let runner = self.runner.clone();
        let (user_id, badge_id) = (award.user_id, award.badge_id);

        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&notification).await {
                tracing::warn!(
                    user_id = %user_id,
                    badge_id = %badge_id,
                    error = %e,
                    "Failed to deliver badge notification"
                );
                return;
            }
            if let Err(e) = runner
                .run("mark_award_notified", move |s| {
                    s.mark_award_notified(&user_id, &badge_id)
                })
                .await
            {
                tracing::warn!(
                    user_id = %user_id,
                    badge_id = %badge_id,
                    error = %e,
                    "Failed to mark award notified"
                );
            }
        });
    }

    /// Nudge a user who is close to a badge.
    pub fn close_to_earning(&self, user_id: UserId, badge: &BadgeDefinition, percentage: u8) {
        let notification = Notification::CloseToEarning {
            user_id,
            badge_name: badge.name.clone(),
            display_name: badge.display_name.clone(),
            percentage,
        };
        let sink = Arc::clone(&self.sink);

        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&notification).await {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to deliver nudge");
            }
        });
    }
}
