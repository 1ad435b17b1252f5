//! Progress records and the two update modes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BadgeId, UserId};

/// Percentage toward a milestone: `min(100, floor(count / milestone * 100))`.
///
/// A zero milestone counts as already complete.
#[must_use]
pub fn percentage(count: u64, milestone: u32) -> u8 {
    if milestone == 0 {
        return 100;
    }
    let pct = u128::from(count) * 100 / u128::from(milestone);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// How a progress counter is changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ProgressUpdate {
    /// Add to the stored count.
    Increment(u64),
    /// Overwrite the stored count with a freshly computed absolute value.
    Set(u64),
}

/// Progress of one user toward one badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// The user.
    pub user_id: UserId,

    /// The badge.
    pub badge_id: BadgeId,

    /// Current count.
    pub current_count: u64,

    /// Milestone of the badge when this record was created.
    pub milestone: u32,

    /// Percentage computed against the milestone in force at the last update.
    pub percentage: u8,

    /// Last time the count was moved in increment mode.
    pub last_increment_at: Option<DateTime<Utc>>,

    /// When the user was told they are close to this badge. Set at most once.
    #[serde(default)]
    pub nudged_at: Option<DateTime<Utc>>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Result of applying a [`ProgressUpdate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressChange {
    /// The record after the update.
    pub record: ProgressRecord,
    /// Count before the update (0 for a freshly created record).
    pub previous_count: u64,
    /// Milestone the percentage was computed against.
    pub milestone: u32,
}

impl ProgressChange {
    /// Whether the count is at or past the milestone.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.record.current_count >= u64::from(self.milestone)
    }

    /// Whether this update moved the count from below to at-or-above the milestone.
    #[must_use]
    pub fn crossed_milestone(&self) -> bool {
        self.is_complete() && self.previous_count < u64::from(self.milestone)
    }
}

impl ProgressRecord {
    /// A zeroed record.
    #[must_use]
    pub fn new(user_id: UserId, badge_id: BadgeId, milestone: u32, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            badge_id,
            current_count: 0,
            milestone,
            percentage: 0,
            last_increment_at: None,
            nudged_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update using `milestone` as the authoritative target.
    ///
    /// Increments saturate rather than wrap.
    #[must_use]
    pub fn apply(mut self, update: ProgressUpdate, milestone: u32, now: DateTime<Utc>) -> ProgressChange {
        let previous_count = self.current_count;
        match update {
            ProgressUpdate::Increment(delta) => {
                self.current_count = self.current_count.saturating_add(delta);
                self.last_increment_at = Some(now);
            }
            ProgressUpdate::Set(count) => {
                self.current_count = count;
            }
        }
        self.percentage = percentage(self.current_count, milestone);
        self.updated_at = now;

        ProgressChange {
            record: self,
            previous_count,
            milestone,
        }
    }
}
