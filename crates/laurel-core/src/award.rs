//! Award records: the terminal, unique event of granting a badge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BadgeId, UserId};

/// How an award came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardSource {
    /// Progress reached the milestone.
    Milestone,
    /// An administrator granted it directly.
    Admin,
}

/// What an award must satisfy inside the award transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardRequirement {
    /// The stored progress count must be at least this milestone.
    Milestone(u32),
    /// No precondition (administrative override).
    Unconditional,
}

impl AwardRequirement {
    /// The source recorded on the award.
    #[must_use]
    pub const fn source(self) -> AwardSource {
        match self {
            Self::Milestone(_) => AwardSource::Milestone,
            Self::Unconditional => AwardSource::Admin,
        }
    }
}

/// A badge held by a user. At most one exists per (user, badge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardRecord {
    /// The user.
    pub user_id: UserId,

    /// The badge.
    pub badge_id: BadgeId,

    /// When the badge was earned.
    pub earned_at: DateTime<Utc>,

    /// Not yet seen by the user.
    pub is_new: bool,

    /// A "badge earned" notification was delivered.
    pub notified: bool,

    /// The reward was applied together with the award.
    pub reward_claimed: bool,

    /// How the award came about.
    pub source: AwardSource,
}

impl AwardRecord {
    /// A freshly earned award.
    #[must_use]
    pub fn new(
        user_id: UserId,
        badge_id: BadgeId,
        source: AwardSource,
        reward_claimed: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            badge_id,
            earned_at: now,
            is_new: true,
            notified: false,
            reward_claimed,
            source,
        }
    }
}
