//! Activity events consumed from the surrounding application.
//!
//! Every event carries an id used for deduplication: a re-delivered event is
//! acknowledged without being counted twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Profile fields that count toward completeness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProfileFields {
    /// A first name is set.
    pub has_name: bool,
    /// A bio is set.
    pub has_bio: bool,
    /// A location is set.
    pub has_location: bool,
    /// At least one interest is set.
    pub has_interests: bool,
    /// At least five photos are uploaded.
    pub has_photos: bool,
}

impl ProfileFields {
    /// Number of completed fields (0..=5).
    #[must_use]
    pub fn completion_score(&self) -> u64 {
        [
            self.has_name,
            self.has_bio,
            self.has_location,
            self.has_interests,
            self.has_photos,
        ]
        .into_iter()
        .map(u64::from)
        .sum()
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
    /// Two users matched. Both are credited.
    MatchCreated {
        /// One side of the match.
        user_id: UserId,
        /// The other side.
        partner_id: UserId,
    },
    /// A referred user converted. The referrer is credited.
    ReferralConverted {
        /// The referring user.
        referrer_id: UserId,
        /// The user who signed up.
        referee_id: UserId,
    },
    /// A profile field was completed. Carries the full completeness snapshot.
    ProfileFieldCompleted {
        /// The profile owner.
        user_id: UserId,
        /// Completeness after the change.
        fields: ProfileFields,
    },
    /// A user sent a like.
    LikeSent {
        /// The sender.
        user_id: UserId,
        /// The recipient.
        target_id: UserId,
    },
    /// A user was seen logging in.
    DailyLoginSeen {
        /// The user.
        user_id: UserId,
    },
}

/// Compact tag for an [`ActivityKind`], used in storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActivityTag {
    /// `MatchCreated`.
    Match,
    /// `ReferralConverted`.
    Referral,
    /// `ProfileFieldCompleted`.
    Profile,
    /// `LikeSent`.
    Like,
    /// `DailyLoginSeen`.
    Login,
}

impl ActivityTag {
    /// All tags.
    pub const ALL: [Self; 5] = [
        Self::Match,
        Self::Referral,
        Self::Profile,
        Self::Like,
        Self::Login,
    ];

    /// Single-byte key prefix.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Match => 1,
            Self::Referral => 2,
            Self::Profile => 3,
            Self::Like => 4,
            Self::Login => 5,
        }
    }

    /// Inverse of [`ActivityTag::as_byte`].
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_byte() == byte)
    }
}

impl ActivityKind {
    /// The storage tag.
    #[must_use]
    pub const fn tag(&self) -> ActivityTag {
        match self {
            Self::MatchCreated { .. } => ActivityTag::Match,
            Self::ReferralConverted { .. } => ActivityTag::Referral,
            Self::ProfileFieldCompleted { .. } => ActivityTag::Profile,
            Self::LikeSent { .. } => ActivityTag::Like,
            Self::DailyLoginSeen { .. } => ActivityTag::Login,
        }
    }

    /// Users whose counts this activity contributes to.
    #[must_use]
    pub fn credited_users(&self) -> Vec<UserId> {
        match self {
            Self::MatchCreated {
                user_id,
                partner_id,
            } if user_id != partner_id => vec![*user_id, *partner_id],
            Self::MatchCreated { user_id, .. }
            | Self::ProfileFieldCompleted { user_id, .. }
            | Self::LikeSent { user_id, .. }
            | Self::DailyLoginSeen { user_id } => vec![*user_id],
            Self::ReferralConverted { referrer_id, .. } => vec![*referrer_id],
        }
    }
}

/// An activity event as delivered by the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Unique event id for deduplication.
    pub event_id: String,

    /// When the activity happened.
    pub occurred_at: DateTime<Utc>,

    /// What happened.
    #[serde(flatten)]
    pub kind: ActivityKind,
}

impl ActivityEvent {
    /// Build an event.
    #[must_use]
    pub fn new(event_id: impl Into<String>, occurred_at: DateTime<Utc>, kind: ActivityKind) -> Self {
        Self {
            event_id: event_id.into(),
            occurred_at,
            kind,
        }
    }
}

/// First and last time a user showed up in the activity stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// The user.
    pub user_id: UserId,
    /// Earliest activity seen.
    pub first_seen_at: DateTime<Utc>,
    /// Latest activity seen.
    pub last_seen_at: DateTime<Utc>,
}

impl Member {
    /// A member first seen at `at`.
    #[must_use]
    pub fn new(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            first_seen_at: at,
            last_seen_at: at,
        }
    }

    /// Widen the seen interval to include `at`. Events may arrive out of order.
    pub fn observe(&mut self, at: DateTime<Utc>) {
        self.first_seen_at = self.first_seen_at.min(at);
        self.last_seen_at = self.last_seen_at.max(at);
    }
}
