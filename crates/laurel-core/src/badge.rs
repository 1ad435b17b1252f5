//! Badge definitions and reward descriptors.
//!
//! Definitions are written by an administrative surface and are read-only to the
//! engine. The reward is stored in its raw `{kind, value}` form so that a
//! definition carrying a kind this build does not know about can still be loaded
//! and awarded; [`RewardDescriptor::parse`] turns it into the closed [`Reward`] type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LaurelError, Result};
use crate::BadgeId;

/// Rarity tier of a badge. Ordered from most to least common.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    /// Easy to earn.
    Common,
    /// Slightly harder.
    Uncommon,
    /// Takes sustained effort.
    Rare,
    /// Few users get here.
    Epic,
    /// The top tier.
    Legendary,
}

impl Rarity {
    /// Numeric weight used when ordering a user's badges for display (1..=5).
    #[must_use]
    pub const fn weight(self) -> u8 {
        match self {
            Self::Common => 1,
            Self::Uncommon => 2,
            Self::Rare => 3,
            Self::Epic => 4,
            Self::Legendary => 5,
        }
    }
}

/// Grouping of badges by the activity that drives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeCategory {
    /// Driven by the total number of matches.
    Matches,
    /// Driven by converted referrals.
    Referrals,
    /// Driven by profile completeness.
    Profile,
    /// Driven by the daily login streak.
    Activity,
    /// Driven by likes sent.
    Engagement,
}

impl BadgeCategory {
    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Matches => "matches",
            Self::Referrals => "referrals",
            Self::Profile => "profile",
            Self::Activity => "activity",
            Self::Engagement => "engagement",
        }
    }
}

/// An immutable badge definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeDefinition {
    /// Unique identifier.
    pub id: BadgeId,

    /// Unique machine name (e.g. `match_master`).
    pub name: String,

    /// Human-readable name.
    pub display_name: String,

    /// Short description shown next to the badge.
    pub description: String,

    /// Optional icon location.
    pub icon_url: Option<String>,

    /// Rarity tier.
    pub rarity: Rarity,

    /// Count at which progress reaches 100% and the badge becomes awardable.
    pub milestone_count: u32,

    /// Raw reward descriptor.
    pub reward: RewardDescriptor,

    /// Which activity drives progress.
    pub category: BadgeCategory,

    /// Inactive badges are hidden from the registry.
    pub is_active: bool,

    /// When the definition was created.
    pub created_at: DateTime<Utc>,

    /// When the definition was last edited.
    pub updated_at: DateTime<Utc>,
}

impl BadgeDefinition {
    /// Create a new active definition with a fresh id.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        rarity: Rarity,
        milestone_count: u32,
        reward: &Reward,
        category: BadgeCategory,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BadgeId::generate(),
            name: name.into(),
            display_name: display_name.into(),
            description: String::new(),
            icon_url: None,
            rarity,
            milestone_count,
            reward: reward.descriptor(),
            category,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check that the definition can be tracked.
    ///
    /// # Errors
    ///
    /// Returns `LaurelError::InvalidBadge` for an empty name or a zero milestone.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LaurelError::InvalidBadge("badge name is empty".into()));
        }
        if self.milestone_count == 0 {
            return Err(LaurelError::InvalidBadge(format!(
                "badge {} has a zero milestone",
                self.name
            )));
        }
        Ok(())
    }
}

/// The raw `{kind, value}` pair as stored with a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardDescriptor {
    /// Reward kind, e.g. `premium_days`.
    pub kind: String,
    /// Kind-specific value, e.g. `"14"` or `"verified"`.
    pub value: String,
}

impl RewardDescriptor {
    /// Build a descriptor from raw parts.
    #[must_use]
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Parse into the closed reward type.
    ///
    /// # Errors
    ///
    /// Returns `RewardError::UnknownKind` for kinds this build does not handle and
    /// `RewardError::InvalidValue` when a numeric value does not parse.
    pub fn parse(&self) -> std::result::Result<Reward, RewardError> {
        let kind: RewardKind = self.kind.parse()?;
        let numeric = || {
            self.value
                .trim()
                .parse::<u32>()
                .map_err(|_| RewardError::InvalidValue {
                    kind: self.kind.clone(),
                    value: self.value.clone(),
                })
        };
        let text = || {
            let value = self.value.trim();
            if value.is_empty() {
                Err(RewardError::InvalidValue {
                    kind: self.kind.clone(),
                    value: self.value.clone(),
                })
            } else {
                Ok(value.to_string())
            }
        };

        Ok(match kind {
            RewardKind::PremiumDays => Reward::PremiumDays(numeric()?),
            RewardKind::ExtraActions => Reward::ExtraActions(numeric()?),
            RewardKind::StatusLabel => Reward::StatusLabel(text()?),
            RewardKind::UnlockFeature => Reward::UnlockFeature(text()?),
        })
    }
}

/// Known reward kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RewardKind {
    /// Extend premium access.
    PremiumDays,
    /// Add bonus actions.
    ExtraActions,
    /// Set a status label on the profile.
    StatusLabel,
    /// Unlock a feature.
    UnlockFeature,
}

impl RewardKind {
    /// Canonical stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PremiumDays => "premium_days",
            Self::ExtraActions => "extra_actions",
            Self::StatusLabel => "status",
            Self::UnlockFeature => "feature_unlock",
        }
    }
}

impl FromStr for RewardKind {
    type Err = RewardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "premium_days" => Ok(Self::PremiumDays),
            // Older definitions were written with the swipe-specific name.
            "extra_actions" | "extra_swipes" => Ok(Self::ExtraActions),
            "status" => Ok(Self::StatusLabel),
            "feature_unlock" => Ok(Self::UnlockFeature),
            other => Err(RewardError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for RewardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed reward. Applying it is a pure function of the account, see
/// [`Reward::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reward {
    /// Extend premium access by this many days.
    PremiumDays(u32),
    /// Add this many bonus actions.
    ExtraActions(u32),
    /// Set the profile status label.
    StatusLabel(String),
    /// Add a feature to the unlocked set.
    UnlockFeature(String),
}

impl Reward {
    /// The kind of this reward.
    #[must_use]
    pub const fn kind(&self) -> RewardKind {
        match self {
            Self::PremiumDays(_) => RewardKind::PremiumDays,
            Self::ExtraActions(_) => RewardKind::ExtraActions,
            Self::StatusLabel(_) => RewardKind::StatusLabel,
            Self::UnlockFeature(_) => RewardKind::UnlockFeature,
        }
    }

    /// Convert back to the stored form.
    #[must_use]
    pub fn descriptor(&self) -> RewardDescriptor {
        let value = match self {
            Self::PremiumDays(n) | Self::ExtraActions(n) => n.to_string(),
            Self::StatusLabel(s) | Self::UnlockFeature(s) => s.clone(),
        };
        RewardDescriptor::new(self.kind().as_str(), value)
    }
}

/// Why a stored reward descriptor could not be turned into a [`Reward`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewardError {
    /// The kind is not one this build handles.
    #[error("unknown reward kind: {0}")]
    UnknownKind(String),

    /// The value does not fit the kind.
    #[error("invalid value {value:?} for reward kind {kind}")]
    InvalidValue {
        /// The stored kind.
        kind: String,
        /// The stored value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rarity_is_ordered() {
        assert!(Rarity::Common < Rarity::Uncommon);
        assert!(Rarity::Epic < Rarity::Legendary);
        assert_eq!(Rarity::Legendary.weight(), 5);
    }

    #[test]
    fn parses_known_kinds() {
        assert_eq!(
            RewardDescriptor::new("premium_days", "14").parse(),
            Ok(Reward::PremiumDays(14))
        );
        assert_eq!(
            RewardDescriptor::new("extra_swipes", "100").parse(),
            Ok(Reward::ExtraActions(100))
        );
        assert_eq!(
            RewardDescriptor::new("status", "verified").parse(),
            Ok(Reward::StatusLabel("verified".into()))
        );
    }

    #[test]
    fn unknown_kind_is_reported() {
        let err = RewardDescriptor::new("free_pizza", "1").parse().unwrap_err();
        assert_eq!(err, RewardError::UnknownKind("free_pizza".into()));
    }

    #[test]
    fn non_numeric_days_are_invalid() {
        let err = RewardDescriptor::new("premium_days", "a week")
            .parse()
            .unwrap_err();
        assert!(matches!(err, RewardError::InvalidValue { .. }));
    }

    #[test]
    fn descriptor_uses_canonical_kind() {
        let reward = Reward::ExtraActions(50);
        assert_eq!(reward.descriptor(), RewardDescriptor::new("extra_actions", "50"));
    }

    #[test]
    fn zero_milestone_is_rejected() {
        let badge = BadgeDefinition::new(
            "broken",
            "Broken",
            Rarity::Common,
            0,
            &Reward::ExtraActions(1),
            BadgeCategory::Engagement,
        );
        assert!(badge.validate().is_err());
    }
}
