//! The default badge catalog seeded into an empty store.

use crate::{BadgeCategory, BadgeDefinition, Rarity, Reward};

/// Name of the badge driven by 25 matches.
pub const MATCH_MASTER: &str = "match_master";

/// Name of the badge driven by a 7 day login streak.
pub const STREAK_KING: &str = "streak_king";

/// Name of the badge driven by likes sent.
pub const SUPER_LIKER: &str = "super_liker";

/// Definitions shipped with the engine.
#[must_use]
pub fn default_catalog() -> Vec<BadgeDefinition> {
    vec![
        BadgeDefinition::new(
            "first_match",
            "First Match",
            Rarity::Common,
            1,
            &Reward::PremiumDays(7),
            BadgeCategory::Matches,
        )
        .with_description("Got your very first match"),
        BadgeDefinition::new(
            MATCH_MASTER,
            "Match Master",
            Rarity::Rare,
            25,
            &Reward::PremiumDays(14),
            BadgeCategory::Matches,
        )
        .with_description("Reached 25 matches"),
        BadgeDefinition::new(
            "match_king",
            "Matchmaker King",
            Rarity::Epic,
            50,
            &Reward::PremiumDays(30),
            BadgeCategory::Matches,
        )
        .with_description("Reached 50 matches"),
        BadgeDefinition::new(
            "referral_expert",
            "Referral Expert",
            Rarity::Uncommon,
            5,
            &Reward::ExtraActions(100),
            BadgeCategory::Referrals,
        )
        .with_description("Five friends joined through your invite"),
        BadgeDefinition::new(
            "referral_overlord",
            "Referral Overlord",
            Rarity::Legendary,
            20,
            &Reward::PremiumDays(60),
            BadgeCategory::Referrals,
        )
        .with_description("Twenty friends joined through your invite"),
        BadgeDefinition::new(
            "profile_perfectionist",
            "Profile Perfectionist",
            Rarity::Rare,
            5,
            &Reward::StatusLabel("verified".into()),
            BadgeCategory::Profile,
        )
        .with_description("Name, bio, location, interests and five photos"),
        BadgeDefinition::new(
            STREAK_KING,
            "Streak King",
            Rarity::Epic,
            7,
            &Reward::UnlockFeature("streak_freeze".into()),
            BadgeCategory::Activity,
        )
        .with_description("Logged in seven days in a row"),
        BadgeDefinition::new(
            SUPER_LIKER,
            "Super Liker",
            Rarity::Uncommon,
            100,
            &Reward::ExtraActions(50),
            BadgeCategory::Engagement,
        )
        .with_description("Sent 100 likes"),
    ]
}
