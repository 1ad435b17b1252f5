//! The award engine.
//!
//! Granting a badge is one atomic store operation: check for an existing award,
//! insert the award and apply its reward to the member account. The
//! notification is spawned only after that commit.

use std::sync::Arc;

use serde::Serialize;

use laurel_core::{AwardRecord, AwardRequirement, BadgeDefinition, BadgeId, Reward, UserId};
use laurel_store::{AwardCommit, AwardGrant};

use crate::blocking::StoreRunner;
use crate::clock::Clock;
use crate::error::Result;
use crate::notify::Notifier;
use crate::registry::BadgeRegistry;

/// What happened to the reward of an award request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RewardOutcome {
    /// The reward was applied to the member account.
    Applied {
        /// The reward.
        reward: Reward,
    },
    /// The award committed but its reward could not be applied.
    Skipped {
        /// Why the reward was not applied.
        reason: String,
    },
    /// No reward was applied: nothing was granted, or the caller asked to skip it.
    NotApplied,
}

/// Result of an award request.
#[derive(Debug, Clone, Serialize)]
pub struct AwardOutcome {
    /// A new award was recorded by this call.
    pub granted: bool,
    /// The user already held the badge; nothing changed.
    pub already_earned: bool,
    /// The badge.
    pub badge: BadgeDefinition,
    /// The stored award, if one exists.
    pub award: Option<AwardRecord>,
    /// Reward status.
    pub reward: RewardOutcome,
}

/// Options for the administrative award path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwardOptions {
    /// Record the award without applying its reward.
    pub skip_reward: bool,
}

/// Grants badges.
pub struct AwardEngine {
    runner: StoreRunner,
    registry: Arc<BadgeRegistry>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl AwardEngine {
    /// Create an award engine.
    #[must_use]
    pub fn new(
        runner: StoreRunner,
        registry: Arc<BadgeRegistry>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runner,
            registry,
            notifier,
            clock,
        }
    }

    /// Award a badge unconditionally (administrative path).
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for an unknown badge, or a store error.
    pub async fn award(&self, user_id: UserId, badge_id: BadgeId) -> Result<AwardOutcome> {
        self.award_with(user_id, badge_id, AwardOptions::default())
            .await
    }

    /// Award a badge unconditionally with options.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for an unknown badge, or a store error.
    pub async fn award_with(
        &self,
        user_id: UserId,
        badge_id: BadgeId,
        options: AwardOptions,
    ) -> Result<AwardOutcome> {
        let badge = self.registry.get_by_id(&badge_id).await?;
        self.grant(user_id, badge, AwardRequirement::Unconditional, options)
            .await
    }

    /// Award a badge whose milestone the user has reached.
    ///
    /// The milestone is checked again inside the store transaction, so a stale
    /// caller cannot award early.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn award_milestone(
        &self,
        user_id: UserId,
        badge: BadgeDefinition,
    ) -> Result<AwardOutcome> {
        let requirement = AwardRequirement::Milestone(badge.milestone_count);
        self.grant(user_id, badge, requirement, AwardOptions::default())
            .await
    }

    async fn grant(
        &self,
        user_id: UserId,
        badge: BadgeDefinition,
        requirement: AwardRequirement,
        options: AwardOptions,
    ) -> Result<AwardOutcome> {
        let (reward, skipped) = if options.skip_reward {
            (None, None)
        } else {
            match badge.reward.parse() {
                Ok(reward) => (Some(reward), None),
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        badge = %badge.name,
                        kind = %badge.reward.kind,
                        value = %badge.reward.value,
                        error = %e,
                        "Badge reward cannot be applied"
                    );
                    (None, Some(e.to_string()))
                }
            }
        };

        let grant = AwardGrant {
            user_id,
            badge_id: badge.id,
            requirement,
            reward: reward.clone(),
            now: self.clock.now(),
        };
        let commit = self
            .runner
            .run("award_badge", move |s| s.award_badge(&grant))
            .await?;

        let outcome = match commit {
            AwardCommit::Granted { award, account } => {
                let reward = match (reward, account, skipped) {
                    (Some(reward), Some(_), _) => RewardOutcome::Applied { reward },
                    (_, _, Some(reason)) => RewardOutcome::Skipped { reason },
                    _ => RewardOutcome::NotApplied,
                };
                tracing::info!(
                    user_id = %user_id,
                    badge = %badge.name,
                    source = ?award.source,
                    reward = ?reward,
                    "Badge awarded"
                );
                self.notifier.badge_earned(&award, &badge);
                AwardOutcome {
                    granted: true,
                    already_earned: false,
                    badge,
                    award: Some(award),
                    reward,
                }
            }
            AwardCommit::AlreadyEarned(award) => {
                tracing::debug!(user_id = %user_id, badge = %badge.name, "Badge already earned");
                AwardOutcome {
                    granted: false,
                    already_earned: true,
                    badge,
                    award: Some(award),
                    reward: RewardOutcome::NotApplied,
                }
            }
            AwardCommit::NotEligible { count } => {
                tracing::debug!(
                    user_id = %user_id,
                    badge = %badge.name,
                    count,
                    milestone = badge.milestone_count,
                    "Milestone not reached"
                );
                AwardOutcome {
                    granted: false,
                    already_earned: false,
                    badge,
                    award: None,
                    reward: RewardOutcome::NotApplied,
                }
            }
        };

        Ok(outcome)
    }
}
