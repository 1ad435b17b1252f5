//! The progress tracker.
//!
//! Counters move in two modes. Increment mode adds a delta and backs the
//! administrative `bump`. Set mode overwrites the count and is used for every
//! value recomputed from the source of truth: event counts in the activity log,
//! profile completeness and streak length.
//!
//! After every update that leaves the count at or above the milestone the award
//! engine is called before returning, but only when the milestone was crossed by
//! this update or no award exists yet. A 5 -> 6 update on a milestone of 5 whose
//! award is already recorded makes no attempt. A failed attempt fails the update;
//! the stored count stands and the next update or sweep retries the award.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use laurel_core::{
    percentage, ActivityKind, ActivityTag, BadgeCategory, BadgeDefinition, BadgeId,
    ProgressRecord, ProgressUpdate, UserId,
};

use laurel_store::Store;

use crate::award::{AwardEngine, AwardOutcome};
use crate::blocking::StoreRunner;
use crate::clock::Clock;
use crate::error::Result;
use crate::registry::BadgeRegistry;

/// Result of a progress update.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressOutcome {
    /// The stored record after the update.
    pub record: ProgressRecord,
    /// The award attempt made because of this update, if any.
    pub award: Option<AwardOutcome>,
}

/// Exact per-category counts derived from the activity log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityCounts {
    /// Matches the user took part in.
    pub matches: u64,
    /// Converted referrals credited to the user.
    pub referrals: u64,
    /// Profile completeness score (0..=5).
    pub profile: u64,
    /// Likes sent.
    pub likes: u64,
    /// Current login streak.
    pub streak: u64,
}

impl ActivityCounts {
    /// The count that drives badges of `category`.
    #[must_use]
    pub const fn for_category(&self, category: BadgeCategory) -> u64 {
        match category {
            BadgeCategory::Matches => self.matches,
            BadgeCategory::Referrals => self.referrals,
            BadgeCategory::Profile => self.profile,
            BadgeCategory::Activity => self.streak,
            BadgeCategory::Engagement => self.likes,
        }
    }

    /// Read every count of a user from the activity log.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn load(store: &dyn Store, user_id: &UserId) -> laurel_store::Result<Self> {
        let profile = store
            .latest_user_activity(user_id, ActivityTag::Profile)?
            .and_then(|event| match event.kind {
                ActivityKind::ProfileFieldCompleted { fields, .. } => {
                    Some(fields.completion_score())
                }
                _ => None,
            })
            .unwrap_or(0);
        Ok(Self {
            matches: store.count_user_activity(user_id, ActivityTag::Match)?,
            referrals: store.count_user_activity(user_id, ActivityTag::Referral)?,
            profile,
            likes: store.count_user_activity(user_id, ActivityTag::Like)?,
            streak: store
                .get_streak(user_id)?
                .map_or(0, |r| u64::from(r.current_streak)),
        })
    }
}

/// Stripes serializing count-then-set per user.
const RECOUNT_STRIPES: u64 = 64;

/// Tracks per-(user, badge) progress.
pub struct ProgressTracker {
    runner: StoreRunner,
    registry: Arc<BadgeRegistry>,
    awards: Arc<AwardEngine>,
    clock: Arc<dyn Clock>,
    recount_locks: Vec<Mutex<()>>,
}

impl ProgressTracker {
    /// Create a progress tracker.
    #[must_use]
    pub fn new(
        runner: StoreRunner,
        registry: Arc<BadgeRegistry>,
        awards: Arc<AwardEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runner,
            registry,
            awards,
            clock,
            recount_locks: (0..RECOUNT_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn recount_lock(&self, user_id: &UserId) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        let index = usize::try_from(hasher.finish() % RECOUNT_STRIPES).unwrap_or_default();
        &self.recount_locks[index]
    }

    /// Add `delta` to a user's progress toward the named badge.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for an unknown badge name, a store error,
    /// or the error of a failed award attempt.
    pub async fn bump(
        &self,
        user_id: UserId,
        badge_name: &str,
        delta: u64,
    ) -> Result<ProgressOutcome> {
        let badge = self.registry.get_by_name(badge_name).await?;
        self.apply(user_id, badge, ProgressUpdate::Increment(delta))
            .await
    }

    /// Overwrite a user's progress toward the named badge.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for an unknown badge name, a store error,
    /// or the error of a failed award attempt.
    pub async fn set_count(
        &self,
        user_id: UserId,
        badge_name: &str,
        count: u64,
    ) -> Result<ProgressOutcome> {
        let badge = self.registry.get_by_name(badge_name).await?;
        self.apply(user_id, badge, ProgressUpdate::Set(count)).await
    }

    /// Apply the same update to every active badge of a category.
    ///
    /// # Errors
    ///
    /// Returns the first store or award error; earlier badges stay updated.
    pub async fn update_category(
        &self,
        user_id: UserId,
        category: BadgeCategory,
        update: ProgressUpdate,
    ) -> Result<Vec<ProgressOutcome>> {
        let mut outcomes = Vec::new();
        for badge in self.registry.by_category(category).await? {
            outcomes.push(self.apply(user_id, badge, update).await?);
        }
        Ok(outcomes)
    }

    /// Set every badge of `category` to the user's count in the activity log.
    ///
    /// Recounts of one user are serialized, so a slower recount never writes a
    /// smaller count over a newer one.
    ///
    /// # Errors
    ///
    /// Returns a store error, or the error of a failed award attempt.
    pub async fn recount(
        &self,
        user_id: UserId,
        category: BadgeCategory,
    ) -> Result<Vec<ProgressOutcome>> {
        let _guard = self.recount_lock(&user_id).lock().await;
        let counts = self
            .runner
            .run("activity_counts", move |s| ActivityCounts::load(s, &user_id))
            .await?;
        self.update_category(
            user_id,
            category,
            ProgressUpdate::Set(counts.for_category(category)),
        )
        .await
    }

    async fn apply(
        &self,
        user_id: UserId,
        badge: BadgeDefinition,
        update: ProgressUpdate,
    ) -> Result<ProgressOutcome> {
        let badge_id = badge.id;
        let milestone = badge.milestone_count;
        let now = self.clock.now();

        let change = self
            .runner
            .run("update_progress", move |s| {
                s.update_progress(&user_id, &badge_id, milestone, update, now)
            })
            .await?;

        tracing::debug!(
            user_id = %user_id,
            badge = %badge.name,
            previous = change.previous_count,
            count = change.record.current_count,
            percentage = change.record.percentage,
            "Progress updated"
        );

        let attempt = if change.crossed_milestone() {
            true
        } else if change.is_complete() {
            // Complete without a recorded award: an earlier attempt did not land.
            self.runner
                .run("get_award", move |s| s.get_award(&user_id, &badge_id))
                .await?
                .is_none()
        } else {
            false
        };

        let award = if attempt {
            let name = badge.name.clone();
            match self.awards.award_milestone(user_id, badge).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        badge = %name,
                        count = change.record.current_count,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Award attempt failed"
                    );
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(ProgressOutcome {
            record: change.record,
            award,
        })
    }

    /// Progress toward a badge, with the percentage against the current milestone.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn progress_for(
        &self,
        user_id: UserId,
        badge_id: BadgeId,
    ) -> Result<Option<ProgressRecord>> {
        let record = self
            .runner
            .run("get_progress", move |s| s.get_progress(&user_id, &badge_id))
            .await?;
        let Some(record) = record else {
            return Ok(None);
        };
        Ok(self.refresh(vec![record]).await?.pop())
    }

    /// All of a user's progress records.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn progress_for_user(&self, user_id: UserId) -> Result<Vec<ProgressRecord>> {
        let records = self
            .runner
            .run("list_progress_by_user", move |s| {
                s.list_progress_by_user(&user_id)
            })
            .await?;
        self.refresh(records).await
    }

    /// Users whose progress toward a badge is in `[threshold, 100)`, closest first.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for an unknown badge, or a store error.
    pub async fn close_to_earning(
        &self,
        badge_id: BadgeId,
        threshold: u8,
    ) -> Result<Vec<ProgressRecord>> {
        let badge = self.registry.get_by_id(&badge_id).await?;
        let records = self
            .runner
            .run("list_progress_by_badge", move |s| {
                s.list_progress_by_badge(&badge_id)
            })
            .await?;

        let mut close: Vec<ProgressRecord> = records
            .into_iter()
            .map(|mut r| {
                r.percentage = percentage(r.current_count, badge.milestone_count);
                r
            })
            .filter(|r| r.percentage >= threshold && r.percentage < 100)
            .collect();
        close.sort_by(|a, b| {
            b.percentage
                .cmp(&a.percentage)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(close)
    }

    /// Recompute every active badge's count for a user from the activity log.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn sync_user(&self, user_id: UserId) -> Result<Vec<ProgressOutcome>> {
        let _guard = self.recount_lock(&user_id).lock().await;
        let (counts, existing) = self
            .runner
            .run("activity_counts", move |s| {
                Ok((
                    ActivityCounts::load(s, &user_id)?,
                    s.list_progress_by_user(&user_id)?,
                ))
            })
            .await?;

        let mut outcomes = Vec::new();
        for badge in self.registry.list_active().await?.iter() {
            let count = counts.for_category(badge.category);
            let current = existing
                .iter()
                .find(|r| r.badge_id == badge.id)
                .map(|r| r.current_count);
            let unchanged = current.unwrap_or(0) == count;
            if unchanged && count < u64::from(badge.milestone_count) {
                continue;
            }
            outcomes.push(
                self.apply(user_id, badge.clone(), ProgressUpdate::Set(count))
                    .await?,
            );
        }

        tracing::debug!(user_id = %user_id, updated = outcomes.len(), "Progress synced");
        Ok(outcomes)
    }

    /// Recompute percentages against the current registry milestones.
    async fn refresh(&self, mut records: Vec<ProgressRecord>) -> Result<Vec<ProgressRecord>> {
        let badges = self.registry.list_active().await?;
        for record in &mut records {
            if let Some(badge) = badges.iter().find(|b| b.id == record.badge_id) {
                record.percentage = percentage(record.current_count, badge.milestone_count);
            }
        }
        Ok(records)
    }
}
