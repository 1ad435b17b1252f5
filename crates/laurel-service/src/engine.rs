//! The engine facade.
//!
//! `Engine` wires the registry, progress tracker, award engine, streak tracker
//! and leaderboard computer over one store, and is the only type the embedding
//! application talks to.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use laurel_core::{
    default_catalog, percentage, ActivityEvent, ActivityKind, AwardRecord, BadgeCategory,
    BadgeDefinition, BadgeId, GenerationMeta, LeaderboardEntry, MemberAccount, MetricType,
    ProgressRecord, ProgressUpdate, StreakRecord, UserId,
};
use laurel_store::{Store, StoreError};

use crate::award::{AwardEngine, AwardOptions, AwardOutcome};
use crate::blocking::StoreRunner;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::leaderboard::{LeaderboardComputer, LeaderboardStats};
use crate::notify::{NotificationSink, Notifier};
use crate::progress::{ProgressOutcome, ProgressTracker};
use crate::registry::BadgeRegistry;
use crate::streak::{StreakTracker, StreakUpdate};

/// A badge as shown to one user.
#[derive(Debug, Clone, Serialize)]
pub struct BadgeView {
    /// The definition.
    pub badge: BadgeDefinition,
    /// Whether the user holds it.
    pub earned: bool,
    /// When it was earned.
    pub earned_at: Option<DateTime<Utc>>,
    /// Current progress count.
    pub current_count: u64,
    /// Progress against the current milestone; 100 once earned.
    pub percentage: u8,
}

/// An award together with its definition.
#[derive(Debug, Clone, Serialize)]
pub struct EarnedBadge {
    /// The award.
    pub award: AwardRecord,
    /// The definition.
    pub badge: BadgeDefinition,
}

/// Number of holders of one badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadgeCount {
    /// The badge.
    pub badge_id: BadgeId,
    /// Human-readable name.
    pub display_name: String,
    /// Holders.
    pub count: u64,
}

/// Catalog-wide award statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadgeStats {
    /// Active definitions.
    pub total_badges: usize,
    /// Awards recorded.
    pub total_earned: u64,
    /// The badge with the most holders.
    pub most_earned: Option<BadgeCount>,
    /// The awarded badge with the fewest holders.
    pub rarest: Option<BadgeCount>,
}

/// Result of ingesting one activity event.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    /// The event id.
    pub event_id: String,
    /// The event was seen before and ignored.
    pub duplicate: bool,
    /// Progress updates caused by the event.
    pub progress: Vec<ProgressOutcome>,
    /// Streak update caused by the event.
    pub streak: Option<StreakUpdate>,
}

/// Result of an award sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Members visited.
    pub users: usize,
    /// Progress records rewritten.
    pub updated: usize,
    /// Awards granted.
    pub granted: usize,
    /// Members whose sync failed.
    pub failed: usize,
}

/// The achievement engine.
pub struct Engine {
    config: EngineConfig,
    runner: StoreRunner,
    registry: Arc<BadgeRegistry>,
    awards: Arc<AwardEngine>,
    progress: Arc<ProgressTracker>,
    streaks: StreakTracker,
    leaderboards: LeaderboardComputer,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Build an engine over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: EngineConfig,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let runner = StoreRunner::new(store, config.store_timeout);
        let registry = Arc::new(BadgeRegistry::new(runner.clone(), config.registry_ttl));
        let notifier = Notifier::new(sink, runner.clone());
        let awards = Arc::new(AwardEngine::new(
            runner.clone(),
            Arc::clone(&registry),
            notifier.clone(),
            Arc::clone(&clock),
        ));
        let progress = Arc::new(ProgressTracker::new(
            runner.clone(),
            Arc::clone(&registry),
            Arc::clone(&awards),
            Arc::clone(&clock),
        ));
        let streaks = StreakTracker::new(runner.clone(), Arc::clone(&progress), Arc::clone(&clock));
        let leaderboards = LeaderboardComputer::new(
            runner.clone(),
            Arc::clone(&clock),
            config.leaderboard_top_n,
            config.leaderboard_retention_days,
        );

        Self {
            config,
            runner,
            registry,
            awards,
            progress,
            streaks,
            leaderboards,
            notifier,
            clock,
        }
    }

    /// The configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Insert the default catalog's missing definitions.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn seed_catalog(&self) -> Result<usize> {
        self.registry.seed(default_catalog()).await
    }

    /// Insert missing definitions from `catalog`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidInput` for an invalid definition, or a store error.
    pub async fn seed(&self, catalog: Vec<BadgeDefinition>) -> Result<usize> {
        self.registry.seed(catalog).await
    }

    /// Drop the registry cache.
    pub async fn invalidate_registry(&self) {
        self.registry.invalidate().await;
    }

    // =========================================================================
    // Activity
    // =========================================================================

    /// Record an activity event and update progress and streaks.
    ///
    /// Event counts are recomputed from the activity log after the event is
    /// logged, so badges published after earlier activity start from the user's
    /// real count. A re-delivered event id is acknowledged with
    /// `duplicate = true` and has no effect. If a progress update or award fails
    /// after the event is logged, the error is returned and the next award sweep
    /// recomputes the counts from the log.
    ///
    /// # Errors
    ///
    /// Returns a store error, or the error of a failed award attempt.
    pub async fn ingest(&self, event: ActivityEvent) -> Result<IngestOutcome> {
        let event_id = event.event_id.clone();
        let logged = event.clone();
        match self
            .runner
            .run("record_activity", move |s| s.record_activity(&logged))
            .await
        {
            Ok(()) => {}
            Err(EngineError::Store(StoreError::DuplicateEvent { .. })) => {
                tracing::debug!(event_id = %event_id, "Duplicate event ignored");
                return Ok(IngestOutcome {
                    event_id,
                    duplicate: true,
                    progress: Vec::new(),
                    streak: None,
                });
            }
            Err(e) => return Err(e),
        }

        let mut progress = Vec::new();
        let mut streak = None;
        match event.kind {
            ActivityKind::MatchCreated { .. } => {
                for user_id in event.kind.credited_users() {
                    progress.extend(
                        self.progress
                            .recount(user_id, BadgeCategory::Matches)
                            .await?,
                    );
                }
            }
            ActivityKind::ReferralConverted { referrer_id, .. } => {
                progress = self
                    .progress
                    .recount(referrer_id, BadgeCategory::Referrals)
                    .await?;
            }
            ActivityKind::ProfileFieldCompleted { user_id, fields } => {
                progress = self
                    .progress
                    .update_category(
                        user_id,
                        BadgeCategory::Profile,
                        ProgressUpdate::Set(fields.completion_score()),
                    )
                    .await?;
            }
            ActivityKind::LikeSent { user_id, .. } => {
                progress = self
                    .progress
                    .recount(user_id, BadgeCategory::Engagement)
                    .await?;
            }
            ActivityKind::DailyLoginSeen { user_id } => {
                streak = Some(self.streaks.record_activity(user_id).await?);
            }
        }

        tracing::debug!(
            event_id = %event_id,
            kind = ?event.kind.tag(),
            updates = progress.len(),
            "Event ingested"
        );
        Ok(IngestOutcome {
            event_id,
            duplicate: false,
            progress,
            streak,
        })
    }

    // =========================================================================
    // Badges
    // =========================================================================

    /// Every active badge with the user's earned state and progress.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_all_badges(&self, user_id: UserId) -> Result<Vec<BadgeView>> {
        let badges = self.registry.list_active().await?;
        let (awards, progress) = self
            .runner
            .run("user_badge_state", move |s| {
                Ok((
                    s.list_awards_by_user(&user_id)?,
                    s.list_progress_by_user(&user_id)?,
                ))
            })
            .await?;

        let awards: HashMap<BadgeId, AwardRecord> =
            awards.into_iter().map(|a| (a.badge_id, a)).collect();
        let counts: HashMap<BadgeId, u64> = progress
            .into_iter()
            .map(|p| (p.badge_id, p.current_count))
            .collect();

        Ok(badges
            .iter()
            .map(|badge| {
                let award = awards.get(&badge.id);
                let current_count = counts.get(&badge.id).copied().unwrap_or(0);
                BadgeView {
                    badge: badge.clone(),
                    earned: award.is_some(),
                    earned_at: award.map(|a| a.earned_at),
                    current_count,
                    percentage: if award.is_some() {
                        100
                    } else {
                        percentage(current_count, badge.milestone_count)
                    },
                }
            })
            .collect())
    }

    /// The user's awards with their definitions, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_user_badges(&self, user_id: UserId) -> Result<Vec<EarnedBadge>> {
        let (awards, badges) = self
            .runner
            .run("user_badges", move |s| {
                Ok((s.list_awards_by_user(&user_id)?, s.list_badges()?))
            })
            .await?;

        let badges: HashMap<BadgeId, BadgeDefinition> =
            badges.into_iter().map(|b| (b.id, b)).collect();
        Ok(awards
            .into_iter()
            .filter_map(|award| {
                badges.get(&award.badge_id).cloned().map(|badge| EarnedBadge { award, badge })
            })
            .collect())
    }

    /// The user's most prestigious active badges: rarest first, then earliest earned.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_top_badges(&self, user_id: UserId, limit: usize) -> Result<Vec<EarnedBadge>> {
        let mut earned: Vec<EarnedBadge> = self
            .get_user_badges(user_id)
            .await?
            .into_iter()
            .filter(|e| e.badge.is_active)
            .collect();
        earned.sort_by(|a, b| {
            b.badge
                .rarity
                .weight()
                .cmp(&a.badge.rarity.weight())
                .then(a.award.earned_at.cmp(&b.award.earned_at))
        });
        earned.truncate(limit);
        Ok(earned)
    }

    /// Award counts across the catalog.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_badge_stats(&self) -> Result<BadgeStats> {
        let active = self.registry.list_active().await?.len();
        let (counts, badges) = self
            .runner
            .run("badge_stats", |s| Ok((s.count_awards_by_badge()?, s.list_badges()?)))
            .await?;

        let names: HashMap<BadgeId, String> = badges
            .into_iter()
            .map(|b| (b.id, b.display_name))
            .collect();
        let mut counts: Vec<BadgeCount> = counts
            .into_iter()
            .map(|(badge_id, count)| BadgeCount {
                badge_id,
                display_name: names.get(&badge_id).cloned().unwrap_or_default(),
                count,
            })
            .collect();
        counts.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });

        Ok(BadgeStats {
            total_badges: active,
            total_earned: counts.iter().map(|c| c.count).sum(),
            most_earned: counts.first().cloned(),
            rarest: counts.last().cloned(),
        })
    }

    /// Grant a badge through the administrative path.
    ///
    /// Idempotent: a second call reports `already_earned` and applies nothing.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for an unknown badge, or a store error.
    pub async fn award_badge(&self, user_id: UserId, badge_id: BadgeId) -> Result<AwardOutcome> {
        self.awards.award(user_id, badge_id).await
    }

    /// Grant a badge through the administrative path with options.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for an unknown badge, or a store error.
    pub async fn award_badge_with(
        &self,
        user_id: UserId,
        badge_id: BadgeId,
        options: AwardOptions,
    ) -> Result<AwardOutcome> {
        self.awards.award_with(user_id, badge_id, options).await
    }

    /// Mark all of a user's awards as seen. Returns how many changed.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn acknowledge_badges(&self, user_id: UserId) -> Result<usize> {
        self.runner
            .run("acknowledge_awards", move |s| s.acknowledge_awards(&user_id))
            .await
    }

    /// The account rewards have been applied to.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_account(&self, user_id: UserId) -> Result<Option<MemberAccount>> {
        self.runner
            .run("get_account", move |s| s.get_account(&user_id))
            .await
    }

    // =========================================================================
    // Progress
    // =========================================================================

    /// Progress of a user toward a badge.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_badge_progress(
        &self,
        user_id: UserId,
        badge_id: BadgeId,
    ) -> Result<Option<ProgressRecord>> {
        self.progress.progress_for(user_id, badge_id).await
    }

    /// All progress records of a user.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_user_progress(&self, user_id: UserId) -> Result<Vec<ProgressRecord>> {
        self.progress.progress_for_user(user_id).await
    }

    /// Add `delta` to a user's progress toward the named badge.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for an unknown badge name, or a store error.
    pub async fn bump_progress(
        &self,
        user_id: UserId,
        badge_name: &str,
        delta: u64,
    ) -> Result<ProgressOutcome> {
        self.progress.bump(user_id, badge_name, delta).await
    }

    /// Overwrite a user's progress toward the named badge.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for an unknown badge name, or a store error.
    pub async fn set_progress(
        &self,
        user_id: UserId,
        badge_name: &str,
        count: u64,
    ) -> Result<ProgressOutcome> {
        self.progress.set_count(user_id, badge_name, count).await
    }

    // =========================================================================
    // Streaks
    // =========================================================================

    /// A user's streak.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_streak(&self, user_id: UserId) -> Result<Option<StreakRecord>> {
        self.streaks.get(user_id).await
    }

    /// Protect a user's streak for `days` days.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidInput` for an invalid duration and
    /// `EngineError::NotFound` if the user has no streak.
    pub async fn freeze_streak(&self, user_id: UserId, days: u32) -> Result<StreakRecord> {
        self.streaks.freeze(user_id, days).await
    }

    /// Longest running streaks.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_top_streaks(&self, limit: usize) -> Result<Vec<StreakRecord>> {
        self.streaks.top_streaks(limit).await
    }

    // =========================================================================
    // Leaderboards
    // =========================================================================

    /// Up to `limit` rows of a metric's current leaderboard.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_leaderboard(
        &self,
        metric: MetricType,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        self.leaderboards.get_leaderboard(metric, limit).await
    }

    /// A user's rank on one metric.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_user_rank(
        &self,
        user_id: UserId,
        metric: MetricType,
    ) -> Result<Option<LeaderboardEntry>> {
        self.leaderboards.get_user_rank(user_id, metric).await
    }

    /// A user's ranks on every metric they appear on.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_user_ranks(&self, user_id: UserId) -> Result<Vec<LeaderboardEntry>> {
        self.leaderboards.get_user_ranks(user_id).await
    }

    /// Totals across current leaderboards.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn leaderboard_stats(&self) -> Result<LeaderboardStats> {
        self.leaderboards.stats().await
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Recompute every member's progress from the activity log, granting any
    /// award whose earlier attempt did not land.
    ///
    /// # Errors
    ///
    /// Returns a store error if the member list cannot be read. Per-member
    /// failures are logged and counted.
    pub async fn sweep_awards(&self) -> Result<SweepReport> {
        let members = self.runner.run("list_members", |s| s.list_members()).await?;
        let mut report = SweepReport {
            users: members.len(),
            ..SweepReport::default()
        };

        for member in members {
            match self.progress.sync_user(member.user_id).await {
                Ok(outcomes) => {
                    report.updated += outcomes.len();
                    report.granted += outcomes
                        .iter()
                        .filter(|o| o.award.as_ref().is_some_and(|a| a.granted))
                        .count();
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(user_id = %member.user_id, error = %e, "Progress sync failed");
                }
            }
        }

        tracing::info!(
            users = report.users,
            updated = report.updated,
            granted = report.granted,
            failed = report.failed,
            "Award sweep finished"
        );
        Ok(report)
    }

    /// Clear expired streak freezes.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn clear_expired_freezes(&self) -> Result<usize> {
        self.streaks.clear_expired_freezes().await
    }

    /// Recompute one leaderboard.
    ///
    /// # Errors
    ///
    /// Returns a store error; the previous generation stays current.
    pub async fn recompute_leaderboard(&self, metric: MetricType) -> Result<GenerationMeta> {
        self.leaderboards.recompute(metric).await
    }

    /// Recompute several leaderboards in parallel.
    pub async fn recompute_leaderboards(
        &self,
        metrics: &[MetricType],
    ) -> Vec<(MetricType, Result<GenerationMeta>)> {
        self.leaderboards.recompute_many(metrics).await
    }

    /// Delete old leaderboard generations.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn purge_leaderboards(&self) -> Result<usize> {
        self.leaderboards.purge().await
    }

    /// Nudge users who are close to earning a badge. Returns how many were sent.
    ///
    /// Each user is nudged at most once per badge; the marker is claimed on the
    /// progress record before the notification is spawned.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn notify_close_to_earning(&self) -> Result<usize> {
        let threshold = self.config.close_to_earning_threshold;
        let now = self.clock.now();
        let mut sent = 0;
        for badge in self.registry.list_active().await?.iter() {
            let candidates = self.progress.close_to_earning(badge.id, threshold).await?;
            for record in candidates.into_iter().filter(|r| r.nudged_at.is_none()) {
                let (user_id, badge_id) = (record.user_id, record.badge_id);
                let claimed = self
                    .runner
                    .run("mark_progress_nudged", move |s| {
                        s.mark_progress_nudged(&user_id, &badge_id, now)
                    })
                    .await?;
                if claimed {
                    self.notifier
                        .close_to_earning(user_id, badge, record.percentage);
                    sent += 1;
                }
            }
        }
        tracing::info!(sent, threshold, "Close-to-earning nudges sent");
        Ok(sent)
    }
}
