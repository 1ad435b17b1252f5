//! The leaderboard computer.
//!
//! Each metric is recomputed from scratch: aggregate scores over the metric's
//! window, dense-rank them, and swap the result in as the new current generation.
//! Readers never see a partial generation because the swap is one store commit.
//! Recomputes of the same metric are serialized; different metrics run in
//! parallel. The per-metric lock is held by the blocking store task itself, so
//! it is only released once the swap has finished, even if the caller gave up.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tokio::sync::Mutex;

use laurel_core::{
    dense_rank, ActivityTag, GenerationMeta, LeaderboardEntry, LeaderboardWindow, MetricType,
    UserId,
};
use laurel_store::Store;

use crate::blocking::StoreRunner;
use crate::clock::Clock;
use crate::error::Result;

/// Points per converted referral in the monthly new-user score.
const REFERRAL_WEIGHT: u64 = 3;

/// Points per badge held in the monthly new-user score.
const BADGE_WEIGHT: u64 = 2;

/// Summary over all current leaderboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeaderboardStats {
    /// Rows across all current generations.
    pub total_entries: usize,
    /// Metrics that have a current generation.
    pub active_metrics: usize,
    /// The user appearing on the most current leaderboards.
    pub top_user: Option<UserId>,
    /// How many leaderboards `top_user` appears on.
    pub top_user_entries: usize,
}

/// Computes and serves leaderboards.
pub struct LeaderboardComputer {
    runner: StoreRunner,
    clock: Arc<dyn Clock>,
    top_n: usize,
    retention: Duration,
    recompute_locks: HashMap<MetricType, Arc<Mutex<()>>>,
}

impl LeaderboardComputer {
    /// Create a computer keeping `top_n` rows per generation and purging
    /// non-current generations older than `retention_days`.
    #[must_use]
    pub fn new(
        runner: StoreRunner,
        clock: Arc<dyn Clock>,
        top_n: usize,
        retention_days: i64,
    ) -> Self {
        Self {
            runner,
            clock,
            top_n,
            retention: Duration::days(retention_days),
            recompute_locks: MetricType::ALL
                .into_iter()
                .map(|m| (m, Arc::new(Mutex::new(()))))
                .collect(),
        }
    }

    /// Recompute one metric and make the result current.
    ///
    /// # Errors
    ///
    /// Returns a store error. On failure the previous generation stays current.
    pub async fn recompute(&self, metric: MetricType) -> Result<GenerationMeta> {
        let guard = match self.recompute_locks.get(&metric) {
            Some(lock) => Some(Arc::clone(lock).lock_owned().await),
            None => None,
        };

        let now = self.clock.now();
        let window = metric.window(now);
        let top_n = self.top_n;

        let meta = self
            .runner
            .run_to_completion("recompute_leaderboard", move |s| {
                let swapped = aggregate(s, metric, &window).and_then(|scores| {
                    let ranked = dense_rank(scores, top_n);
                    s.swap_leaderboard(metric, window, &ranked, now)
                });
                drop(guard);
                swapped
            })
            .await?;

        tracing::info!(
            metric = %metric,
            generation = meta.generation,
            entries = meta.entry_count,
            window_start = %meta.window.start,
            window_end = %meta.window.end,
            "Leaderboard recomputed"
        );
        Ok(meta)
    }

    /// Recompute several metrics in parallel.
    ///
    /// Every metric is attempted; failures are logged and returned per metric.
    pub async fn recompute_many(
        &self,
        metrics: &[MetricType],
    ) -> Vec<(MetricType, Result<GenerationMeta>)> {
        let results =
            futures::future::join_all(metrics.iter().map(|m| self.recompute(*m))).await;

        metrics
            .iter()
            .copied()
            .zip(results)
            .inspect(|(metric, result)| {
                if let Err(e) = result {
                    tracing::error!(metric = %metric, error = %e, "Leaderboard recompute failed");
                }
            })
            .collect()
    }

    /// Recompute every metric in parallel.
    pub async fn recompute_all(&self) -> Vec<(MetricType, Result<GenerationMeta>)> {
        self.recompute_many(&MetricType::ALL).await
    }

    /// Up to `limit` rows of a metric's current generation, by rank.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_leaderboard(
        &self,
        metric: MetricType,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        let limit = limit.min(self.top_n);
        self.runner
            .run("current_leaderboard", move |s| {
                s.current_leaderboard(metric, limit)
            })
            .await
    }

    /// A user's row in a metric's current generation.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_user_rank(
        &self,
        user_id: UserId,
        metric: MetricType,
    ) -> Result<Option<LeaderboardEntry>> {
        self.runner
            .run("user_rank", move |s| s.user_rank(&user_id, metric))
            .await
    }

    /// A user's rows across every metric they are ranked on.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_user_ranks(&self, user_id: UserId) -> Result<Vec<LeaderboardEntry>> {
        self.runner
            .run("user_ranks", move |s| {
                let mut ranks = Vec::new();
                for metric in MetricType::ALL {
                    if let Some(entry) = s.user_rank(&user_id, metric)? {
                        ranks.push(entry);
                    }
                }
                Ok(ranks)
            })
            .await
    }

    /// Metadata of a metric's current generation.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn current_generation(&self, metric: MetricType) -> Result<Option<GenerationMeta>> {
        self.runner
            .run("current_generation", move |s| s.current_generation(metric))
            .await
    }

    /// Totals across all current leaderboards.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn stats(&self) -> Result<LeaderboardStats> {
        let counts = self
            .runner
            .run("leaderboard_counts", |s| s.leaderboard_counts())
            .await?;

        let top = counts
            .entries_by_user
            .iter()
            .max_by(|(ua, ca), (ub, cb)| ca.cmp(cb).then_with(|| ub.cmp(ua)))
            .copied();

        Ok(LeaderboardStats {
            total_entries: counts.current_entries,
            active_metrics: counts.active_metrics,
            top_user: top.map(|(user, _)| user),
            top_user_entries: top.map_or(0, |(_, n)| n),
        })
    }

    /// Delete non-current generations older than the retention period.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn purge(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.retention;
        let purged = self
            .runner
            .run("purge_leaderboards", move |s| s.purge_leaderboards(cutoff))
            .await?;
        tracing::info!(purged, cutoff = %cutoff, "Old leaderboard generations purged");
        Ok(purged)
    }
}

/// Scores for a metric over a window. Users scoring zero are omitted.
fn aggregate(
    store: &dyn Store,
    metric: MetricType,
    window: &LeaderboardWindow,
) -> laurel_store::Result<Vec<(UserId, u64)>> {
    let scores = match metric {
        MetricType::WeeklyMatches => count_credited(store, ActivityTag::Match, window)?,
        MetricType::WeeklyReferrals => count_credited(store, ActivityTag::Referral, window)?,
        MetricType::AllTimeBadges => store.count_awards_by_user()?,
        MetricType::MonthlyNewUsers => {
            let badges: HashMap<UserId, u64> = store.count_awards_by_user()?.into_iter().collect();
            let mut scores = Vec::new();
            for member in store.list_members()? {
                if !window.contains(member.first_seen_at) {
                    continue;
                }
                let user_id = member.user_id;
                let matches = store.count_user_activity(&user_id, ActivityTag::Match)?;
                let referrals = store.count_user_activity(&user_id, ActivityTag::Referral)?;
                let held = badges.get(&user_id).copied().unwrap_or(0);
                let score = matches
                    .saturating_add(referrals.saturating_mul(REFERRAL_WEIGHT))
                    .saturating_add(held.saturating_mul(BADGE_WEIGHT));
                scores.push((user_id, score));
            }
            scores
        }
    };

    Ok(scores.into_iter().filter(|(_, score)| *score > 0).collect())
}

fn count_credited(
    store: &dyn Store,
    tag: ActivityTag,
    window: &LeaderboardWindow,
) -> laurel_store::Result<Vec<(UserId, u64)>> {
    let mut counts: BTreeMap<UserId, u64> = BTreeMap::new();
    for event in store.list_activity(tag, window)? {
        for user in event.kind.credited_users() {
            *counts.entry(user).or_default() += 1;
        }
    }
    Ok(counts.into_iter().collect())
}
