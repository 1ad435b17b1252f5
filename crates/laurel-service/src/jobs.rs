//! Scheduled background jobs.
//!
//! Every job runs on its own `tokio::time::interval` task so a slow job never
//! delays another. All tasks stop when the shutdown channel flips to `true`.
//! A job already in progress finishes its current store call; a leaderboard
//! swap is a single blocking write, so shutdown never leaves a partial swap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use laurel_core::MetricType;

use crate::config::JobIntervals;
use crate::engine::Engine;

const WEEKLY_METRICS: [MetricType; 2] = [MetricType::WeeklyMatches, MetricType::WeeklyReferrals];
const LONG_METRICS: [MetricType; 2] = [MetricType::AllTimeBadges, MetricType::MonthlyNewUsers];

/// A scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Recompute member progress from the activity log and retry missed awards.
    AwardSweep,
    /// Clear expired streak freezes.
    FreezeCleanup,
    /// Recompute the weekly leaderboards.
    WeeklyLeaderboards,
    /// Recompute the all-time and monthly leaderboards.
    LongLeaderboards,
    /// Delete old leaderboard generations.
    RetentionPurge,
    /// Send close-to-earning nudges.
    Nudges,
}

impl Job {
    /// Every job.
    pub const ALL: [Self; 6] = [
        Self::AwardSweep,
        Self::FreezeCleanup,
        Self::WeeklyLeaderboards,
        Self::LongLeaderboards,
        Self::RetentionPurge,
        Self::Nudges,
    ];

    /// Name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AwardSweep => "award_sweep",
            Self::FreezeCleanup => "freeze_cleanup",
            Self::WeeklyLeaderboards => "weekly_leaderboards",
            Self::LongLeaderboards => "long_leaderboards",
            Self::RetentionPurge => "retention_purge",
            Self::Nudges => "nudges",
        }
    }

    /// How often the job runs.
    #[must_use]
    pub const fn interval(self, intervals: &JobIntervals) -> Duration {
        match self {
            Self::AwardSweep => intervals.award_sweep,
            Self::FreezeCleanup => intervals.freeze_cleanup,
            Self::WeeklyLeaderboards => intervals.weekly_leaderboards,
            Self::LongLeaderboards => intervals.long_leaderboards,
            Self::RetentionPurge => intervals.retention_purge,
            Self::Nudges => intervals.nudges,
        }
    }
}

/// Runs the engine's periodic jobs.
pub struct Scheduler {
    engine: Arc<Engine>,
    intervals: JobIntervals,
}

impl Scheduler {
    /// Create a scheduler using the engine's configured intervals.
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        let intervals = engine.config().jobs.clone();
        Self { engine, intervals }
    }

    /// Run one job to completion. Failures are logged.
    pub async fn run_job(&self, job: Job) {
        let started = std::time::Instant::now();
        let result = match job {
            Job::AwardSweep => self.engine.sweep_awards().await.map(|_| ()),
            Job::FreezeCleanup => self.engine.clear_expired_freezes().await.map(|_| ()),
            Job::WeeklyLeaderboards => {
                self.engine.recompute_leaderboards(&WEEKLY_METRICS).await;
                Ok(())
            }
            Job::LongLeaderboards => {
                self.engine.recompute_leaderboards(&LONG_METRICS).await;
                Ok(())
            }
            Job::RetentionPurge => self.engine.purge_leaderboards().await.map(|_| ()),
            Job::Nudges => self.engine.notify_close_to_earning().await.map(|_| ()),
        };

        match result {
            Ok(()) => tracing::debug!(
                job = job.name(),
                elapsed_ms = %started.elapsed().as_millis(),
                "Job finished"
            ),
            Err(e) => tracing::error!(
                job = job.name(),
                error = %e,
                retryable = e.is_retryable(),
                "Job failed"
            ),
        }
    }

    /// Start one task per job. Each runs immediately, then on its interval,
    /// until `shutdown` becomes `true`.
    #[must_use]
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        Job::ALL
            .into_iter()
            .map(|job| {
                let scheduler = Arc::clone(&self);
                let mut shutdown = shutdown.clone();
                let period = job.interval(&scheduler.intervals);
                tracing::info!(job = job.name(), interval_secs = period.as_secs(), "Job scheduled");

                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                    loop {
                        tokio::select! {
                            _ = interval.tick() => scheduler.run_job(job).await,
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                    tracing::info!(job = job.name(), "Job stopped");
                })
            })
            .collect()
    }
}
