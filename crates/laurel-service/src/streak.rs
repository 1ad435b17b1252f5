//! The streak tracker.
//!
//! A streak counts consecutive UTC calendar days with activity, with the day
//! taken from [`Clock::today`]. Every change of length is pushed into the streak
//! badges (category `activity`) in set mode.

use std::sync::Arc;

use serde::Serialize;

use laurel_core::{BadgeCategory, StreakFreeze, StreakRecord, StreakTransition, UserId};

use crate::blocking::StoreRunner;
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::progress::{ProgressOutcome, ProgressTracker};

/// Longest freeze a caller may request.
pub const MAX_FREEZE_DAYS: u32 = 30;

/// Result of recording activity.
#[derive(Debug, Clone, Serialize)]
pub struct StreakUpdate {
    /// The streak after the update.
    pub record: StreakRecord,
    /// How the streak moved.
    pub transition: StreakTransition,
    /// Progress updates of streak badges.
    pub progress: Vec<ProgressOutcome>,
}

/// Tracks daily activity streaks.
pub struct StreakTracker {
    runner: StoreRunner,
    progress: Arc<ProgressTracker>,
    clock: Arc<dyn Clock>,
}

impl StreakTracker {
    /// Create a streak tracker.
    #[must_use]
    pub fn new(runner: StoreRunner, progress: Arc<ProgressTracker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner,
            progress,
            clock,
        }
    }

    /// Record that a user was active today.
    ///
    /// # Errors
    ///
    /// Returns a store error. A failure while updating streak badges is returned
    /// after the streak itself has been stored.
    pub async fn record_activity(&self, user_id: UserId) -> Result<StreakUpdate> {
        let now = self.clock.now();
        let today = self.clock.today();

        let (record, transition) = self
            .runner
            .run("record_streak_activity", move |s| {
                s.record_streak_activity(&user_id, today, now)
            })
            .await?;

        if !transition.is_change() {
            return Ok(StreakUpdate {
                record,
                transition,
                progress: Vec::new(),
            });
        }

        tracing::debug!(
            user_id = %user_id,
            transition = ?transition,
            current = record.current_streak,
            longest = record.longest_streak,
            "Streak updated"
        );

        let progress = self
            .progress
            .recount(user_id, BadgeCategory::Activity)
            .await?;

        Ok(StreakUpdate {
            record,
            transition,
            progress,
        })
    }

    /// A user's streak.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get(&self, user_id: UserId) -> Result<Option<StreakRecord>> {
        self.runner
            .run("get_streak", move |s| s.get_streak(&user_id))
            .await
    }

    /// Protect a streak from breaking for `days` days.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidInput` for zero or too many days and
    /// `EngineError::NotFound` if the user has no streak.
    pub async fn freeze(&self, user_id: UserId, days: u32) -> Result<StreakRecord> {
        if days == 0 || days > MAX_FREEZE_DAYS {
            return Err(EngineError::InvalidInput(format!(
                "freeze must be 1..={MAX_FREEZE_DAYS} days, got {days}"
            )));
        }
        let now = self.clock.now();
        let freeze = StreakFreeze::for_days(days, now);

        let record = self
            .runner
            .run("set_streak_freeze", move |s| {
                s.set_streak_freeze(&user_id, freeze, now)
            })
            .await?;

        tracing::info!(user_id = %user_id, days, expires_at = %freeze.expires_at, "Streak frozen");
        Ok(record)
    }

    /// Remove freezes that have expired. Safe to run any number of times.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn clear_expired_freezes(&self) -> Result<usize> {
        let now = self.clock.now();
        let today = self.clock.today();
        let cleared = self
            .runner
            .run("clear_expired_freezes", move |s| {
                s.clear_expired_freezes(today, now)
            })
            .await?;
        if cleared > 0 {
            tracing::info!(cleared, "Expired streak freezes cleared");
        }
        Ok(cleared)
    }

    /// Longest current streaks, ties broken by longest-ever then user id.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn top_streaks(&self, limit: usize) -> Result<Vec<StreakRecord>> {
        let mut streaks = self
            .runner
            .run("list_streaks", |s| s.list_streaks())
            .await?;
        streaks.retain(|s| s.current_streak > 0);
        streaks.sort_by(|a, b| {
            b.current_streak
                .cmp(&a.current_streak)
                .then(b.longest_streak.cmp(&a.longest_streak))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        streaks.truncate(limit);
        Ok(streaks)
    }
}
