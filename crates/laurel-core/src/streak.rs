//! Daily activity streaks.
//!
//! Streaks move on calendar days, not timestamps. A streak record changes at most
//! once per day; every call after the first on the same day is a no-op.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A time-boxed exemption that keeps a streak alive across missed days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakFreeze {
    /// The freeze protects activity on any day up to and including this instant's date.
    pub expires_at: DateTime<Utc>,
}

impl StreakFreeze {
    /// A freeze lasting `days` from `now`.
    #[must_use]
    pub fn for_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: now + Duration::days(i64::from(days)),
        }
    }

    /// Whether the freeze still applies on `today`.
    #[must_use]
    pub fn covers(&self, today: NaiveDate) -> bool {
        self.expires_at.date_naive() >= today
    }
}

/// What a call to [`StreakRecord::record_activity`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakTransition {
    /// First activity ever.
    Started,
    /// Already counted today.
    Unchanged,
    /// Activity on the next calendar day.
    Extended,
    /// A gap was bridged by an active freeze.
    Bridged,
    /// The gap broke the streak; it restarts at 1.
    Reset,
}

impl StreakTransition {
    /// Whether the record was written.
    #[must_use]
    pub const fn is_change(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Consecutive-day activity counter for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    /// The user.
    pub user_id: UserId,

    /// Length of the running streak in days.
    pub current_streak: u32,

    /// Longest streak ever observed.
    pub longest_streak: u32,

    /// Calendar date of the last counted activity.
    pub last_active_date: NaiveDate,

    /// Active freeze, if any.
    pub freeze: Option<StreakFreeze>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StreakRecord {
    /// A streak of one, starting today.
    #[must_use]
    pub fn start(user_id: UserId, today: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            current_streak: 1,
            longest_streak: 1,
            last_active_date: today,
            freeze: None,
            updated_at: now,
        }
    }

    /// Advance the streak for activity seen on `today`.
    pub fn record_activity(&mut self, today: NaiveDate, now: DateTime<Utc>) -> StreakTransition {
        let days_since = (today - self.last_active_date).num_days();

        let transition = match days_since {
            // Same day, or a clock that went backwards.
            d if d <= 0 => return StreakTransition::Unchanged,
            1 => StreakTransition::Extended,
            _ if self.freeze.is_some_and(|f| f.covers(today)) => StreakTransition::Bridged,
            _ => StreakTransition::Reset,
        };

        match transition {
            StreakTransition::Extended | StreakTransition::Bridged => {
                self.current_streak = self.current_streak.saturating_add(1);
            }
            _ => self.current_streak = 1,
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);
        self.last_active_date = today;
        self.updated_at = now;
        transition
    }

    /// Drop a freeze that no longer covers `today`. Returns whether anything changed.
    pub fn clear_expired_freeze(&mut self, today: NaiveDate, now: DateTime<Utc>) -> bool {
        match self.freeze {
            Some(freeze) if !freeze.covers(today) => {
                self.freeze = None;
                self.updated_at = now;
                true
            }
            _ => false,
        }
    }
}
