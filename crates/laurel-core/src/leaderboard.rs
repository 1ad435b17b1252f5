//! Leaderboard metrics, windows and dense ranking.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LaurelError;
use crate::UserId;

/// Default number of ranked rows kept per metric.
pub const DEFAULT_TOP_N: usize = 50;

/// Non-current generations older than this are purged.
pub const DEFAULT_RETENTION_DAYS: i64 = 28;

/// Independent ranked metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Matches created during the current Monday-to-Monday week.
    WeeklyMatches,
    /// Converted referrals during the current week.
    WeeklyReferrals,
    /// Badges held, all time.
    AllTimeBadges,
    /// Composite engagement of users first seen this calendar month.
    MonthlyNewUsers,
}

impl MetricType {
    /// All metrics, in a stable order.
    pub const ALL: [Self; 4] = [
        Self::WeeklyMatches,
        Self::WeeklyReferrals,
        Self::AllTimeBadges,
        Self::MonthlyNewUsers,
    ];

    /// Stable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WeeklyMatches => "weekly_matches",
            Self::WeeklyReferrals => "weekly_referrals",
            Self::AllTimeBadges => "all_time_badges",
            Self::MonthlyNewUsers => "monthly_new_users",
        }
    }

    /// Single-byte key prefix.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::WeeklyMatches => 1,
            Self::WeeklyReferrals => 2,
            Self::AllTimeBadges => 3,
            Self::MonthlyNewUsers => 4,
        }
    }

    /// Inverse of [`MetricType::as_byte`].
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_byte() == byte)
    }

    /// The aggregation window for a recompute at `now`.
    #[must_use]
    pub fn window(self, now: DateTime<Utc>) -> LeaderboardWindow {
        match self {
            Self::WeeklyMatches | Self::WeeklyReferrals => {
                let today = now.date_naive();
                let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
                let start = midnight(monday);
                LeaderboardWindow {
                    start,
                    end: start + Duration::days(7),
                }
            }
            Self::AllTimeBadges => LeaderboardWindow {
                start: all_time_start(),
                end: now,
            },
            Self::MonthlyNewUsers => {
                let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
                    .unwrap_or_else(|| now.date_naive());
                let next = if first.month() == 12 {
                    NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
                }
                .unwrap_or(first);
                LeaderboardWindow {
                    start: midnight(first),
                    end: midnight(next),
                }
            }
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = LaurelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| LaurelError::UnknownMetric(s.to_string()))
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Start of the all-time window.
#[must_use]
pub fn all_time_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Half-open interval `[start, end)` a leaderboard aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl LeaderboardWindow {
    /// Whether `at` falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// A user with a score and a dense rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedScore {
    /// The user.
    pub user_id: UserId,
    /// Score within the window.
    pub score: u64,
    /// Dense rank, starting at 1.
    pub rank: u32,
}

/// Rank scores descending with dense ranking and keep the first `top_n` rows.
///
/// Tied scores share a rank and the next distinct score takes the next rank, so
/// `[50, 50, 30]` ranks as `[1, 1, 2]`. Ties are ordered by user id so a
/// recompute over the same input always produces the same rows.
#[must_use]
pub fn dense_rank(mut scores: Vec<(UserId, u64)>, top_n: usize) -> Vec<RankedScore> {
    scores.sort_by(|(ua, sa), (ub, sb)| sb.cmp(sa).then_with(|| ua.cmp(ub)));

    let mut ranked = Vec::with_capacity(scores.len().min(top_n));
    let mut rank = 0u32;
    let mut previous: Option<u64> = None;
    for (user_id, score) in scores.into_iter().take(top_n) {
        if previous != Some(score) {
            rank += 1;
            previous = Some(score);
        }
        ranked.push(RankedScore {
            user_id,
            score,
            rank,
        });
    }
    ranked
}

/// One row of a leaderboard generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// The metric.
    pub metric: MetricType,
    /// The generation this row belongs to.
    pub generation: u64,
    /// The user.
    pub user_id: UserId,
    /// Dense rank.
    pub rank: u32,
    /// Score.
    pub score: u64,
    /// Window the score was aggregated over.
    pub window: LeaderboardWindow,
    /// Whether this row belongs to the generation readers see.
    pub is_current: bool,
    /// When the generation was computed.
    pub computed_at: DateTime<Utc>,
}

/// Bookkeeping for one computed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMeta {
    /// The metric.
    pub metric: MetricType,
    /// Generation number, increasing per metric.
    pub generation: u64,
    /// Aggregation window.
    pub window: LeaderboardWindow,
    /// Number of rows written.
    pub entry_count: u32,
    /// When it was computed.
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(n: usize) -> Vec<UserId> {
        let mut ids: Vec<_> = (0..n).map(|_| UserId::generate()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn ties_share_rank_without_gaps() {
        let u = users(3);
        let ranked = dense_rank(vec![(u[2], 30), (u[0], 50), (u[1], 50)], 50);
        let ranks: Vec<_> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 1, 2]);
        assert_eq!(ranked[0].user_id, u[0]);
        assert_eq!(ranked[2].score, 30);
    }

    #[test]
    fn truncates_to_top_n() {
        let u = users(5);
        let scores = u.iter().zip([5u64, 4, 3, 2, 1]).map(|(id, s)| (*id, s)).collect();
        let ranked = dense_rank(scores, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked.last().map(|r| r.rank), Some(3));
    }

    #[test]
    fn empty_input_ranks_nothing() {
        assert!(dense_rank(Vec::new(), 50).is_empty());
    }

    #[test]
    fn weekly_window_starts_on_monday() {
        // 2025-06-12 is a Thursday.
        let now = Utc.with_ymd_and_hms(2025, 6, 12, 15, 30, 0).unwrap();
        let window = MetricType::WeeklyMatches.window(now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 6, 9, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap());
        assert!(window.contains(now));
    }

    #[test]
    fn monthly_window_rolls_over_year() {
        let now = Utc.with_ymd_and_hms(2025, 12, 20, 8, 0, 0).unwrap();
        let window = MetricType::MonthlyNewUsers.window(now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn metric_names_roundtrip() {
        for metric in MetricType::ALL {
            assert_eq!(metric.as_str().parse::<MetricType>().unwrap(), metric);
            assert_eq!(MetricType::from_byte(metric.as_byte()), Some(metric));
        }
        assert!("daily_hugs".parse::<MetricType>().is_err());
    }
}
