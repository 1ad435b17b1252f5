//! Storage layer for laurel.
//!
//! This crate provides persistent storage for badge definitions, progress, awards,
//! member accounts, streaks, the raw activity log and leaderboard generations.
//!
//! # Backends
//!
//! - [`RocksStore`] (feature `rocksdb-backend`, on by default): column families
//!   with CBOR values, atomic `WriteBatch` commits and striped key locks.
//! - [`MemoryStore`]: everything behind one mutex. Used by tests and by builds
//!   without `RocksDB`.
//!
//! # Atomicity
//!
//! The operations that carry correctness invariants are single trait methods so
//! that every backend can make them atomic:
//!
//! - [`Store::award_badge`]: existence check, award insert and reward application.
//! - [`Store::update_progress`]: read-modify-write of one progress counter.
//! - [`Store::swap_leaderboard`]: demote the previous generation and install the
//!   new one in a single commit.
//!
//! # Example
//!
//! ```no_run
//! use laurel_store::{MemoryStore, Store};
//! use laurel_core::default_catalog;
//!
//! let store = MemoryStore::new();
//! for badge in default_catalog() {
//!     store.put_badge(&badge).unwrap();
//! }
//! assert_eq!(store.list_badges().unwrap().len(), 8);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod locks;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use locks::KeyLocks;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, NaiveDate, Utc};
use laurel_core::{
    ActivityEvent, ActivityTag, AwardRecord, AwardRequirement, BadgeDefinition, BadgeId,
    GenerationMeta, LeaderboardEntry, LeaderboardWindow, Member, MemberAccount, MetricType,
    ProgressChange, ProgressRecord, ProgressUpdate, RankedScore, Reward, StreakFreeze,
    StreakRecord, StreakTransition, UserId,
};

/// Input to [`Store::award_badge`].
#[derive(Debug, Clone)]
pub struct AwardGrant {
    /// The user receiving the badge.
    pub user_id: UserId,
    /// The badge.
    pub badge_id: BadgeId,
    /// Precondition checked inside the transaction.
    pub requirement: AwardRequirement,
    /// Reward to apply, or `None` to award without one.
    pub reward: Option<Reward>,
    /// Award timestamp.
    pub now: DateTime<Utc>,
}

/// Outcome of [`Store::award_badge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardCommit {
    /// The award was inserted (and the reward applied, if any).
    Granted {
        /// The new award.
        award: AwardRecord,
        /// Account after the reward, if a reward was applied.
        account: Option<MemberAccount>,
    },
    /// An award already existed; nothing was written.
    AlreadyEarned(AwardRecord),
    /// The milestone requirement is not met; nothing was written.
    NotEligible {
        /// Stored progress count at check time.
        count: u64,
    },
}

/// Aggregate counts across all current leaderboards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderboardCounts {
    /// Rows in current generations.
    pub current_entries: usize,
    /// Metrics with a current generation.
    pub active_metrics: usize,
    /// Number of current rows per user.
    pub entries_by_user: Vec<(UserId, usize)>,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (`RocksDB`, in-memory for testing). All methods are blocking.
pub trait Store: Send + Sync {
    // =========================================================================
    // Badge Definitions
    // =========================================================================

    /// Insert or replace a badge definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_badge(&self, badge: &BadgeDefinition) -> Result<()>;

    /// Get a badge definition by ID, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_badge(&self, badge_id: &BadgeId) -> Result<Option<BadgeDefinition>>;

    /// List every badge definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_badges(&self) -> Result<Vec<BadgeDefinition>>;

    // =========================================================================
    // Progress
    // =========================================================================

    /// Get progress of a user toward a badge.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_progress(&self, user_id: &UserId, badge_id: &BadgeId)
        -> Result<Option<ProgressRecord>>;

    /// List all progress records of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_progress_by_user(&self, user_id: &UserId) -> Result<Vec<ProgressRecord>>;

    /// List all progress records toward a badge.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_progress_by_badge(&self, badge_id: &BadgeId) -> Result<Vec<ProgressRecord>>;

    /// Apply an update to a progress counter, creating the record if missing.
    ///
    /// `milestone` is the badge's current milestone; it is stored as the snapshot
    /// on creation and used for the percentage on every update.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_progress(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
        milestone: u32,
        update: ProgressUpdate,
        now: DateTime<Utc>,
    ) -> Result<ProgressChange>;

    /// Claim the close-to-earning nudge of a progress record.
    ///
    /// Returns `true` only for the call that set `nudged_at`; a missing record or
    /// one already nudged returns `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn mark_progress_nudged(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // =========================================================================
    // Awards
    // =========================================================================

    /// Get the award of a badge to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_award(&self, user_id: &UserId, badge_id: &BadgeId) -> Result<Option<AwardRecord>>;

    /// List a user's awards, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_awards_by_user(&self, user_id: &UserId) -> Result<Vec<AwardRecord>>;

    /// Number of awards held per user (users with none are omitted).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_awards_by_user(&self) -> Result<Vec<(UserId, u64)>>;

    /// Number of holders per badge (badges never awarded are omitted).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_awards_by_badge(&self) -> Result<Vec<(BadgeId, u64)>>;

    /// Atomically check for an existing award, insert one and apply the reward.
    ///
    /// Concurrent calls for the same (user, badge) are linearized: exactly one
    /// returns `Granted`. On error nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn award_badge(&self, grant: &AwardGrant) -> Result<AwardCommit>;

    /// Set the `notified` flag on an award. Returns `false` if there is no award.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn mark_award_notified(&self, user_id: &UserId, badge_id: &BadgeId) -> Result<bool>;

    /// Clear the `is_new` flag on all of a user's awards. Returns how many changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn acknowledge_awards(&self, user_id: &UserId) -> Result<usize>;

    // =========================================================================
    // Member Accounts
    // =========================================================================

    /// Get the reward-bearing account of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, user_id: &UserId) -> Result<Option<MemberAccount>>;

    // =========================================================================
    // Streaks
    // =========================================================================

    /// Get a user's streak.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_streak(&self, user_id: &UserId) -> Result<Option<StreakRecord>>;

    /// List all streaks.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_streaks(&self) -> Result<Vec<StreakRecord>>;

    /// Start or advance a user's streak for activity on `today`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_streak_activity(
        &self,
        user_id: &UserId,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(StreakRecord, StreakTransition)>;

    /// Install a freeze on an existing streak.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user has no streak.
    fn set_streak_freeze(
        &self,
        user_id: &UserId,
        freeze: StreakFreeze,
        now: DateTime<Utc>,
    ) -> Result<StreakRecord>;

    /// Remove freezes that no longer cover `today`. Returns how many were cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn clear_expired_freezes(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<usize>;

    // =========================================================================
    // Activity Log
    // =========================================================================

    /// Append an activity event and update the member rows of credited users.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateEvent` if the event id was seen before.
    fn record_activity(&self, event: &ActivityEvent) -> Result<()>;

    /// Whether an event id has been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn has_activity(&self, event_id: &str) -> Result<bool>;

    /// Number of events of a kind credited to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_user_activity(&self, user_id: &UserId, tag: ActivityTag) -> Result<u64>;

    /// The most recent event of a kind credited to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn latest_user_activity(
        &self,
        user_id: &UserId,
        tag: ActivityTag,
    ) -> Result<Option<ActivityEvent>>;

    /// Events of a kind that occurred inside `window`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_activity(&self, tag: ActivityTag, window: &LeaderboardWindow)
        -> Result<Vec<ActivityEvent>>;

    /// Get a member row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_member(&self, user_id: &UserId) -> Result<Option<Member>>;

    /// List all members.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_members(&self) -> Result<Vec<Member>>;

    // =========================================================================
    // Leaderboards
    // =========================================================================

    /// Install `entries` as the new current generation of `metric`.
    ///
    /// The previous current rows are flipped to not-current and the new rows are
    /// inserted as current in one atomic commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is changed.
    fn swap_leaderboard(
        &self,
        metric: MetricType,
        window: LeaderboardWindow,
        entries: &[RankedScore],
        now: DateTime<Utc>,
    ) -> Result<GenerationMeta>;

    /// Up to `limit` rows of the current generation, by rank.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn current_leaderboard(&self, metric: MetricType, limit: usize)
        -> Result<Vec<LeaderboardEntry>>;

    /// A user's row in the current generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn user_rank(&self, user_id: &UserId, metric: MetricType)
        -> Result<Option<LeaderboardEntry>>;

    /// Metadata of the current generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn current_generation(&self, metric: MetricType) -> Result<Option<GenerationMeta>>;

    /// Counts over all current generations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn leaderboard_counts(&self) -> Result<LeaderboardCounts>;

    /// Delete non-current generations computed before `cutoff`. Returns rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn purge_leaderboards(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Build the rows of a new generation.
#[must_use]
pub fn generation_entries(
    metric: MetricType,
    generation: u64,
    window: LeaderboardWindow,
    ranked: &[RankedScore],
    now: DateTime<Utc>,
) -> Vec<LeaderboardEntry> {
    ranked
        .iter()
        .map(|r| LeaderboardEntry {
            metric,
            generation,
            user_id: r.user_id,
            rank: r.rank,
            score: r.score,
            window,
            is_current: true,
            computed_at: now,
        })
        .collect()
}

/// Decide the outcome of an award request given what is stored.
///
/// Shared by all backends so the check-then-insert rules cannot drift.
#[must_use]
pub fn decide_award(
    grant: &AwardGrant,
    existing: Option<AwardRecord>,
    progress_count: u64,
    account: Option<MemberAccount>,
) -> AwardCommit {
    if let Some(award) = existing {
        return AwardCommit::AlreadyEarned(award);
    }
    if let AwardRequirement::Milestone(milestone) = grant.requirement {
        if progress_count < u64::from(milestone) {
            return AwardCommit::NotEligible {
                count: progress_count,
            };
        }
    }

    let account = grant.reward.as_ref().map(|reward| {
        let current = account.unwrap_or_else(|| MemberAccount::new(grant.user_id, grant.now));
        reward.apply(current, grant.now)
    });
    let award = AwardRecord::new(
        grant.user_id,
        grant.badge_id,
        grant.requirement.source(),
        account.is_some(),
        grant.now,
    );
    AwardCommit::Granted { award, account }
}
