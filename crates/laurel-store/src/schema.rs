//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Badge definitions, keyed by `badge_id`.
    pub const BADGES: &str = "badges";

    /// Progress records, keyed by `user_id || badge_id`.
    pub const PROGRESS: &str = "progress";

    /// Award records, keyed by `user_id || badge_id`.
    pub const AWARDS: &str = "awards";

    /// Reward-bearing member accounts, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Streak records, keyed by `user_id`.
    pub const STREAKS: &str = "streaks";

    /// Leaderboard rows, keyed by `metric || generation || rank || user_id`.
    pub const LEADERBOARD_ENTRIES: &str = "leaderboard_entries";

    /// Generation metadata, keyed by `metric || generation`.
    pub const LEADERBOARD_GENERATIONS: &str = "leaderboard_generations";

    /// Current generation per metric, keyed by `metric`. Value is the generation (u64 BE).
    pub const LEADERBOARD_CURRENT: &str = "leaderboard_current";

    /// Activity events, keyed by `tag || timestamp || event_id`.
    pub const ACTIVITY: &str = "activity";

    /// Index: activity by credited user, keyed by `user_id || activity key`.
    /// Value is empty (index only).
    pub const ACTIVITY_BY_USER: &str = "activity_by_user";

    /// Seen event ids for idempotency, keyed by `event_id`. Value is the activity key.
    pub const ACTIVITY_EVENTS: &str = "activity_events";

    /// Members seen in activity, keyed by `user_id`.
    pub const MEMBERS: &str = "members";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::BADGES,
        cf::PROGRESS,
        cf::AWARDS,
        cf::ACCOUNTS,
        cf::STREAKS,
        cf::LEADERBOARD_ENTRIES,
        cf::LEADERBOARD_GENERATIONS,
        cf::LEADERBOARD_CURRENT,
        cf::ACTIVITY,
        cf::ACTIVITY_BY_USER,
        cf::ACTIVITY_EVENTS,
        cf::MEMBERS,
    ]
}
