//! Engine configuration.

use std::time::Duration;

use laurel_core::{DEFAULT_RETENTION_DAYS, DEFAULT_TOP_N};

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to `RocksDB` data directory (default: "/data/laurel").
    pub data_dir: String,

    /// How long the badge registry cache is trusted (default: 5 minutes).
    pub registry_ttl: Duration,

    /// Upper bound on a single store call (default: 5 seconds).
    pub store_timeout: Duration,

    /// Rows kept per leaderboard generation (default: 50).
    pub leaderboard_top_n: usize,

    /// Days non-current leaderboard generations are kept (default: 28).
    pub leaderboard_retention_days: i64,

    /// Minimum percentage for a close-to-earning nudge (default: 80).
    pub close_to_earning_threshold: u8,

    /// Whether to seed the default badge catalog at startup (default: true).
    pub seed_catalog: bool,

    /// Job intervals.
    pub jobs: JobIntervals,
}

/// How often each scheduled job runs.
#[derive(Debug, Clone)]
pub struct JobIntervals {
    /// Recompute every member's progress from the activity log (default: 1 hour).
    pub award_sweep: Duration,

    /// Clear expired streak freezes (default: 1 hour).
    pub freeze_cleanup: Duration,

    /// Recompute weekly leaderboards (default: 1 hour).
    pub weekly_leaderboards: Duration,

    /// Recompute all-time and monthly leaderboards (default: 6 hours).
    pub long_leaderboards: Duration,

    /// Purge old leaderboard generations (default: 24 hours).
    pub retention_purge: Duration,

    /// Send close-to-earning nudges (default: 24 hours).
    pub nudges: Duration,
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(name, default))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from `LAUREL_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("LAUREL_DATA_DIR").unwrap_or(defaults.data_dir),
            registry_ttl: env_secs("LAUREL_REGISTRY_TTL_SECONDS", 300),
            store_timeout: Duration::from_millis(env_parse("LAUREL_STORE_TIMEOUT_MS", 5_000)),
            leaderboard_top_n: env_parse("LAUREL_LEADERBOARD_TOP_N", DEFAULT_TOP_N),
            leaderboard_retention_days: env_parse(
                "LAUREL_LEADERBOARD_RETENTION_DAYS",
                DEFAULT_RETENTION_DAYS,
            ),
            close_to_earning_threshold: env_parse("LAUREL_CLOSE_TO_EARNING_THRESHOLD", 80),
            seed_catalog: env_parse("LAUREL_SEED_CATALOG", true),
            jobs: JobIntervals {
                award_sweep: env_secs("LAUREL_AWARD_SWEEP_SECONDS", 3_600),
                freeze_cleanup: env_secs("LAUREL_FREEZE_CLEANUP_SECONDS", 3_600),
                weekly_leaderboards: env_secs("LAUREL_WEEKLY_LEADERBOARD_SECONDS", 3_600),
                long_leaderboards: env_secs("LAUREL_LONG_LEADERBOARD_SECONDS", 21_600),
                retention_purge: env_secs("LAUREL_RETENTION_PURGE_SECONDS", 86_400),
                nudges: env_secs("LAUREL_NUDGE_SECONDS", 86_400),
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: "/data/laurel".into(),
            registry_ttl: Duration::from_secs(300),
            store_timeout: Duration::from_secs(5),
            leaderboard_top_n: DEFAULT_TOP_N,
            leaderboard_retention_days: DEFAULT_RETENTION_DAYS,
            close_to_earning_threshold: 80,
            seed_catalog: true,
            jobs: JobIntervals::default(),
        }
    }
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            award_sweep: Duration::from_secs(3_600),
            freeze_cleanup: Duration::from_secs(3_600),
            weekly_leaderboards: Duration::from_secs(3_600),
            long_leaderboards: Duration::from_secs(21_600),
            retention_purge: Duration::from_secs(86_400),
            nudges: Duration::from_secs(86_400),
        }
    }
}
