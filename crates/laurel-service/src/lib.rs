//! Laurel achievement engine.
//!
//! This crate turns a stream of user activity into badges, rewards, streaks and
//! leaderboards:
//!
//! - Badge registry (cached definitions)
//! - Progress tracking in increment and set modes
//! - Atomic, at-most-once awards with exactly one reward each
//! - Daily streaks with freezes
//! - Periodically recomputed, atomically swapped leaderboards
//!
//! # Usage
//!
//! Build an [`Engine`] over any [`laurel_store::Store`], feed it
//! [`laurel_core::ActivityEvent`]s through [`Engine::ingest`], and run the
//! [`Scheduler`] for the periodic jobs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod award;
pub mod blocking;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod leaderboard;
pub mod notify;
pub mod progress;
pub mod registry;
pub mod streak;

pub use award::{AwardOptions, AwardOutcome, RewardOutcome};
pub use blocking::StoreRunner;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, JobIntervals};
pub use engine::{
    BadgeCount, BadgeStats, BadgeView, EarnedBadge, Engine, IngestOutcome, SweepReport,
};
pub use error::{EngineError, Result};
pub use jobs::{Job, Scheduler};
pub use leaderboard::LeaderboardStats;
pub use notify::{Notification, NotificationSink, NotifyError, TracingSink};
pub use progress::ProgressOutcome;
pub use registry::BadgeRegistry;
pub use streak::{StreakUpdate, MAX_FREEZE_DAYS};
