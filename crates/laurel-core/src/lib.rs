//! Core types and state transitions for laurel.
//!
//! This crate provides the foundational types used throughout the achievement engine:
//!
//! - **Identifiers**: `UserId`, `BadgeId`
//! - **Badges**: `BadgeDefinition`, `Rarity`, `BadgeCategory`, `Reward`
//! - **Progress**: `ProgressRecord`, `ProgressUpdate`
//! - **Awards**: `AwardRecord`, `AwardRequirement`
//! - **Accounts**: `MemberAccount` (what rewards are applied to)
//! - **Streaks**: `StreakRecord`, `StreakFreeze`
//! - **Activity**: `ActivityEvent`, `ActivityKind`, `Member`
//! - **Leaderboards**: `MetricType`, `LeaderboardEntry`, `dense_rank`
//!
//! Every state change that matters for correctness (progress updates, reward
//! application, streak transitions, ranking) is a pure function here. Storage
//! backends only decide *when* to call them under the right locks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod activity;
pub mod award;
pub mod badge;
pub mod catalog;
pub mod error;
pub mod ids;
pub mod leaderboard;
pub mod progress;
pub mod streak;

pub use account::MemberAccount;
pub use activity::{ActivityEvent, ActivityKind, ActivityTag, Member, ProfileFields};
pub use award::{AwardRecord, AwardRequirement, AwardSource};
pub use badge::{
    BadgeCategory, BadgeDefinition, Rarity, Reward, RewardDescriptor, RewardError, RewardKind,
};
pub use catalog::default_catalog;
pub use error::{LaurelError, Result};
pub use ids::{BadgeId, IdError, UserId};
pub use leaderboard::{
    dense_rank, GenerationMeta, LeaderboardEntry, LeaderboardWindow, MetricType, RankedScore,
    DEFAULT_RETENTION_DAYS, DEFAULT_TOP_N,
};
pub use progress::{percentage, ProgressChange, ProgressRecord, ProgressUpdate};
pub use streak::{StreakFreeze, StreakRecord, StreakTransition};
