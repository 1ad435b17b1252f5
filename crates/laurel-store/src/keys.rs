//! Key encoding utilities for `RocksDB`.
//!
//! All multi-part keys are fixed-width prefixes followed by the variable part, so
//! prefix iteration yields records in a useful order:
//!
//! - progress and awards: `user_id || badge_id`, grouped by user
//! - activity: `tag || timestamp || event_id`, ordered by time within a kind
//! - leaderboard rows: `metric || generation || rank || user_id`, ordered by rank

use chrono::{DateTime, TimeZone, Utc};
use laurel_core::{ActivityTag, BadgeId, MetricType, UserId};

use crate::error::{Result, StoreError};

const ID_LEN: usize = 16;
const TS_LEN: usize = 8;

/// Create a badge key from a badge ID.
#[must_use]
pub fn badge_key(badge_id: &BadgeId) -> Vec<u8> {
    badge_id.as_bytes().to_vec()
}

/// Create a user key (accounts, streaks, members).
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a (user, badge) key for progress and award records.
///
/// Format: `user_id (16 bytes) || badge_id (16 bytes)`
#[must_use]
pub fn pair_key(user_id: &UserId, badge_id: &BadgeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(badge_id.as_bytes());
    key
}

/// Extract the user ID from a pair key or user-prefixed key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is too short.
pub fn user_from_key(key: &[u8]) -> Result<UserId> {
    id_bytes(key, 0).map(UserId::from_bytes)
}

/// Extract the badge ID from a pair key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is too short.
pub fn badge_from_pair_key(key: &[u8]) -> Result<BadgeId> {
    id_bytes(key, ID_LEN).map(BadgeId::from_bytes)
}

fn id_bytes(key: &[u8], offset: usize) -> Result<[u8; ID_LEN]> {
    key.get(offset..offset + ID_LEN)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| StoreError::Serialization(format!("malformed key of {} bytes", key.len())))
}

/// Encode a timestamp so that byte order matches time order.
#[must_use]
pub fn encode_ts(at: DateTime<Utc>) -> [u8; TS_LEN] {
    // Flipping the sign bit maps i64 order onto u64 order.
    #[allow(clippy::cast_sign_loss)]
    let shifted = (at.timestamp_millis() as u64) ^ (1 << 63);
    shifted.to_be_bytes()
}

/// Decode a timestamp produced by [`encode_ts`].
#[must_use]
pub fn decode_ts(bytes: [u8; TS_LEN]) -> DateTime<Utc> {
    #[allow(clippy::cast_possible_wrap)]
    let millis = (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Create an activity key.
///
/// Format: `tag (1 byte) || timestamp (8 bytes) || event_id`
#[must_use]
pub fn activity_key(tag: ActivityTag, at: DateTime<Utc>, event_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + TS_LEN + event_id.len());
    key.push(tag.as_byte());
    key.extend_from_slice(&encode_ts(at));
    key.extend_from_slice(event_id.as_bytes());
    key
}

/// Prefix of all activity of one kind.
#[must_use]
pub fn activity_prefix(tag: ActivityTag) -> Vec<u8> {
    vec![tag.as_byte()]
}

/// First key of activity of `tag` at or after `at`.
#[must_use]
pub fn activity_seek(tag: ActivityTag, at: DateTime<Utc>) -> Vec<u8> {
    let mut key = activity_prefix(tag);
    key.extend_from_slice(&encode_ts(at));
    key
}

/// Timestamp of an activity key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is too short.
pub fn activity_ts(key: &[u8]) -> Result<DateTime<Utc>> {
    key.get(1..=TS_LEN)
        .and_then(|s| <[u8; TS_LEN]>::try_from(s).ok())
        .map(decode_ts)
        .ok_or_else(|| StoreError::Serialization("malformed activity key".to_string()))
}

/// Create a per-user activity index key.
///
/// Format: `user_id (16 bytes) || activity_key`
#[must_use]
pub fn user_activity_key(user_id: &UserId, activity_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + activity_key.len());
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(activity_key);
    key
}

/// Prefix of a user's activity of one kind.
#[must_use]
pub fn user_activity_prefix(user_id: &UserId, tag: ActivityTag) -> Vec<u8> {
    user_activity_key(user_id, &activity_prefix(tag))
}

/// The activity key embedded in a per-user index key.
#[must_use]
pub fn activity_from_user_key(key: &[u8]) -> &[u8] {
    key.get(ID_LEN..).unwrap_or_default()
}

/// Create an event-id key used for deduplication.
#[must_use]
pub fn activity_event_key(event_id: &str) -> Vec<u8> {
    event_id.as_bytes().to_vec()
}

/// Key of a metric's current-generation pointer, and prefix of its rows.
#[must_use]
pub fn metric_key(metric: MetricType) -> Vec<u8> {
    vec![metric.as_byte()]
}

/// Create a generation key.
///
/// Format: `metric (1 byte) || generation (8 bytes)`
#[must_use]
pub fn generation_key(metric: MetricType, generation: u64) -> Vec<u8> {
    let mut key = metric_key(metric);
    key.extend_from_slice(&generation.to_be_bytes());
    key
}

/// Create a leaderboard row key.
///
/// Format: `metric (1) || generation (8) || rank (4) || user_id (16)`
#[must_use]
pub fn entry_key(metric: MetricType, generation: u64, rank: u32, user_id: &UserId) -> Vec<u8> {
    let mut key = generation_key(metric, generation);
    key.extend_from_slice(&rank.to_be_bytes());
    key.extend_from_slice(user_id.as_bytes());
    key
}

/// Encode a generation number (pointer value).
#[must_use]
pub fn encode_generation(generation: u64) -> [u8; 8] {
    generation.to_be_bytes()
}

/// Decode a generation number.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the value is not 8 bytes.
pub fn decode_generation(bytes: &[u8]) -> Result<u64> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| StoreError::Serialization("malformed generation pointer".to_string()))
}
