//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//!
//! Single-key reads go straight to the database. Every read-modify-write takes
//! the [`KeyLocks`] stripes of the keys it touches, reads, computes the new state
//! with the pure transitions from `laurel_core`, and commits one `WriteBatch`.
//! Leaderboard readers use a snapshot so the pointer and the rows it names are
//! always read from the same point in time.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tracing::debug;

use laurel_core::{
    ActivityEvent, ActivityTag, AwardRecord, BadgeDefinition, BadgeId, GenerationMeta,
    LeaderboardEntry, LeaderboardWindow, Member, MemberAccount, MetricType, ProgressChange,
    ProgressRecord, ProgressUpdate, RankedScore, StreakFreeze, StreakRecord, StreakTransition,
    UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::locks::KeyLocks;
use crate::schema::{all_column_families, cf};
use crate::{decide_award, generation_entries, AwardCommit, AwardGrant, LeaderboardCounts, Store};

type Row = (Box<[u8]>, Box<[u8]>);

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: KeyLocks,
}

#[allow(clippy::needless_pass_by_value)]
fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Lock-table key: the column family name keeps equal keys in different
/// families on independent stripes.
fn lock_key(family: &str, key: &[u8]) -> Vec<u8> {
    [family.as_bytes(), key].concat()
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            locks: KeyLocks::default(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put<T: serde::Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        let value = Self::serialize(value)?;
        self.db.put_cf(&cf, key, value).map_err(db_err)
    }

    /// All rows whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, family: &str, prefix: &[u8]) -> Result<Vec<Row>> {
        let cf = self.cf(family)?;
        let mut rows = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key, value));
        }
        Ok(rows)
    }

    fn scan_values<T: serde::de::DeserializeOwned>(
        &self,
        family: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        self.scan_prefix(family, prefix)?
            .iter()
            .map(|(_, value)| Self::deserialize(value))
            .collect()
    }

    fn current_pointer(&self, metric: MetricType) -> Result<Option<u64>> {
        let cf = self.cf(cf::LEADERBOARD_CURRENT)?;
        self.db
            .get_cf(&cf, keys::metric_key(metric))
            .map_err(db_err)?
            .map(|v| keys::decode_generation(&v))
            .transpose()
    }

    /// Rows of the current generation, read from one snapshot.
    fn current_rows(&self, metric: MetricType, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let cf_current = self.cf(cf::LEADERBOARD_CURRENT)?;
        let cf_entries = self.cf(cf::LEADERBOARD_ENTRIES)?;
        let snapshot = self.db.snapshot();

        let Some(generation) = snapshot
            .get_cf(&cf_current, keys::metric_key(metric))
            .map_err(db_err)?
            .map(|v| keys::decode_generation(&v))
            .transpose()?
        else {
            return Ok(Vec::new());
        };

        let prefix = keys::generation_key(metric, generation);
        let mut rows = Vec::new();
        for item in snapshot.iterator_cf(&cf_entries, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item.map_err(db_err)?;
            if rows.len() >= limit || !key.starts_with(&prefix) {
                break;
            }
            rows.push(Self::deserialize(&value)?);
        }
        Ok(rows)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Badge Definitions
    // =========================================================================

    fn put_badge(&self, badge: &BadgeDefinition) -> Result<()> {
        self.put(cf::BADGES, &keys::badge_key(&badge.id), badge)
    }

    fn get_badge(&self, badge_id: &BadgeId) -> Result<Option<BadgeDefinition>> {
        self.get(cf::BADGES, &keys::badge_key(badge_id))
    }

    fn list_badges(&self) -> Result<Vec<BadgeDefinition>> {
        self.scan_values(cf::BADGES, &[])
    }

    // =========================================================================
    // Progress
    // =========================================================================

    fn get_progress(&self, user_id: &UserId, badge_id: &BadgeId) -> Result<Option<ProgressRecord>> {
        self.get(cf::PROGRESS, &keys::pair_key(user_id, badge_id))
    }

    fn list_progress_by_user(&self, user_id: &UserId) -> Result<Vec<ProgressRecord>> {
        self.scan_values(cf::PROGRESS, &keys::user_key(user_id))
    }

    fn list_progress_by_badge(&self, badge_id: &BadgeId) -> Result<Vec<ProgressRecord>> {
        let mut records = Vec::new();
        for (key, value) in self.scan_prefix(cf::PROGRESS, &[])? {
            if keys::badge_from_pair_key(&key)? == *badge_id {
                records.push(Self::deserialize(&value)?);
            }
        }
        Ok(records)
    }

    fn update_progress(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
        milestone: u32,
        update: ProgressUpdate,
        now: DateTime<Utc>,
    ) -> Result<ProgressChange> {
        let key = keys::pair_key(user_id, badge_id);
        let lock = lock_key(cf::PROGRESS, &key);
        let _guard = self.locks.lock(&[lock.as_slice()]);

        let record = self
            .get::<ProgressRecord>(cf::PROGRESS, &key)?
            .unwrap_or_else(|| ProgressRecord::new(*user_id, *badge_id, milestone, now));
        let change = record.apply(update, milestone, now);
        self.put(cf::PROGRESS, &key, &change.record)?;

        Ok(change)
    }

    fn mark_progress_nudged(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let key = keys::pair_key(user_id, badge_id);
        let lock = lock_key(cf::PROGRESS, &key);
        let _guard = self.locks.lock(&[lock.as_slice()]);

        let Some(mut record) = self.get::<ProgressRecord>(cf::PROGRESS, &key)? else {
            return Ok(false);
        };
        if record.nudged_at.is_some() {
            return Ok(false);
        }
        record.nudged_at = Some(now);
        self.put(cf::PROGRESS, &key, &record)?;
        Ok(true)
    }

    // =========================================================================
    // Awards
    // =========================================================================

    fn get_award(&self, user_id: &UserId, badge_id: &BadgeId) -> Result<Option<AwardRecord>> {
        self.get(cf::AWARDS, &keys::pair_key(user_id, badge_id))
    }

    fn list_awards_by_user(&self, user_id: &UserId) -> Result<Vec<AwardRecord>> {
        let mut awards: Vec<AwardRecord> = self.scan_values(cf::AWARDS, &keys::user_key(user_id))?;
        awards.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));
        Ok(awards)
    }

    fn count_awards_by_user(&self) -> Result<Vec<(UserId, u64)>> {
        let mut counts: BTreeMap<UserId, u64> = BTreeMap::new();
        for (key, _) in self.scan_prefix(cf::AWARDS, &[])? {
            *counts.entry(keys::user_from_key(&key)?).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    fn count_awards_by_badge(&self) -> Result<Vec<(BadgeId, u64)>> {
        let mut counts: BTreeMap<BadgeId, u64> = BTreeMap::new();
        for (key, _) in self.scan_prefix(cf::AWARDS, &[])? {
            *counts.entry(keys::badge_from_pair_key(&key)?).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    fn award_badge(&self, grant: &AwardGrant) -> Result<AwardCommit> {
        let pair = keys::pair_key(&grant.user_id, &grant.badge_id);
        let user = keys::user_key(&grant.user_id);
        let award_lock = lock_key(cf::AWARDS, &pair);
        let account_lock = lock_key(cf::ACCOUNTS, &user);
        let progress_lock = lock_key(cf::PROGRESS, &pair);
        let _guard = self.locks.lock(&[
            award_lock.as_slice(),
            account_lock.as_slice(),
            progress_lock.as_slice(),
        ]);

        let existing = self.get::<AwardRecord>(cf::AWARDS, &pair)?;
        let count = self
            .get::<ProgressRecord>(cf::PROGRESS, &pair)?
            .map_or(0, |p| p.current_count);
        let account = if grant.reward.is_some() {
            self.get::<MemberAccount>(cf::ACCOUNTS, &user)?
        } else {
            None
        };

        let commit = decide_award(grant, existing, count, account);

        if let AwardCommit::Granted { award, account } = &commit {
            let cf_awards = self.cf(cf::AWARDS)?;
            let cf_accounts = self.cf(cf::ACCOUNTS)?;

            // Write atomically
            let mut batch = WriteBatch::default();
            batch.put_cf(&cf_awards, &pair, Self::serialize(award)?);
            if let Some(account) = account {
                batch.put_cf(&cf_accounts, &user, Self::serialize(account)?);
            }
            self.db.write(batch).map_err(db_err)?;

            debug!(
                user_id = %grant.user_id,
                badge_id = %grant.badge_id,
                reward_claimed = award.reward_claimed,
                "Award committed"
            );
        }

        Ok(commit)
    }

    fn mark_award_notified(&self, user_id: &UserId, badge_id: &BadgeId) -> Result<bool> {
        let key = keys::pair_key(user_id, badge_id);
        let lock = lock_key(cf::AWARDS, &key);
        let _guard = self.locks.lock(&[lock.as_slice()]);

        let Some(mut award) = self.get::<AwardRecord>(cf::AWARDS, &key)? else {
            return Ok(false);
        };
        if !award.notified {
            award.notified = true;
            self.put(cf::AWARDS, &key, &award)?;
        }
        Ok(true)
    }

    fn acknowledge_awards(&self, user_id: &UserId) -> Result<usize> {
        let rows = self.scan_prefix(cf::AWARDS, &keys::user_key(user_id))?;
        let locks: Vec<Vec<u8>> = rows.iter().map(|(k, _)| lock_key(cf::AWARDS, k)).collect();
        let lock_refs: Vec<&[u8]> = locks.iter().map(Vec::as_slice).collect();
        let _guard = self.locks.lock(&lock_refs);

        let cf_awards = self.cf(cf::AWARDS)?;
        let mut batch = WriteBatch::default();
        let mut changed = 0;
        for (key, _) in &rows {
            // Re-read under the lock.
            let Some(mut award) = self.get::<AwardRecord>(cf::AWARDS, key)? else {
                continue;
            };
            if award.is_new {
                award.is_new = false;
                batch.put_cf(&cf_awards, key, Self::serialize(&award)?);
                changed += 1;
            }
        }
        self.db.write(batch).map_err(db_err)?;

        Ok(changed)
    }

    // =========================================================================
    // Member Accounts
    // =========================================================================

    fn get_account(&self, user_id: &UserId) -> Result<Option<MemberAccount>> {
        self.get(cf::ACCOUNTS, &keys::user_key(user_id))
    }

    // =========================================================================
    // Streaks
    // =========================================================================

    fn get_streak(&self, user_id: &UserId) -> Result<Option<StreakRecord>> {
        self.get(cf::STREAKS, &keys::user_key(user_id))
    }

    fn list_streaks(&self) -> Result<Vec<StreakRecord>> {
        self.scan_values(cf::STREAKS, &[])
    }

    fn record_streak_activity(
        &self,
        user_id: &UserId,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(StreakRecord, StreakTransition)> {
        let key = keys::user_key(user_id);
        let lock = lock_key(cf::STREAKS, &key);
        let _guard = self.locks.lock(&[lock.as_slice()]);

        let (record, transition) = match self.get::<StreakRecord>(cf::STREAKS, &key)? {
            Some(mut record) => {
                let transition = record.record_activity(today, now);
                (record, transition)
            }
            None => (
                StreakRecord::start(*user_id, today, now),
                StreakTransition::Started,
            ),
        };
        if transition.is_change() {
            self.put(cf::STREAKS, &key, &record)?;
        }

        Ok((record, transition))
    }

    fn set_streak_freeze(
        &self,
        user_id: &UserId,
        freeze: StreakFreeze,
        now: DateTime<Utc>,
    ) -> Result<StreakRecord> {
        let key = keys::user_key(user_id);
        let lock = lock_key(cf::STREAKS, &key);
        let _guard = self.locks.lock(&[lock.as_slice()]);

        let mut record = self
            .get::<StreakRecord>(cf::STREAKS, &key)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "streak",
                id: user_id.to_string(),
            })?;
        record.freeze = Some(freeze);
        record.updated_at = now;
        self.put(cf::STREAKS, &key, &record)?;

        Ok(record)
    }

    fn clear_expired_freezes(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<usize> {
        let mut cleared = 0;
        for (key, value) in self.scan_prefix(cf::STREAKS, &[])? {
            let record: StreakRecord = Self::deserialize(&value)?;
            if record.freeze.map_or(true, |f| f.covers(today)) {
                continue;
            }

            let lock = lock_key(cf::STREAKS, &key);
            let _guard = self.locks.lock(&[lock.as_slice()]);
            if let Some(mut record) = self.get::<StreakRecord>(cf::STREAKS, &key)? {
                if record.clear_expired_freeze(today, now) {
                    self.put(cf::STREAKS, &key, &record)?;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    // =========================================================================
    // Activity Log
    // =========================================================================

    fn record_activity(&self, event: &ActivityEvent) -> Result<()> {
        let event_key = keys::activity_event_key(&event.event_id);
        let credited = event.kind.credited_users();

        let mut lock_keys = vec![lock_key(cf::ACTIVITY_EVENTS, &event_key)];
        lock_keys.extend(
            credited
                .iter()
                .map(|u| lock_key(cf::MEMBERS, &keys::user_key(u))),
        );
        let lock_refs: Vec<&[u8]> = lock_keys.iter().map(Vec::as_slice).collect();
        let _guard = self.locks.lock(&lock_refs);

        // Check for duplicate event
        if self.has_activity(&event.event_id)? {
            return Err(StoreError::DuplicateEvent {
                event_id: event.event_id.clone(),
            });
        }

        let cf_activity = self.cf(cf::ACTIVITY)?;
        let cf_by_user = self.cf(cf::ACTIVITY_BY_USER)?;
        let cf_events = self.cf(cf::ACTIVITY_EVENTS)?;
        let cf_members = self.cf(cf::MEMBERS)?;

        let activity_key = keys::activity_key(event.kind.tag(), event.occurred_at, &event.event_id);

        // Write atomically
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_activity, &activity_key, Self::serialize(event)?);
        batch.put_cf(&cf_events, &event_key, &activity_key);
        for user_id in &credited {
            batch.put_cf(&cf_by_user, keys::user_activity_key(user_id, &activity_key), []);

            let member_key = keys::user_key(user_id);
            let member = match self.get::<Member>(cf::MEMBERS, &member_key)? {
                Some(mut member) => {
                    member.observe(event.occurred_at);
                    member
                }
                None => Member::new(*user_id, event.occurred_at),
            };
            batch.put_cf(&cf_members, &member_key, Self::serialize(&member)?);
        }
        self.db.write(batch).map_err(db_err)?;

        Ok(())
    }

    fn has_activity(&self, event_id: &str) -> Result<bool> {
        let cf = self.cf(cf::ACTIVITY_EVENTS)?;
        let exists = self
            .db
            .get_cf(&cf, keys::activity_event_key(event_id))
            .map_err(db_err)?
            .is_some();
        Ok(exists)
    }

    fn count_user_activity(&self, user_id: &UserId, tag: ActivityTag) -> Result<u64> {
        let rows = self.scan_prefix(cf::ACTIVITY_BY_USER, &keys::user_activity_prefix(user_id, tag))?;
        Ok(rows.len() as u64)
    }

    fn latest_user_activity(
        &self,
        user_id: &UserId,
        tag: ActivityTag,
    ) -> Result<Option<ActivityEvent>> {
        let cf = self.cf(cf::ACTIVITY_BY_USER)?;
        let prefix = keys::user_activity_prefix(user_id, tag);
        // Seek just past the tag's key range, then step backwards.
        let upper = keys::user_activity_key(user_id, &[tag.as_byte().saturating_add(1)]);

        let mut iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&upper, Direction::Reverse));
        let Some(item) = iter.next() else {
            return Ok(None);
        };
        let (key, _) = item.map_err(db_err)?;
        if !key.starts_with(&prefix) {
            return Ok(None);
        }
        self.get(cf::ACTIVITY, keys::activity_from_user_key(&key))
    }

    fn list_activity(
        &self,
        tag: ActivityTag,
        window: &LeaderboardWindow,
    ) -> Result<Vec<ActivityEvent>> {
        let cf = self.cf(cf::ACTIVITY)?;
        let prefix = keys::activity_prefix(tag);
        let start = keys::activity_seek(tag, window.start);

        let mut events = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) || keys::activity_ts(&key)? >= window.end {
                break;
            }
            events.push(Self::deserialize(&value)?);
        }
        Ok(events)
    }

    fn get_member(&self, user_id: &UserId) -> Result<Option<Member>> {
        self.get(cf::MEMBERS, &keys::user_key(user_id))
    }

    fn list_members(&self) -> Result<Vec<Member>> {
        self.scan_values(cf::MEMBERS, &[])
    }

    // =========================================================================
    // Leaderboards
    // =========================================================================

    fn swap_leaderboard(
        &self,
        metric: MetricType,
        window: LeaderboardWindow,
        entries: &[RankedScore],
        now: DateTime<Utc>,
    ) -> Result<GenerationMeta> {
        let pointer_key = keys::metric_key(metric);
        let lock = lock_key(cf::LEADERBOARD_CURRENT, &pointer_key);
        let _guard = self.locks.lock(&[lock.as_slice()]);

        let cf_current = self.cf(cf::LEADERBOARD_CURRENT)?;
        let cf_entries = self.cf(cf::LEADERBOARD_ENTRIES)?;
        let cf_generations = self.cf(cf::LEADERBOARD_GENERATIONS)?;

        let previous = self.current_pointer(metric)?;
        let generation = previous.map_or(1, |g| g + 1);

        let mut batch = WriteBatch::default();
        if let Some(previous) = previous {
            let prefix = keys::generation_key(metric, previous);
            for (key, value) in self.scan_prefix(cf::LEADERBOARD_ENTRIES, &prefix)? {
                let mut row: LeaderboardEntry = Self::deserialize(&value)?;
                row.is_current = false;
                batch.put_cf(&cf_entries, &key, Self::serialize(&row)?);
            }
        }

        let rows = generation_entries(metric, generation, window, entries, now);
        for row in &rows {
            batch.put_cf(
                &cf_entries,
                keys::entry_key(metric, generation, row.rank, &row.user_id),
                Self::serialize(row)?,
            );
        }

        let meta = GenerationMeta {
            metric,
            generation,
            window,
            entry_count: u32::try_from(rows.len()).unwrap_or(u32::MAX),
            computed_at: now,
        };
        batch.put_cf(
            &cf_generations,
            keys::generation_key(metric, generation),
            Self::serialize(&meta)?,
        );
        batch.put_cf(&cf_current, &pointer_key, keys::encode_generation(generation));

        self.db.write(batch).map_err(db_err)?;

        debug!(
            metric = %metric,
            generation,
            entries = rows.len(),
            "Leaderboard generation installed"
        );

        Ok(meta)
    }

    fn current_leaderboard(
        &self,
        metric: MetricType,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        self.current_rows(metric, limit)
    }

    fn user_rank(&self, user_id: &UserId, metric: MetricType) -> Result<Option<LeaderboardEntry>> {
        Ok(self
            .current_rows(metric, usize::MAX)?
            .into_iter()
            .find(|row| row.user_id == *user_id))
    }

    fn current_generation(&self, metric: MetricType) -> Result<Option<GenerationMeta>> {
        match self.current_pointer(metric)? {
            Some(generation) => self.get(
                cf::LEADERBOARD_GENERATIONS,
                &keys::generation_key(metric, generation),
            ),
            None => Ok(None),
        }
    }

    fn leaderboard_counts(&self) -> Result<LeaderboardCounts> {
        let mut counts = LeaderboardCounts::default();
        let mut by_user: BTreeMap<UserId, usize> = BTreeMap::new();
        for metric in MetricType::ALL {
            let rows = self.current_rows(metric, usize::MAX)?;
            if self.current_pointer(metric)?.is_some() {
                counts.active_metrics += 1;
            }
            counts.current_entries += rows.len();
            for row in rows {
                *by_user.entry(row.user_id).or_default() += 1;
            }
        }
        counts.entries_by_user = by_user.into_iter().collect();
        Ok(counts)
    }

    fn purge_leaderboards(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cf_entries = self.cf(cf::LEADERBOARD_ENTRIES)?;
        let cf_generations = self.cf(cf::LEADERBOARD_GENERATIONS)?;
        let mut deleted = 0;

        for metric in MetricType::ALL {
            let pointer_key = keys::metric_key(metric);
            let lock = lock_key(cf::LEADERBOARD_CURRENT, &pointer_key);
            let _guard = self.locks.lock(&[lock.as_slice()]);
            let current = self.current_pointer(metric)?;

            let mut batch = WriteBatch::default();
            for (key, value) in self.scan_prefix(cf::LEADERBOARD_GENERATIONS, &pointer_key)? {
                let meta: GenerationMeta = Self::deserialize(&value)?;
                if Some(meta.generation) == current || meta.computed_at >= cutoff {
                    continue;
                }
                for (row_key, _) in self.scan_prefix(cf::LEADERBOARD_ENTRIES, &key)? {
                    batch.delete_cf(&cf_entries, &row_key);
                    deleted += 1;
                }
                batch.delete_cf(&cf_generations, &key);
            }
            self.db.write(batch).map_err(db_err)?;
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use laurel_core::{default_catalog, dense_rank, ActivityKind, AwardRequirement, Reward};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn badge_crud() {
        let (store, _dir) = create_test_store();
        for badge in default_catalog() {
            store.put_badge(&badge).unwrap();
        }

        let badges = store.list_badges().unwrap();
        assert_eq!(badges.len(), 8);

        let first = &badges[0];
        let fetched = store.get_badge(&first.id).unwrap().unwrap();
        assert_eq!(&fetched, first);
        assert!(store.get_badge(&BadgeId::generate()).unwrap().is_none());
    }

    #[test]
    fn progress_increments_and_sets() {
        let (store, _dir) = create_test_store();
        let (user, badge) = (UserId::generate(), BadgeId::generate());

        let change = store
            .update_progress(&user, &badge, 5, ProgressUpdate::Increment(4), at(1, 0))
            .unwrap();
        assert_eq!(change.previous_count, 0);
        assert_eq!(change.record.percentage, 80);

        let change = store
            .update_progress(&user, &badge, 5, ProgressUpdate::Increment(1), at(1, 1))
            .unwrap();
        assert!(change.crossed_milestone());

        let change = store
            .update_progress(&user, &badge, 5, ProgressUpdate::Set(2), at(1, 2))
            .unwrap();
        assert_eq!(change.record.current_count, 2);

        assert_eq!(store.list_progress_by_user(&user).unwrap().len(), 1);
        assert_eq!(store.list_progress_by_badge(&badge).unwrap().len(), 1);
        assert!(store
            .list_progress_by_badge(&BadgeId::generate())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn award_is_granted_once_and_applies_reward() {
        let (store, _dir) = create_test_store();
        let (user, badge) = (UserId::generate(), BadgeId::generate());
        store
            .update_progress(&user, &badge, 1, ProgressUpdate::Increment(1), at(1, 0))
            .unwrap();

        let grant = AwardGrant {
            user_id: user,
            badge_id: badge,
            requirement: AwardRequirement::Milestone(1),
            reward: Some(Reward::PremiumDays(7)),
            now: at(1, 0),
        };

        let first = store.award_badge(&grant).unwrap();
        let AwardCommit::Granted { award, account } = first else {
            panic!("expected a grant");
        };
        assert!(award.reward_claimed);
        assert_eq!(
            account.unwrap().premium_expires_at,
            Some(at(1, 0) + Duration::days(7))
        );

        assert!(matches!(
            store.award_badge(&grant).unwrap(),
            AwardCommit::AlreadyEarned(_)
        ));
        let account = store.get_account(&user).unwrap().unwrap();
        assert_eq!(account.premium_expires_at, Some(at(1, 0) + Duration::days(7)));
    }

    #[test]
    fn award_requires_milestone() {
        let (store, _dir) = create_test_store();
        let (user, badge) = (UserId::generate(), BadgeId::generate());
        store
            .update_progress(&user, &badge, 5, ProgressUpdate::Increment(3), at(1, 0))
            .unwrap();

        let commit = store
            .award_badge(&AwardGrant {
                user_id: user,
                badge_id: badge,
                requirement: AwardRequirement::Milestone(5),
                reward: None,
                now: at(1, 0),
            })
            .unwrap();
        assert_eq!(commit, AwardCommit::NotEligible { count: 3 });
        assert!(store.get_award(&user, &badge).unwrap().is_none());
    }

    #[test]
    fn acknowledge_and_notify_flags() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        let badges = [BadgeId::generate(), BadgeId::generate()];
        for badge in badges {
            store
                .award_badge(&AwardGrant {
                    user_id: user,
                    badge_id: badge,
                    requirement: AwardRequirement::Unconditional,
                    reward: None,
                    now: at(2, 0),
                })
                .unwrap();
        }

        assert!(store.mark_award_notified(&user, &badges[0]).unwrap());
        assert!(store.get_award(&user, &badges[0]).unwrap().unwrap().notified);
        assert!(!store.mark_award_notified(&user, &BadgeId::generate()).unwrap());

        assert_eq!(store.acknowledge_awards(&user).unwrap(), 2);
        assert_eq!(store.acknowledge_awards(&user).unwrap(), 0);
        assert_eq!(store.count_awards_by_user().unwrap(), vec![(user, 2)]);
        assert_eq!(store.count_awards_by_badge().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_activity_is_rejected() {
        let (store, _dir) = create_test_store();
        let (a, b) = (UserId::generate(), UserId::generate());
        let event = ActivityEvent::new(
            "evt_1",
            at(3, 10),
            ActivityKind::MatchCreated {
                user_id: a,
                partner_id: b,
            },
        );

        store.record_activity(&event).unwrap();
        assert!(matches!(
            store.record_activity(&event),
            Err(StoreError::DuplicateEvent { .. })
        ));

        assert!(store.has_activity("evt_1").unwrap());
        assert_eq!(store.count_user_activity(&a, ActivityTag::Match).unwrap(), 1);
        assert_eq!(store.count_user_activity(&b, ActivityTag::Match).unwrap(), 1);
        assert_eq!(store.list_members().unwrap().len(), 2);
    }

    #[test]
    fn activity_window_and_latest() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        for (i, day) in [1u32, 5, 9].into_iter().enumerate() {
            store
                .record_activity(&ActivityEvent::new(
                    format!("like_{i}"),
                    at(day, 12),
                    ActivityKind::LikeSent {
                        user_id: user,
                        target_id: UserId::generate(),
                    },
                ))
                .unwrap();
        }
        store
            .record_activity(&ActivityEvent::new(
                "login",
                at(20, 0),
                ActivityKind::DailyLoginSeen { user_id: user },
            ))
            .unwrap();

        let window = LeaderboardWindow {
            start: at(2, 0),
            end: at(9, 12),
        };
        let events = store.list_activity(ActivityTag::Like, &window).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "like_1");

        let latest = store
            .latest_user_activity(&user, ActivityTag::Like)
            .unwrap()
            .unwrap();
        assert_eq!(latest.event_id, "like_2");
        assert!(store
            .latest_user_activity(&user, ActivityTag::Match)
            .unwrap()
            .is_none());

        let member = store.get_member(&user).unwrap().unwrap();
        assert_eq!(member.first_seen_at, at(1, 12));
        assert_eq!(member.last_seen_at, at(20, 0));
    }

    #[test]
    fn streak_freeze_lifecycle() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        let day = |d| NaiveDate::from_ymd_opt(2025, 6, d).unwrap();

        assert!(matches!(
            store.set_streak_freeze(&user, StreakFreeze::for_days(3, at(1, 0)), at(1, 0)),
            Err(StoreError::NotFound { .. })
        ));

        let (_, transition) = store.record_streak_activity(&user, day(1), at(1, 9)).unwrap();
        assert_eq!(transition, StreakTransition::Started);
        store
            .set_streak_freeze(&user, StreakFreeze::for_days(3, at(1, 9)), at(1, 9))
            .unwrap();

        assert_eq!(store.clear_expired_freezes(day(3), at(3, 0)).unwrap(), 0);
        assert_eq!(store.clear_expired_freezes(day(5), at(5, 0)).unwrap(), 1);
        assert!(store.get_streak(&user).unwrap().unwrap().freeze.is_none());
    }

    #[test]
    fn leaderboard_swap_and_purge() {
        let (store, _dir) = create_test_store();
        let users: Vec<_> = (0..3).map(|_| UserId::generate()).collect();
        let metric = MetricType::WeeklyMatches;
        let window = metric.window(at(4, 0));

        let first = dense_rank(vec![(users[0], 5), (users[1], 3)], 50);
        let meta = store.swap_leaderboard(metric, window, &first, at(4, 0)).unwrap();
        assert_eq!(meta.generation, 1);

        let second = dense_rank(vec![(users[2], 9), (users[0], 6), (users[1], 6)], 50);
        let meta = store.swap_leaderboard(metric, window, &second, at(5, 0)).unwrap();
        assert_eq!(meta.generation, 2);
        assert_eq!(meta.entry_count, 3);

        let rows = store.current_leaderboard(metric, 50).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.is_current && r.generation == 2));
        assert_eq!(rows.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 2]);
        assert_eq!(store.current_leaderboard(metric, 1).unwrap().len(), 1);

        let rank = store.user_rank(&users[1], metric).unwrap().unwrap();
        assert_eq!(rank.rank, 2);
        assert!(store
            .user_rank(&users[1], MetricType::WeeklyReferrals)
            .unwrap()
            .is_none());

        // Generation 1 is old and not current; generation 2 is current.
        assert_eq!(store.purge_leaderboards(at(30, 0)).unwrap(), 2);
        assert_eq!(store.current_leaderboard(metric, 50).unwrap().len(), 3);
        assert_eq!(store.purge_leaderboards(at(30, 0)).unwrap(), 0);

        let counts = store.leaderboard_counts().unwrap();
        assert_eq!(counts.current_entries, 3);
        assert_eq!(counts.active_metrics, 1);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let user = UserId::generate();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store
                .record_streak_activity(&user, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), at(1, 0))
                .unwrap();
        }
        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.get_streak(&user).unwrap().unwrap().current_streak, 1);
    }
}
