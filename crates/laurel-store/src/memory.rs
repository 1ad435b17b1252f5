//! In-memory storage implementation.
//!
//! All tables live behind a single mutex, so every `Store` call is trivially
//! atomic. Used by unit and integration tests and by builds without `RocksDB`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};

use laurel_core::{
    ActivityEvent, ActivityTag, AwardRecord, BadgeDefinition, BadgeId, GenerationMeta,
    LeaderboardEntry, LeaderboardWindow, Member, MemberAccount, MetricType, ProgressChange,
    ProgressRecord, ProgressUpdate, RankedScore, StreakFreeze, StreakRecord, StreakTransition,
    UserId,
};

use crate::error::{Result, StoreError};
use crate::{decide_award, generation_entries, AwardCommit, AwardGrant, LeaderboardCounts, Store};

#[derive(Default)]
struct Tables {
    badges: BTreeMap<BadgeId, BadgeDefinition>,
    progress: BTreeMap<(UserId, BadgeId), ProgressRecord>,
    awards: BTreeMap<(UserId, BadgeId), AwardRecord>,
    accounts: HashMap<UserId, MemberAccount>,
    streaks: BTreeMap<UserId, StreakRecord>,
    /// Keyed like the `RocksDB` activity column family: (tag, time, event id).
    activity: BTreeMap<(ActivityTag, DateTime<Utc>, String), ActivityEvent>,
    activity_by_user: BTreeMap<(UserId, ActivityTag, DateTime<Utc>, String), ()>,
    events: HashSet<String>,
    members: BTreeMap<UserId, Member>,
    /// (metric, generation, rank, user) mirrors the row key order.
    entries: BTreeMap<(MetricType, u64, u32, UserId), LeaderboardEntry>,
    generations: BTreeMap<(MetricType, u64), GenerationMeta>,
    current: HashMap<MetricType, u64>,
}

impl Tables {
    fn current_rows(&self, metric: MetricType) -> impl Iterator<Item = &LeaderboardEntry> {
        let generation = self.current.get(&metric).copied();
        self.entries
            .iter()
            .filter(move |((m, g, _, _), _)| *m == metric && Some(*g) == generation)
            .map(|(_, row)| row)
    }
}

/// In-memory storage implementation.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn put_badge(&self, badge: &BadgeDefinition) -> Result<()> {
        self.tables().badges.insert(badge.id, badge.clone());
        Ok(())
    }

    fn get_badge(&self, badge_id: &BadgeId) -> Result<Option<BadgeDefinition>> {
        Ok(self.tables().badges.get(badge_id).cloned())
    }

    fn list_badges(&self) -> Result<Vec<BadgeDefinition>> {
        Ok(self.tables().badges.values().cloned().collect())
    }

    fn get_progress(&self, user_id: &UserId, badge_id: &BadgeId) -> Result<Option<ProgressRecord>> {
        Ok(self.tables().progress.get(&(*user_id, *badge_id)).cloned())
    }

    fn list_progress_by_user(&self, user_id: &UserId) -> Result<Vec<ProgressRecord>> {
        Ok(self
            .tables()
            .progress
            .values()
            .filter(|p| p.user_id == *user_id)
            .cloned()
            .collect())
    }

    fn list_progress_by_badge(&self, badge_id: &BadgeId) -> Result<Vec<ProgressRecord>> {
        Ok(self
            .tables()
            .progress
            .values()
            .filter(|p| p.badge_id == *badge_id)
            .cloned()
            .collect())
    }

    fn update_progress(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
        milestone: u32,
        update: ProgressUpdate,
        now: DateTime<Utc>,
    ) -> Result<ProgressChange> {
        let mut tables = self.tables();
        let record = tables
            .progress
            .get(&(*user_id, *badge_id))
            .cloned()
            .unwrap_or_else(|| ProgressRecord::new(*user_id, *badge_id, milestone, now));
        let change = record.apply(update, milestone, now);
        tables
            .progress
            .insert((*user_id, *badge_id), change.record.clone());
        Ok(change)
    }

    fn mark_progress_nudged(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables();
        let Some(record) = tables.progress.get_mut(&(*user_id, *badge_id)) else {
            return Ok(false);
        };
        if record.nudged_at.is_some() {
            return Ok(false);
        }
        record.nudged_at = Some(now);
        Ok(true)
    }

    fn get_award(&self, user_id: &UserId, badge_id: &BadgeId) -> Result<Option<AwardRecord>> {
        Ok(self.tables().awards.get(&(*user_id, *badge_id)).cloned())
    }

    fn list_awards_by_user(&self, user_id: &UserId) -> Result<Vec<AwardRecord>> {
        let mut awards: Vec<_> = self
            .tables()
            .awards
            .values()
            .filter(|a| a.user_id == *user_id)
            .cloned()
            .collect();
        awards.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));
        Ok(awards)
    }

    fn count_awards_by_user(&self) -> Result<Vec<(UserId, u64)>> {
        let mut counts: BTreeMap<UserId, u64> = BTreeMap::new();
        for (user_id, _) in self.tables().awards.keys() {
            *counts.entry(*user_id).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    fn count_awards_by_badge(&self) -> Result<Vec<(BadgeId, u64)>> {
        let mut counts: BTreeMap<BadgeId, u64> = BTreeMap::new();
        for (_, badge_id) in self.tables().awards.keys() {
            *counts.entry(*badge_id).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    fn award_badge(&self, grant: &AwardGrant) -> Result<AwardCommit> {
        let mut tables = self.tables();
        let key = (grant.user_id, grant.badge_id);

        let existing = tables.awards.get(&key).cloned();
        let count = tables.progress.get(&key).map_or(0, |p| p.current_count);
        let account = tables.accounts.get(&grant.user_id).cloned();

        let commit = decide_award(grant, existing, count, account);
        if let AwardCommit::Granted { award, account } = &commit {
            tables.awards.insert(key, award.clone());
            if let Some(account) = account {
                tables.accounts.insert(grant.user_id, account.clone());
            }
        }
        Ok(commit)
    }

    fn mark_award_notified(&self, user_id: &UserId, badge_id: &BadgeId) -> Result<bool> {
        Ok(self
            .tables()
            .awards
            .get_mut(&(*user_id, *badge_id))
            .map(|award| award.notified = true)
            .is_some())
    }

    fn acknowledge_awards(&self, user_id: &UserId) -> Result<usize> {
        let mut tables = self.tables();
        let mut changed = 0;
        for award in tables.awards.values_mut() {
            if award.user_id == *user_id && award.is_new {
                award.is_new = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn get_account(&self, user_id: &UserId) -> Result<Option<MemberAccount>> {
        Ok(self.tables().accounts.get(user_id).cloned())
    }

    fn get_streak(&self, user_id: &UserId) -> Result<Option<StreakRecord>> {
        Ok(self.tables().streaks.get(user_id).cloned())
    }

    fn list_streaks(&self) -> Result<Vec<StreakRecord>> {
        Ok(self.tables().streaks.values().cloned().collect())
    }

    fn record_streak_activity(
        &self,
        user_id: &UserId,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(StreakRecord, StreakTransition)> {
        let mut tables = self.tables();
        if let Some(record) = tables.streaks.get_mut(user_id) {
            let transition = record.record_activity(today, now);
            return Ok((record.clone(), transition));
        }
        let record = StreakRecord::start(*user_id, today, now);
        tables.streaks.insert(*user_id, record.clone());
        Ok((record, StreakTransition::Started))
    }

    fn set_streak_freeze(
        &self,
        user_id: &UserId,
        freeze: StreakFreeze,
        now: DateTime<Utc>,
    ) -> Result<StreakRecord> {
        let mut tables = self.tables();
        let record = tables
            .streaks
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "streak",
                id: user_id.to_string(),
            })?;
        record.freeze = Some(freeze);
        record.updated_at = now;
        Ok(record.clone())
    }

    fn clear_expired_freezes(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .tables()
            .streaks
            .values_mut()
            .map(|record| record.clear_expired_freeze(today, now))
            .filter(|cleared| *cleared)
            .count())
    }

    fn record_activity(&self, event: &ActivityEvent) -> Result<()> {
        let mut tables = self.tables();
        if tables.events.contains(&event.event_id) {
            return Err(StoreError::DuplicateEvent {
                event_id: event.event_id.clone(),
            });
        }

        let tag = event.kind.tag();
        let at = event.occurred_at;
        tables.events.insert(event.event_id.clone());
        tables
            .activity
            .insert((tag, at, event.event_id.clone()), event.clone());
        for user_id in event.kind.credited_users() {
            tables
                .activity_by_user
                .insert((user_id, tag, at, event.event_id.clone()), ());
            tables
                .members
                .entry(user_id)
                .and_modify(|m| m.observe(at))
                .or_insert_with(|| Member::new(user_id, at));
        }
        Ok(())
    }

    fn has_activity(&self, event_id: &str) -> Result<bool> {
        Ok(self.tables().events.contains(event_id))
    }

    fn count_user_activity(&self, user_id: &UserId, tag: ActivityTag) -> Result<u64> {
        Ok(self
            .tables()
            .activity_by_user
            .keys()
            .filter(|(u, t, _, _)| u == user_id && *t == tag)
            .count() as u64)
    }

    fn latest_user_activity(
        &self,
        user_id: &UserId,
        tag: ActivityTag,
    ) -> Result<Option<ActivityEvent>> {
        let tables = self.tables();
        Ok(tables
            .activity_by_user
            .keys()
            .filter(|(u, t, _, _)| u == user_id && *t == tag)
            .next_back()
            .and_then(|(_, t, at, id)| tables.activity.get(&(*t, *at, id.clone())))
            .cloned())
    }

    fn list_activity(
        &self,
        tag: ActivityTag,
        window: &LeaderboardWindow,
    ) -> Result<Vec<ActivityEvent>> {
        Ok(self
            .tables()
            .activity
            .iter()
            .filter(|((t, at, _), _)| *t == tag && window.contains(*at))
            .map(|(_, event)| event.clone())
            .collect())
    }

    fn get_member(&self, user_id: &UserId) -> Result<Option<Member>> {
        Ok(self.tables().members.get(user_id).cloned())
    }

    fn list_members(&self) -> Result<Vec<Member>> {
        Ok(self.tables().members.values().cloned().collect())
    }

    fn swap_leaderboard(
        &self,
        metric: MetricType,
        window: LeaderboardWindow,
        entries: &[RankedScore],
        now: DateTime<Utc>,
    ) -> Result<GenerationMeta> {
        let mut tables = self.tables();
        let previous = tables.current.get(&metric).copied();
        let generation = previous.map_or(1, |g| g + 1);

        if let Some(previous) = previous {
            for ((m, g, _, _), row) in &mut tables.entries {
                if *m == metric && *g == previous {
                    row.is_current = false;
                }
            }
        }

        let rows = generation_entries(metric, generation, window, entries, now);
        let meta = GenerationMeta {
            metric,
            generation,
            window,
            entry_count: u32::try_from(rows.len()).unwrap_or(u32::MAX),
            computed_at: now,
        };
        for row in rows {
            tables
                .entries
                .insert((metric, generation, row.rank, row.user_id), row);
        }
        tables.generations.insert((metric, generation), meta.clone());
        tables.current.insert(metric, generation);

        Ok(meta)
    }

    fn current_leaderboard(
        &self,
        metric: MetricType,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        Ok(self
            .tables()
            .current_rows(metric)
            .take(limit)
            .cloned()
            .collect())
    }

    fn user_rank(&self, user_id: &UserId, metric: MetricType) -> Result<Option<LeaderboardEntry>> {
        Ok(self
            .tables()
            .current_rows(metric)
            .find(|row| row.user_id == *user_id)
            .cloned())
    }

    fn current_generation(&self, metric: MetricType) -> Result<Option<GenerationMeta>> {
        let tables = self.tables();
        Ok(tables
            .current
            .get(&metric)
            .and_then(|g| tables.generations.get(&(metric, *g)))
            .cloned())
    }

    fn leaderboard_counts(&self) -> Result<LeaderboardCounts> {
        let tables = self.tables();
        let mut counts = LeaderboardCounts {
            active_metrics: tables.current.len(),
            ..LeaderboardCounts::default()
        };
        let mut by_user: BTreeMap<UserId, usize> = BTreeMap::new();
        for metric in MetricType::ALL {
            for row in tables.current_rows(metric) {
                counts.current_entries += 1;
                *by_user.entry(row.user_id).or_default() += 1;
            }
        }
        counts.entries_by_user = by_user.into_iter().collect();
        Ok(counts)
    }

    fn purge_leaderboards(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables();
        let stale: Vec<(MetricType, u64)> = tables
            .generations
            .values()
            .filter(|meta| {
                tables.current.get(&meta.metric) != Some(&meta.generation)
                    && meta.computed_at < cutoff
            })
            .map(|meta| (meta.metric, meta.generation))
            .collect();

        let before = tables.entries.len();
        tables
            .entries
            .retain(|(m, g, _, _), _| !stale.contains(&(*m, *g)));
        for key in &stale {
            tables.generations.remove(key);
        }
        Ok(before - tables.entries.len())
    }
}
