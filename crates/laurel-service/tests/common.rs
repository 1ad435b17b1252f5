//! Common test utilities for laurel integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use laurel_core::{
    ActivityEvent, ActivityKind, ActivityTag, AwardRecord, BadgeDefinition, BadgeId,
    GenerationMeta, LeaderboardEntry, LeaderboardWindow, Member, MemberAccount, MetricType,
    ProfileFields, ProgressChange, ProgressRecord, ProgressUpdate, RankedScore, StreakFreeze,
    StreakRecord, StreakTransition, UserId,
};
use laurel_service::{
    Clock, Engine, EngineConfig, IngestOutcome, ManualClock, Notification, NotificationSink,
    NotifyError,
};
use laurel_store::{
    AwardCommit, AwardGrant, LeaderboardCounts, MemoryStore, Store, StoreError,
};

/// Wednesday 2025-06-11 12:00 UTC.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 11, 12, 0, 0).unwrap()
}

/// Sink that keeps every delivered notification.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Sink whose deliveries always fail.
#[derive(Default)]
pub struct FailingSink {
    attempts: AtomicU64,
}

impl FailingSink {
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for FailingSink {
    async fn deliver(&self, _notification: &Notification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError("push gateway unavailable".into()))
    }
}

/// In-memory store with switchable faults.
///
/// Award commits can be made to fail, and leaderboard swaps can be slowed down
/// while the number of swaps in flight is recorded.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_awards: AtomicBool,
    swap_delay_ms: AtomicU64,
    swaps_in_flight: AtomicUsize,
    max_swaps_in_flight: AtomicUsize,
}

impl FaultyStore {
    pub fn fail_awards(&self, fail: bool) {
        self.fail_awards.store(fail, Ordering::SeqCst);
    }

    pub fn slow_swaps(&self, delay: Duration) {
        self.swap_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    /// Most leaderboard swaps ever observed running at once.
    pub fn max_swaps_in_flight(&self) -> usize {
        self.max_swaps_in_flight.load(Ordering::SeqCst)
    }
}

impl Store for FaultyStore {
    fn put_badge(&self, badge: &BadgeDefinition) -> laurel_store::Result<()> {
        self.inner.put_badge(badge)
    }

    fn get_badge(&self, badge_id: &BadgeId) -> laurel_store::Result<Option<BadgeDefinition>> {
        self.inner.get_badge(badge_id)
    }

    fn list_badges(&self) -> laurel_store::Result<Vec<BadgeDefinition>> {
        self.inner.list_badges()
    }

    fn get_progress(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
    ) -> laurel_store::Result<Option<ProgressRecord>> {
        self.inner.get_progress(user_id, badge_id)
    }

    fn list_progress_by_user(&self, user_id: &UserId) -> laurel_store::Result<Vec<ProgressRecord>> {
        self.inner.list_progress_by_user(user_id)
    }

    fn list_progress_by_badge(
        &self,
        badge_id: &BadgeId,
    ) -> laurel_store::Result<Vec<ProgressRecord>> {
        self.inner.list_progress_by_badge(badge_id)
    }

    fn update_progress(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
        milestone: u32,
        update: ProgressUpdate,
        now: DateTime<Utc>,
    ) -> laurel_store::Result<ProgressChange> {
        self.inner
            .update_progress(user_id, badge_id, milestone, update, now)
    }

    fn mark_progress_nudged(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
        now: DateTime<Utc>,
    ) -> laurel_store::Result<bool> {
        self.inner.mark_progress_nudged(user_id, badge_id, now)
    }

    fn get_award(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
    ) -> laurel_store::Result<Option<AwardRecord>> {
        self.inner.get_award(user_id, badge_id)
    }

    fn list_awards_by_user(&self, user_id: &UserId) -> laurel_store::Result<Vec<AwardRecord>> {
        self.inner.list_awards_by_user(user_id)
    }

    fn count_awards_by_user(&self) -> laurel_store::Result<Vec<(UserId, u64)>> {
        self.inner.count_awards_by_user()
    }

    fn count_awards_by_badge(&self) -> laurel_store::Result<Vec<(BadgeId, u64)>> {
        self.inner.count_awards_by_badge()
    }

    fn award_badge(&self, grant: &AwardGrant) -> laurel_store::Result<AwardCommit> {
        if self.fail_awards.load(Ordering::SeqCst) {
            return Err(StoreError::Database("award write rejected".into()));
        }
        self.inner.award_badge(grant)
    }

    fn mark_award_notified(
        &self,
        user_id: &UserId,
        badge_id: &BadgeId,
    ) -> laurel_store::Result<bool> {
        self.inner.mark_award_notified(user_id, badge_id)
    }

    fn acknowledge_awards(&self, user_id: &UserId) -> laurel_store::Result<usize> {
        self.inner.acknowledge_awards(user_id)
    }

    fn get_account(&self, user_id: &UserId) -> laurel_store::Result<Option<MemberAccount>> {
        self.inner.get_account(user_id)
    }

    fn get_streak(&self, user_id: &UserId) -> laurel_store::Result<Option<StreakRecord>> {
        self.inner.get_streak(user_id)
    }

    fn list_streaks(&self) -> laurel_store::Result<Vec<StreakRecord>> {
        self.inner.list_streaks()
    }

    fn record_streak_activity(
        &self,
        user_id: &UserId,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> laurel_store::Result<(StreakRecord, StreakTransition)> {
        self.inner.record_streak_activity(user_id, today, now)
    }

    fn set_streak_freeze(
        &self,
        user_id: &UserId,
        freeze: StreakFreeze,
        now: DateTime<Utc>,
    ) -> laurel_store::Result<StreakRecord> {
        self.inner.set_streak_freeze(user_id, freeze, now)
    }

    fn clear_expired_freezes(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> laurel_store::Result<usize> {
        self.inner.clear_expired_freezes(today, now)
    }

    fn record_activity(&self, event: &ActivityEvent) -> laurel_store::Result<()> {
        self.inner.record_activity(event)
    }

    fn has_activity(&self, event_id: &str) -> laurel_store::Result<bool> {
        self.inner.has_activity(event_id)
    }

    fn count_user_activity(&self, user_id: &UserId, tag: ActivityTag) -> laurel_store::Result<u64> {
        self.inner.count_user_activity(user_id, tag)
    }

    fn latest_user_activity(
        &self,
        user_id: &UserId,
        tag: ActivityTag,
    ) -> laurel_store::Result<Option<ActivityEvent>> {
        self.inner.latest_user_activity(user_id, tag)
    }

    fn list_activity(
        &self,
        tag: ActivityTag,
        window: &LeaderboardWindow,
    ) -> laurel_store::Result<Vec<ActivityEvent>> {
        self.inner.list_activity(tag, window)
    }

    fn get_member(&self, user_id: &UserId) -> laurel_store::Result<Option<Member>> {
        self.inner.get_member(user_id)
    }

    fn list_members(&self) -> laurel_store::Result<Vec<Member>> {
        self.inner.list_members()
    }

    fn swap_leaderboard(
        &self,
        metric: MetricType,
        window: LeaderboardWindow,
        entries: &[RankedScore],
        now: DateTime<Utc>,
    ) -> laurel_store::Result<GenerationMeta> {
        let running = self.swaps_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_swaps_in_flight.fetch_max(running, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(
            self.swap_delay_ms.load(Ordering::SeqCst),
        ));
        let result = self.inner.swap_leaderboard(metric, window, entries, now);
        self.swaps_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn current_leaderboard(
        &self,
        metric: MetricType,
        limit: usize,
    ) -> laurel_store::Result<Vec<LeaderboardEntry>> {
        self.inner.current_leaderboard(metric, limit)
    }

    fn user_rank(
        &self,
        user_id: &UserId,
        metric: MetricType,
    ) -> laurel_store::Result<Option<LeaderboardEntry>> {
        self.inner.user_rank(user_id, metric)
    }

    fn current_generation(&self, metric: MetricType) -> laurel_store::Result<Option<GenerationMeta>> {
        self.inner.current_generation(metric)
    }

    fn leaderboard_counts(&self) -> laurel_store::Result<LeaderboardCounts> {
        self.inner.leaderboard_counts()
    }

    fn purge_leaderboards(&self, cutoff: DateTime<Utc>) -> laurel_store::Result<usize> {
        self.inner.purge_leaderboards(cutoff)
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The engine under test.
    pub engine: Arc<Engine>,
    /// Direct access to the store, for setting up states the engine would not produce.
    pub store: Arc<dyn Store>,
    /// The clock the engine reads.
    pub clock: Arc<ManualClock>,
    /// Notifications delivered so far.
    pub sink: Arc<RecordingSink>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: Option<TempDir>,
    next_event: AtomicU64,
}

impl TestHarness {
    /// In-memory store with the default catalog seeded.
    pub async fn new() -> Self {
        Self::build(Arc::new(MemoryStore::new()), None, None).await
    }

    /// `RocksDB` store in a temporary directory with the default catalog seeded.
    #[cfg(feature = "rocksdb-backend")]
    pub async fn rocks() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store =
            laurel_store::RocksStore::open(temp_dir.path()).expect("Failed to open store");
        Self::build(Arc::new(store), Some(temp_dir), None).await
    }

    /// In-memory store delivering notifications to `sink`.
    pub async fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        Self::build(Arc::new(MemoryStore::new()), None, Some(sink)).await
    }

    /// Engine over `store` with a short store timeout.
    pub async fn with_store(store: Arc<dyn Store>, store_timeout: Duration) -> Self {
        Self::build_with(store, None, None, store_timeout).await
    }

    async fn build(
        store: Arc<dyn Store>,
        temp_dir: Option<TempDir>,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        let store_timeout = EngineConfig::default().store_timeout;
        Self::build_with(store, temp_dir, sink, store_timeout).await
    }

    async fn build_with(
        store: Arc<dyn Store>,
        temp_dir: Option<TempDir>,
        sink: Option<Arc<dyn NotificationSink>>,
        store_timeout: Duration,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let recording = Arc::new(RecordingSink::default());
        let sink = sink.unwrap_or_else(|| Arc::clone(&recording) as Arc<dyn NotificationSink>);

        let config = EngineConfig {
            data_dir: temp_dir
                .as_ref()
                .map(|d| d.path().to_string_lossy().to_string())
                .unwrap_or_default(),
            store_timeout,
            ..EngineConfig::default()
        };
        let engine = Arc::new(Engine::new(
            Arc::clone(&store),
            config,
            sink,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        engine.seed_catalog().await.expect("Failed to seed catalog");

        Self {
            engine,
            store,
            clock,
            sink: recording,
            _temp_dir: temp_dir,
            next_event: AtomicU64::new(1),
        }
    }

    /// A stored badge definition by name.
    pub fn badge(&self, name: &str) -> BadgeDefinition {
        self.store
            .list_badges()
            .unwrap()
            .into_iter()
            .find(|b| b.name == name)
            .unwrap_or_else(|| panic!("badge {name} not seeded"))
    }

    /// Move the clock forward by whole days.
    pub fn advance_days(&self, days: i64) {
        self.clock.advance(chrono::Duration::days(days));
    }

    fn event(&self, kind: ActivityKind) -> ActivityEvent {
        let n = self.next_event.fetch_add(1, Ordering::SeqCst);
        ActivityEvent::new(format!("evt-{n}"), self.clock.now(), kind)
    }

    /// Ingest a match between two users.
    pub async fn matched(&self, user_id: UserId, partner_id: UserId) -> IngestOutcome {
        let event = self.event(ActivityKind::MatchCreated {
            user_id,
            partner_id,
        });
        self.engine.ingest(event).await.unwrap()
    }

    /// Ingest a converted referral.
    pub async fn referred(&self, referrer_id: UserId) -> IngestOutcome {
        let event = self.event(ActivityKind::ReferralConverted {
            referrer_id,
            referee_id: UserId::generate(),
        });
        self.engine.ingest(event).await.unwrap()
    }

    /// Ingest a daily login.
    pub async fn login(&self, user_id: UserId) -> IngestOutcome {
        let event = self.event(ActivityKind::DailyLoginSeen { user_id });
        self.engine.ingest(event).await.unwrap()
    }

    /// Ingest a profile completeness snapshot.
    pub async fn profile(&self, user_id: UserId, fields: ProfileFields) -> IngestOutcome {
        let event = self.event(ActivityKind::ProfileFieldCompleted { user_id, fields });
        self.engine.ingest(event).await.unwrap()
    }
}

/// Poll `check` until it returns true or a few seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
