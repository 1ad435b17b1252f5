//! Leaderboard computer integration tests.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{FaultyStore, TestHarness};
use laurel_core::{MetricType, UserId};
use laurel_store::Store;

// ============================================================================
// Ranking
// ============================================================================

#[tokio::test]
async fn tied_scores_share_dense_ranks() {
    let harness = TestHarness::new().await;
    let (a, b, c) = (UserId::generate(), UserId::generate(), UserId::generate());

    // a: 3 matches, b: 3 matches, c: 1 match, against fresh partners.
    for user in [a, a, a, b, b, b, c] {
        harness.matched(user, UserId::generate()).await;
    }

    harness
        .engine
        .recompute_leaderboard(MetricType::WeeklyMatches)
        .await
        .unwrap();

    let rows = harness
        .engine
        .get_leaderboard(MetricType::WeeklyMatches, 3)
        .await
        .unwrap();
    let ranks: Vec<_> = rows.iter().map(|r| (r.rank, r.score)).collect();
    // Partners score one match each, tying with c at rank 2.
    assert_eq!(ranks, vec![(1, 3), (1, 3), (2, 1)]);
    assert_eq!(
        harness
            .engine
            .get_user_rank(c, MetricType::WeeklyMatches)
            .await
            .unwrap()
            .map(|r| r.rank),
        Some(2)
    );

    let rank = harness
        .engine
        .get_user_rank(b, MetricType::WeeklyMatches)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((rank.rank, rank.score), (1, 3));
}

#[tokio::test]
async fn all_time_badges_rank_by_awards_held() {
    let harness = TestHarness::new().await;
    let (collector, casual) = (UserId::generate(), UserId::generate());

    for name in ["first_match", "super_liker", "streak_king"] {
        let badge = harness.badge(name);
        harness.engine.award_badge(collector, badge.id).await.unwrap();
    }
    let badge = harness.badge("first_match");
    harness.engine.award_badge(casual, badge.id).await.unwrap();

    harness
        .engine
        .recompute_leaderboard(MetricType::AllTimeBadges)
        .await
        .unwrap();

    let rows = harness
        .engine
        .get_leaderboard(MetricType::AllTimeBadges, 10)
        .await
        .unwrap();
    let scores: Vec<_> = rows.iter().map(|r| (r.user_id, r.score, r.rank)).collect();
    assert_eq!(scores, vec![(collector, 3, 1), (casual, 1, 2)]);

    let ranks = harness.engine.get_user_ranks(collector).await.unwrap();
    assert_eq!(ranks.len(), 1);
    assert_eq!(ranks[0].metric, MetricType::AllTimeBadges);
}

#[tokio::test]
async fn weekly_window_excludes_last_week() {
    let harness = TestHarness::new().await;
    let user = UserId::generate();

    harness.matched(user, UserId::generate()).await;
    harness.advance_days(7);
    harness.matched(user, UserId::generate()).await;

    harness
        .engine
        .recompute_leaderboard(MetricType::WeeklyMatches)
        .await
        .unwrap();
    let rank = harness
        .engine
        .get_user_rank(user, MetricType::WeeklyMatches)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rank.score, 1);
}

// ============================================================================
// Generations
// ============================================================================

async fn readers_never_see_partial_generations(harness: TestHarness) {
    for i in 0..20 {
        let (a, b) = (UserId::generate(), UserId::generate());
        for _ in 0..=(i % 4) {
            harness.matched(a, b).await;
        }
    }
    harness
        .engine
        .recompute_leaderboard(MetricType::WeeklyMatches)
        .await
        .unwrap();
    let expected = harness
        .engine
        .get_leaderboard(MetricType::WeeklyMatches, 50)
        .await
        .unwrap()
        .len();
    assert_eq!(expected, 40);

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let engine = Arc::clone(&harness.engine);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut reads = 0;
            while !done.load(Ordering::SeqCst) {
                let rows = engine
                    .get_leaderboard(MetricType::WeeklyMatches, 50)
                    .await
                    .unwrap();
                assert_eq!(rows.len(), expected, "partial generation visible");
                let generation = rows[0].generation;
                assert!(rows.iter().all(|r| r.generation == generation && r.is_current));
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        })
    };

    for _ in 0..25 {
        harness
            .engine
            .recompute_leaderboard(MetricType::WeeklyMatches)
            .await
            .unwrap();
    }
    done.store(true, Ordering::SeqCst);
    assert!(reader.await.unwrap() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_during_recompute_see_one_generation() {
    readers_never_see_partial_generations(TestHarness::new().await).await;
}

#[cfg(feature = "rocksdb-backend")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_during_recompute_see_one_generation_on_rocksdb() {
    readers_never_see_partial_generations(TestHarness::rocks().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_recomputes_of_one_metric_serialize() {
    let harness = TestHarness::new().await;
    harness.matched(UserId::generate(), UserId::generate()).await;

    let metrics = [MetricType::WeeklyMatches; 6];
    let results = harness.engine.recompute_leaderboards(&metrics).await;
    let mut generations: Vec<_> = results
        .into_iter()
        .map(|(_, r)| r.unwrap().generation)
        .collect();
    generations.sort_unstable();
    generations.dedup();
    assert_eq!(generations.len(), 6);

    let rows = harness
        .engine
        .get_leaderboard(MetricType::WeeklyMatches, 50)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.generation == generations[5]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_swaps_stay_serialized_past_the_store_timeout() {
    let store = Arc::new(FaultyStore::default());
    let harness =
        TestHarness::with_store(Arc::clone(&store) as Arc<dyn Store>, Duration::from_millis(50))
            .await;
    harness.matched(UserId::generate(), UserId::generate()).await;
    store.slow_swaps(Duration::from_millis(250));

    // A caller that stops waiting does not release the metric early.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(80),
        harness.engine.recompute_leaderboard(MetricType::WeeklyMatches),
    )
    .await;
    assert!(abandoned.is_err());

    let results = harness
        .engine
        .recompute_leaderboards(&[MetricType::WeeklyMatches; 3])
        .await;
    let mut generations: Vec<_> = results
        .into_iter()
        .map(|(_, r)| r.unwrap().generation)
        .collect();
    generations.sort_unstable();
    generations.dedup();
    assert_eq!(generations.len(), 3);
    assert_eq!(store.max_swaps_in_flight(), 1);
}

#[tokio::test]
async fn purge_keeps_current_generation() {
    let harness = TestHarness::new().await;
    harness.matched(UserId::generate(), UserId::generate()).await;

    for _ in 0..3 {
        harness
            .engine
            .recompute_leaderboard(MetricType::WeeklyMatches)
            .await
            .unwrap();
    }

    // Nothing is old enough yet.
    assert_eq!(harness.engine.purge_leaderboards().await.unwrap(), 0);

    harness.advance_days(29);
    // Two old generations of two rows each.
    assert_eq!(harness.engine.purge_leaderboards().await.unwrap(), 4);
    assert_eq!(
        harness
            .engine
            .get_leaderboard(MetricType::WeeklyMatches, 50)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn stats_cover_all_metrics() {
    let harness = TestHarness::new().await;
    let (star, other) = (UserId::generate(), UserId::generate());
    harness.matched(star, other).await;
    harness.referred(star).await;

    for (metric, result) in harness.engine.recompute_leaderboards(&MetricType::ALL).await {
        assert!(result.is_ok(), "{metric} failed");
    }

    let stats = harness.engine.leaderboard_stats().await.unwrap();
    assert_eq!(stats.active_metrics, 4);
    assert_eq!(stats.top_user, Some(star));
    // weekly matches, weekly referrals, all-time badges (first_match), monthly new users
    assert_eq!(stats.top_user_entries, 4);
}
