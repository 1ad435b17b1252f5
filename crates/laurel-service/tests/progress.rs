//! Progress tracker integration tests.

mod common;

use std::sync::Arc;

use common::{start_time, TestHarness};
use laurel_core::{ActivityEvent, ActivityKind, ProgressUpdate, UserId};
use laurel_service::EngineError;

// ============================================================================
// Update modes
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn increments_never_lose_updates() {
    let harness = TestHarness::new().await;
    let user = UserId::generate();

    let tasks: Vec<_> = (1..=20u64)
        .map(|delta| {
            let engine = Arc::clone(&harness.engine);
            tokio::spawn(async move { engine.bump_progress(user, "super_liker", delta).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let badge = harness.badge("super_liker");
    let record = harness
        .engine
        .get_badge_progress(user, badge.id)
        .await
        .unwrap()
        .unwrap();
    // 1 + 2 + ... + 20
    assert_eq!(record.current_count, 210);
    assert_eq!(record.percentage, 100);
}

#[tokio::test]
async fn increment_is_monotonic() {
    let harness = TestHarness::new().await;
    let user = UserId::generate();

    let mut previous = 0;
    for delta in [3, 0, 7, 1] {
        let outcome = harness
            .engine
            .bump_progress(user, "super_liker", delta)
            .await
            .unwrap();
        assert!(outcome.record.current_count >= previous);
        previous = outcome.record.current_count;
    }
    assert_eq!(previous, 11);
}

#[tokio::test]
async fn set_mode_is_authoritative() {
    let harness = TestHarness::new().await;
    let user = UserId::generate();

    let first = harness.engine.set_progress(user, "referral_overlord", 12).await.unwrap();
    assert_eq!(first.record.percentage, 60);

    let lowered = harness.engine.set_progress(user, "referral_overlord", 3).await.unwrap();
    assert_eq!(lowered.record.current_count, 3);
    assert_eq!(lowered.record.percentage, 15);
    assert!(lowered.award.is_none());
}

#[tokio::test]
async fn unknown_badge_name_is_not_found() {
    let harness = TestHarness::new().await;
    let err = harness
        .engine
        .bump_progress(UserId::generate(), "moon_walker", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

// ============================================================================
// Milestones
// ============================================================================

#[tokio::test]
async fn crossing_milestone_attempts_exactly_once() {
    let harness = TestHarness::new().await;
    let user = UserId::generate();

    let below = harness.engine.set_progress(user, "referral_expert", 4).await.unwrap();
    assert!(below.award.is_none());

    let crossing = harness.engine.bump_progress(user, "referral_expert", 1).await.unwrap();
    let award = crossing.award.expect("4 -> 5 must attempt an award");
    assert!(award.granted);

    let past = harness.engine.bump_progress(user, "referral_expert", 1).await.unwrap();
    assert_eq!(past.record.current_count, 6);
    assert!(past.award.is_none(), "5 -> 6 must not attempt an award");

    let account = harness.engine.get_account(user).await.unwrap().unwrap();
    assert_eq!(account.bonus_actions, 100);
}

#[tokio::test]
async fn complete_progress_without_award_is_recovered() {
    let harness = TestHarness::new().await;
    let user = UserId::generate();
    let badge = harness.badge("referral_expert");

    // Progress reached the milestone but the award never landed.
    harness
        .store
        .update_progress(&user, &badge.id, 5, ProgressUpdate::Set(5), start_time())
        .unwrap();
    assert!(harness.store.get_award(&user, &badge.id).unwrap().is_none());

    let outcome = harness.engine.bump_progress(user, "referral_expert", 1).await.unwrap();
    assert!(outcome.award.unwrap().granted);
    assert!(harness.store.get_award(&user, &badge.id).unwrap().is_some());
}

#[tokio::test]
async fn current_milestone_is_authoritative() {
    let harness = TestHarness::new().await;
    let user = UserId::generate();
    let mut badge = harness.badge("super_liker");

    harness.engine.bump_progress(user, "super_liker", 40).await.unwrap();

    badge.milestone_count = 50;
    harness.store.put_badge(&badge).unwrap();
    harness.engine.invalidate_registry().await;

    let record = harness
        .engine
        .get_badge_progress(user, badge.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.percentage, 80);

    let outcome = harness.engine.bump_progress(user, "super_liker", 10).await.unwrap();
    assert!(outcome.award.unwrap().granted);
}

// ============================================================================
// Sweep
// ============================================================================

#[tokio::test]
async fn sweep_recomputes_counts_from_activity_log() {
    let harness = TestHarness::new().await;
    let (user, partner) = (UserId::generate(), UserId::generate());

    // Logged directly; the live progress path never ran.
    harness
        .store
        .record_activity(&ActivityEvent::new(
            "offline-1",
            start_time(),
            ActivityKind::MatchCreated {
                user_id: user,
                partner_id: partner,
            },
        ))
        .unwrap();

    let report = harness.engine.sweep_awards().await.unwrap();
    assert_eq!(report.users, 2);
    assert_eq!(report.failed, 0);
    // first_match for both sides.
    assert_eq!(report.granted, 2);

    let first_match = harness.badge("first_match");
    assert!(harness.store.get_award(&user, &first_match.id).unwrap().is_some());
    assert!(harness.store.get_award(&partner, &first_match.id).unwrap().is_some());

    let again = harness.engine.sweep_awards().await.unwrap();
    assert_eq!(again.granted, 0);
}

#[tokio::test]
async fn close_to_earning_nudges_are_sent_once() {
    let harness = TestHarness::new().await;
    let (close, far) = (UserId::generate(), UserId::generate());

    harness.engine.bump_progress(close, "super_liker", 85).await.unwrap();
    harness.engine.bump_progress(far, "super_liker", 20).await.unwrap();

    assert_eq!(harness.engine.notify_close_to_earning().await.unwrap(), 1);
    assert!(
        common::eventually(|| {
            harness.sink.delivered().iter().any(|n| {
                matches!(n, laurel_service::Notification::CloseToEarning { user_id, percentage, .. }
                    if *user_id == close && *percentage == 85)
            })
        })
        .await
    );

    // Nobody is nudged twice for the same badge.
    assert_eq!(harness.engine.notify_close_to_earning().await.unwrap(), 0);

    harness.engine.bump_progress(far, "super_liker", 70).await.unwrap();
    assert_eq!(harness.engine.notify_close_to_earning().await.unwrap(), 1);
    assert!(
        common::eventually(|| {
            harness
                .sink
                .delivered()
                .iter()
                .filter(|n| matches!(n, laurel_service::Notification::CloseToEarning { .. }))
                .count()
                == 2
        })
        .await
    );
}
