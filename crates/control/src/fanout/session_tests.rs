// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;

use super::*;

fn session(agents: &[&str]) -> TestSession {
    TestSession::new(
        "s-1".into(),
        "alice".into(),
        "1.1.1.1".into(),
        agents.iter().map(|a| (*a).to_owned()),
        1_000,
        31_000,
    )
}

#[test]
fn zero_targets_is_complete_immediately() {
    let s = session(&[]);
    assert!(s.is_complete());
    assert_eq!(s.completed_at_ms, Some(1_000));
    assert_eq!(s.latency(), LatencyStats::default());
}

#[test]
fn terminal_entries_ignore_later_updates() {
    let mut s = session(&["a", "b"]);
    assert!(s.resolve("a", EntryStatus::Success, Some(12.0), None, 2_000));
    assert!(!s.resolve("a", EntryStatus::Failed, None, Some("late".into()), 3_000));
    assert!(!s.resolve("nobody", EntryStatus::Success, Some(1.0), None, 3_000));

    let entry = s.entry("a").cloned();
    assert_eq!(entry.map(|e| (e.status, e.latency_ms)), Some((EntryStatus::Success, Some(12.0))));

    assert_eq!(s.expire(31_000), vec!["b".to_owned()]);
    assert!(!s.resolve("b", EntryStatus::Success, Some(5.0), None, 31_001));
    assert_eq!(s.entry("b").map(|e| e.status), Some(EntryStatus::Timeout));
}

#[test]
fn pending_is_not_a_resolution() {
    let mut s = session(&["a"]);
    assert!(!s.resolve("a", EntryStatus::Pending, None, None, 2_000));
    assert_eq!(s.pending(), 1);
}

#[test]
fn finish_fires_once() {
    let mut s = session(&["a"]);
    assert!(!s.finish_if_done(1_500));
    s.resolve("a", EntryStatus::Failed, None, Some("unreachable".into()), 2_000);
    assert!(s.finish_if_done(2_000));
    assert!(!s.finish_if_done(2_500));
    assert_eq!(s.completed_at_ms, Some(2_000));
}

#[test]
fn latency_stats_only_count_successes() {
    let mut s = session(&["a", "b", "c", "d"]);
    s.resolve("a", EntryStatus::Success, Some(40.0), None, 2_000);
    s.resolve("b", EntryStatus::Success, Some(80.0), None, 2_000);
    s.resolve("c", EntryStatus::Failed, Some(1.0), Some("refused".into()), 2_000);
    s.expire(31_000);

    let stats = s.latency();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.avg_ms, Some(60.0));
    assert_eq!(stats.min_ms, Some(40.0));
    assert_eq!(stats.max_ms, Some(80.0));
    assert_eq!(
        s.counts(),
        StatusCounts { total: 4, pending: 0, success: 2, failed: 1, timeout: 1 }
    );
}

#[yare::parameterized(
    fast = { 3.0, 0 },
    edge = { 10.0, 1 },
    mid = { 99.9, 3 },
    slow = { 999.0, 6 },
    overflow = { 29_900.0, 7 },
)]
fn histogram_bucket_placement(latency: f64, bucket: usize) {
    let mut s = session(&["a"]);
    s.resolve("a", EntryStatus::Success, Some(latency), None, 2_000);
    let histogram = s.histogram();
    assert_eq!(histogram.len(), LATENCY_BUCKETS_MS.len() + 1);
    assert_eq!(histogram.iter().position(|b| b.count == 1), Some(bucket));
}

#[test]
fn fastest_is_sorted_and_truncated() {
    let mut s = session(&["a", "b", "c", "d"]);
    s.resolve("a", EntryStatus::Success, Some(70.0), None, 2_000);
    s.resolve("b", EntryStatus::Success, Some(40.0), None, 2_000);
    s.resolve("c", EntryStatus::Success, Some(55.0), None, 2_000);
    s.resolve("d", EntryStatus::Failed, None, None, 2_000);

    let top: Vec<_> = s.fastest(2).into_iter().map(|r| r.agent_id).collect();
    assert_eq!(top, vec!["b".to_owned(), "c".to_owned()]);
}

#[test]
fn results_serialize_flat_entries() -> anyhow::Result<()> {
    let mut s = session(&["a"]);
    s.resolve("a", EntryStatus::Success, Some(12.5), None, 2_000);
    s.finish_if_done(2_000);

    let json = serde_json::to_value(s.results(5))?;
    assert_eq!(json["entries"][0]["agent_id"], "a");
    assert_eq!(json["entries"][0]["status"], "success");
    assert_eq!(json["stats"]["latency"]["avg_ms"], 12.5);
    assert_eq!(json["complete"], true);
    Ok(())
}

fn outcome() -> impl Strategy<Value = (EntryStatus, Option<f64>)> {
    prop_oneof![
        (1.0f64..30_000.0).prop_map(|l| (EntryStatus::Success, Some(l))),
        Just((EntryStatus::Failed, None)),
        Just((EntryStatus::Pending, None)),
    ]
}

proptest! {
    #[test]
    fn stats_are_consistent(outcomes in proptest::collection::vec(outcome(), 0..40), n in 0usize..10) {
        let agents: Vec<String> = (0..outcomes.len()).map(|i| format!("agent-{i}")).collect();
        let mut s = TestSession::new("s".into(), "o".into(), "t".into(), agents.clone(), 0, 30_000);
        for (agent, (status, latency)) in agents.iter().zip(&outcomes) {
            s.resolve(agent, *status, *latency, None, 1);
        }

        let counts = s.counts();
        let stats = s.latency();
        prop_assert_eq!(counts.total, outcomes.len());
        prop_assert_eq!(counts.pending + counts.success + counts.failed + counts.timeout, counts.total);
        prop_assert_eq!(stats.count, counts.success);
        if let (Some(min), Some(avg), Some(max)) = (stats.min_ms, stats.avg_ms, stats.max_ms) {
            prop_assert!(min <= avg + 1e-9 && avg <= max + 1e-9);
        } else {
            prop_assert_eq!(stats.count, 0);
        }

        let bucketed: usize = s.histogram().iter().map(|b| b.count).sum();
        prop_assert_eq!(bucketed, counts.success);

        let fastest = s.fastest(n);
        prop_assert!(fastest.len() <= n.min(counts.success));
        prop_assert!(fastest.windows(2).all(|w| w[0].latency_ms <= w[1].latency_ms));
        if let (Some(first), Some(min)) = (fastest.first(), stats.min_ms) {
            prop_assert_eq!(first.latency_ms, min);
        }
    }
}
