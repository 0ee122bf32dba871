//! Composite math over history rows.

use chrono::{Duration, TimeZone, Utc};
use forcesync::metrics::composite::{force_profile_composite, rolling_composite};
use forcesync::metrics::percentile::PercentileHistoryEntry;
use forcesync::{Cohort, Discipline};
use uuid::Uuid;

fn row(discipline: Discipline, test_id: &str, days_ago: i64, pct: f64) -> PercentileHistoryEntry {
    let newest = Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap();
    PercentileHistoryEntry {
        athlete_id: Uuid::nil(),
        discipline,
        provider_test_id: test_id.to_string(),
        metric: discipline.tracked_metrics()[0].to_string(),
        value: 1.0,
        cohort: Cohort::Pro,
        percentile_cohort: Some(pct),
        percentile_overall: Some(pct / 2.0),
        test_date: newest - Duration::days(days_ago),
        computed_at: newest,
    }
}

#[test]
fn test_cmj_only_athlete_has_no_force_profile() {
    let history: Vec<_> = (0..4)
        .map(|n| row(Discipline::CounterMovementJump, &format!("c{}", n), n, 95.0))
        .collect();

    assert!(force_profile_composite(&history).is_none());
    assert!(rolling_composite(&history, 90).is_some());
}

#[test]
fn test_all_four_force_profile_disciplines() {
    let history = vec![
        row(Discipline::SquatJump, "s1", 400, 20.0),
        row(Discipline::HopJump, "h1", 10, 40.0),
        row(Discipline::ProneTakeoffPull, "p1", 5, 60.0),
        row(Discipline::IsometricMidThighPull, "i1", 0, 80.0),
        row(Discipline::CounterMovementJump, "c1", 0, 0.0),
    ];

    let profile = force_profile_composite(&history).unwrap();
    assert_eq!(profile.cohort, Some(50.0));
    assert_eq!(profile.overall, Some(25.0));
    assert_eq!(profile.disciplines.len(), 4);
    assert!(!profile.disciplines.contains(&Discipline::CounterMovementJump));

    // SJ is outside the rolling window; CMJ counts there.
    let rolling = rolling_composite(&history, 90).unwrap();
    assert_eq!(rolling.disciplines.len(), 4);
    assert!(!rolling.disciplines.contains(&Discipline::SquatJump));
    assert_eq!(rolling.cohort, Some(45.0));
}

#[test]
fn test_empty_history_has_no_composites() {
    assert!(rolling_composite(&[], 90).is_none());
    assert!(force_profile_composite(&[]).is_none());
}
