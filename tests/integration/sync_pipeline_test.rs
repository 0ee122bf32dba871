//! End-to-end sync runs against a fake provider and in-memory SQLite.

use forcesync::integrations::forcedecks::ProviderError;
use forcesync::metrics::composite::CompositeKind;
use forcesync::metrics::disciplines::{kg_to_lb_rounded, metric_names};
use forcesync::storage::{
    AthleteStore, DatabaseError, PercentileStore, ReferenceSeed, ServiceWriter, SyncSettings,
    TestStore,
};
use forcesync::sync::{RunState, SyncError, SyncStatus};
use forcesync::{AthleteProfile, Cohort, Discipline, SyncOrchestrator};
use uuid::Uuid;

use super::fake_provider::{
    cmj_trials, day, hop_trials, squat_trials, test_ref, writer, FakeProvider,
};

fn add_athlete(writer: &ServiceWriter, athlete: &AthleteProfile) {
    writer
        .with_conn(|conn| AthleteStore::new(conn).insert_athlete(athlete))
        .unwrap();
}

fn seed(writer: &ServiceWriter, discipline: Discipline, metric: &str, cohort: Cohort, values: &[f64]) {
    writer
        .with_conn(|conn| {
            PercentileStore::new(conn).insert_reference_seed(&ReferenceSeed {
                discipline,
                metric: metric.to_string(),
                cohort,
                values: values.to_vec(),
                source: Some("test".to_string()),
            })
        })
        .unwrap();
}

fn seed_cmj(writer: &ServiceWriter, cohort: Cohort, power: &[f64], relative: &[f64]) {
    seed(writer, Discipline::CounterMovementJump, metric_names::PEAK_TAKEOFF_POWER, cohort, power);
    seed(
        writer,
        Discipline::CounterMovementJump,
        metric_names::BODYMASS_RELATIVE_TAKEOFF_POWER,
        cohort,
        relative,
    );
}

fn athlete(writer: &ServiceWriter, id: &Uuid) -> AthleteProfile {
    writer
        .with_conn(|conn| AthleteStore::new(conn).get_athlete(id))
        .unwrap()
        .unwrap()
}

fn stored_count(writer: &ServiceWriter, id: &Uuid) -> usize {
    writer
        .with_conn(|conn| TestStore::new(conn).stored_tests(id))
        .unwrap()
        .len()
}

fn history_count(writer: &ServiceWriter, id: &Uuid) -> usize {
    writer
        .with_conn(|conn| PercentileStore::new(conn).count_history(id))
        .unwrap()
}

fn orchestrator(provider: FakeProvider, writer: &ServiceWriter) -> SyncOrchestrator<FakeProvider> {
    SyncOrchestrator::new(provider, writer.clone(), SyncSettings::default())
}

#[tokio::test]
async fn test_high_school_cmj_scenario() {
    let writer = writer();
    let profile = AthleteProfile::new("Avery", Some(Cohort::HighSchool)).with_external_id("prof-1");
    add_athlete(&writer, &profile);
    seed_cmj(&writer, Cohort::HighSchool, &[1500.0, 1800.0, 2100.0], &[20.0, 25.0, 30.0]);

    let provider = FakeProvider::new();
    provider.add_test(
        "prof-1",
        test_ref("cmj-1", Discipline::CounterMovementJump, "prof-1", day(3)),
        cmj_trials(day(3), 1800.0, 25.0, 80.0),
    );

    let result = orchestrator(provider, &writer).sync_athlete(profile.id).await.unwrap();

    assert!(result.success);
    assert_eq!(result.tests_synced, 1);
    assert_eq!(result.total_tests_found, 1);
    assert!(result.errors.is_none());
    assert_eq!(result.state(), RunState::Done);

    assert_eq!(stored_count(&writer, &profile.id), 1);
    assert_eq!(
        history_count(&writer, &profile.id),
        Discipline::CounterMovementJump.tracked_metrics().len()
    );

    let updated = athlete(&writer, &profile.id);
    let composite = updated.composite_score.unwrap();
    assert!((composite - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(updated.force_profile_composite, None);
    assert_eq!(updated.bodyweight_lb, Some(kg_to_lb_rounded(80.0)));
    assert_eq!(updated.bodyweight_lb, Some(176.4));
    assert!(updated.last_synced_at.is_some());
}

#[tokio::test]
async fn test_resync_does_not_duplicate_but_appends_history() {
    let writer = writer();
    let profile = AthleteProfile::new("Blake", Some(Cohort::College)).with_external_id("prof-2");
    add_athlete(&writer, &profile);

    let provider = FakeProvider::new();
    provider.add_test(
        "prof-2",
        test_ref("cmj-1", Discipline::CounterMovementJump, "prof-2", day(1)),
        cmj_trials(day(1), 2000.0, 27.0, 85.0),
    );
    let orchestrator = orchestrator(provider, &writer);

    let first = orchestrator.sync_athlete(profile.id).await.unwrap();
    let history_after_first = history_count(&writer, &profile.id);
    let second = orchestrator.sync_athlete(profile.id).await.unwrap();

    assert_eq!(first.tests_synced, 1);
    assert_eq!(second.tests_synced, 0);
    assert_eq!(second.total_tests_found, 1);
    assert_eq!(stored_count(&writer, &profile.id), 1);
    assert!(history_count(&writer, &profile.id) >= history_after_first);
    assert_eq!(history_count(&writer, &profile.id), 2 * history_after_first);
}

#[tokio::test]
async fn test_one_failing_test_does_not_abort_the_batch() {
    let writer = writer();
    let profile = AthleteProfile::new("Casey", Some(Cohort::Pro)).with_external_id("prof-3");
    add_athlete(&writer, &profile);

    let provider = FakeProvider::new();
    for n in 1..=5u32 {
        provider.add_test(
            "prof-3",
            test_ref(&format!("hop-{}", n), Discipline::HopJump, "prof-3", day(n)),
            hop_trials(day(n), 1.5 + n as f64 / 10.0),
        );
    }
    provider.fail_trials_for("hop-3");

    let orchestrator = orchestrator(provider, &writer);
    let result = orchestrator.sync_athlete(profile.id).await.unwrap();

    assert!(result.success);
    assert_eq!(result.tests_synced, 4);
    assert_eq!(result.total_tests_found, 5);
    assert_eq!(result.state(), RunState::PartialFailure);
    let errors = result.errors.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("hop-3"));
    assert_eq!(orchestrator.provider().trial_fetches(), 5);

    let stored: Vec<String> = writer
        .with_conn(|conn| TestStore::new(conn).tests_for(Discipline::HopJump, &profile.id))
        .unwrap()
        .into_iter()
        .map(|t| t.provider_test_id)
        .collect();
    assert_eq!(stored, vec!["hop-1", "hop-2", "hop-4", "hop-5"]);

    let history = writer
        .with_conn(|conn| PercentileStore::new(conn).history_for(&profile.id, None))
        .unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|e| e.provider_test_id != "hop-3"));
}

#[tokio::test]
async fn test_contribution_requires_two_distinct_tests() {
    let writer = writer();
    let profile = AthleteProfile::new("Devon", Some(Cohort::College)).with_external_id("prof-4");
    add_athlete(&writer, &profile);

    let provider = FakeProvider::new();
    provider.add_test(
        "prof-4",
        test_ref("cmj-1", Discipline::CounterMovementJump, "prof-4", day(1)),
        cmj_trials(day(1), 1900.0, 24.0, 79.0),
    );
    let orchestrator = orchestrator(provider, &writer);
    orchestrator.sync_athlete(profile.id).await.unwrap();

    let contributions = writer
        .with_conn(|conn| PercentileStore::new(conn).contributions_for(&profile.id))
        .unwrap();
    assert!(contributions.is_empty());

    orchestrator.provider().add_test(
        "prof-4",
        test_ref("cmj-2", Discipline::CounterMovementJump, "prof-4", day(8)),
        cmj_trials(day(8), 2050.0, 26.0, 79.5),
    );
    orchestrator.sync_athlete(profile.id).await.unwrap();

    let contributions = writer
        .with_conn(|conn| PercentileStore::new(conn).contributions_for(&profile.id))
        .unwrap();
    assert_eq!(
        contributions.len(),
        Discipline::CounterMovementJump.tracked_metrics().len()
    );
    assert!(contributions.iter().all(|c| c.provider_test_id == "cmj-2"));
    assert!(contributions.iter().all(|c| c.cohort == Cohort::College));
}

#[tokio::test]
async fn test_force_profile_ignores_cmj() {
    let writer = writer();
    let profile = AthleteProfile::new("Emery", Some(Cohort::College)).with_external_id("prof-5");
    add_athlete(&writer, &profile);
    seed_cmj(&writer, Cohort::College, &[1000.0, 3000.0], &[10.0, 40.0]);
    seed(&writer, Discipline::SquatJump, metric_names::PEAK_TAKEOFF_POWER, Cohort::College, &[1000.0, 2000.0, 3000.0, 4000.0]);
    seed(&writer, Discipline::SquatJump, metric_names::BODYMASS_RELATIVE_TAKEOFF_POWER, Cohort::College, &[10.0, 20.0, 30.0, 40.0]);

    let provider = FakeProvider::new();
    provider.add_test(
        "prof-5",
        test_ref("cmj-1", Discipline::CounterMovementJump, "prof-5", day(2)),
        cmj_trials(day(2), 3000.0, 40.0, 90.0),
    );
    provider.add_test(
        "prof-5",
        test_ref("sj-1", Discipline::SquatJump, "prof-5", day(2)),
        squat_trials(day(2), 2000.0, 20.0),
    );

    orchestrator(provider, &writer).sync_athlete(profile.id).await.unwrap();

    let updated = athlete(&writer, &profile.id);
    // SJ: both metrics rank 50; CMJ ranks 100 and must not count.
    assert_eq!(updated.force_profile_composite, Some(50.0));
    // Rolling takes both disciplines: (100 + 50) / 2.
    assert_eq!(updated.composite_score, Some(75.0));
}

#[tokio::test]
async fn test_athlete_without_link_is_not_found() {
    let writer = writer();
    let profile = AthleteProfile::new("Finley", Some(Cohort::Youth));
    add_athlete(&writer, &profile);

    let error = orchestrator(FakeProvider::new(), &writer)
        .sync_athlete(profile.id)
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::NoExternalLink(id) if id == profile.id));
    assert_eq!(error.status(), SyncStatus::NotFound);
}

#[tokio::test]
async fn test_unknown_athlete_is_not_found() {
    let writer = writer();
    let error = orchestrator(FakeProvider::new(), &writer)
        .sync_athlete(Uuid::new_v4())
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::AthleteNotFound(_)));
    assert_eq!(error.status().code(), 404);
}

#[tokio::test]
async fn test_missing_cohort_fails_precondition() {
    let writer = writer();
    let profile = AthleteProfile::new("Gray", None).with_external_id("prof-6");
    add_athlete(&writer, &profile);

    let provider = FakeProvider::new();
    provider.add_test(
        "prof-6",
        test_ref("cmj-1", Discipline::CounterMovementJump, "prof-6", day(1)),
        cmj_trials(day(1), 1800.0, 25.0, 80.0),
    );
    let orchestrator = orchestrator(provider, &writer);
    let error = orchestrator.sync_athlete(profile.id).await.unwrap_err();

    assert!(matches!(error, SyncError::CohortMissing(_)));
    assert_eq!(error.status(), SyncStatus::PreconditionFailed);
    assert_eq!(orchestrator.provider().trial_fetches(), 0);
    assert_eq!(stored_count(&writer, &profile.id), 0);
}

#[tokio::test]
async fn test_pending_link_resolves_and_persists() {
    let writer = writer();
    let profile = AthleteProfile::new("Harper", Some(Cohort::HighSchool)).with_pending_link("sync-9");
    add_athlete(&writer, &profile);

    let provider = FakeProvider::new();
    provider.add_profile("sync-9", "prof-9");
    provider.add_test(
        "prof-9",
        test_ref("hop-1", Discipline::HopJump, "prof-9", day(4)),
        hop_trials(day(4), 2.2),
    );

    let result = orchestrator(provider, &writer).sync_athlete(profile.id).await.unwrap();
    assert_eq!(result.tests_synced, 1);

    let updated = athlete(&writer, &profile.id);
    assert_eq!(updated.external_id.as_deref(), Some("prof-9"));
    assert!(updated.pending_link_id.is_none());
}

#[tokio::test]
async fn test_unresolved_pending_link_aborts_run() {
    let writer = writer();
    let profile = AthleteProfile::new("Indy", Some(Cohort::HighSchool)).with_pending_link("sync-x");
    add_athlete(&writer, &profile);

    let error = orchestrator(FakeProvider::new(), &writer)
        .sync_athlete(profile.id)
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::NoExternalLink(_)));
    assert!(athlete(&writer, &profile.id).last_synced_at.is_none());
}

#[tokio::test]
async fn test_unknown_test_type_is_reported_not_fatal() {
    let writer = writer();
    let profile = AthleteProfile::new("Jules", Some(Cohort::Pro)).with_external_id("prof-10");
    add_athlete(&writer, &profile);

    let provider = FakeProvider::new();
    provider.add_unsupported("prof-10", "dj-1", "DJ");
    provider.add_test(
        "prof-10",
        test_ref("hop-1", Discipline::HopJump, "prof-10", day(5)),
        hop_trials(day(5), 2.0),
    );

    let result = orchestrator(provider, &writer).sync_athlete(profile.id).await.unwrap();

    assert_eq!(result.total_tests_found, 2);
    assert_eq!(result.tests_synced, 1);
    let errors = result.errors.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("dj-1"));
    assert!(errors[0].contains("DJ"));
}

#[tokio::test]
async fn test_empty_trial_set_is_a_no_op() {
    let writer = writer();
    let profile = AthleteProfile::new("Kai", Some(Cohort::College)).with_external_id("prof-11");
    add_athlete(&writer, &profile);

    let provider = FakeProvider::new();
    provider.add_test(
        "prof-11",
        test_ref("ppu-1", Discipline::ProneTakeoffPull, "prof-11", day(6)),
        Vec::new(),
    );

    let result = orchestrator(provider, &writer).sync_athlete(profile.id).await.unwrap();

    assert_eq!(result.tests_synced, 0);
    assert_eq!(result.total_tests_found, 1);
    assert!(result.errors.is_none());
    assert_eq!(stored_count(&writer, &profile.id), 0);
    assert_eq!(history_count(&writer, &profile.id), 0);
}

#[tokio::test]
async fn test_listing_failure_is_run_level() {
    let writer = writer();
    let profile = AthleteProfile::new("Lane", Some(Cohort::College)).with_external_id("prof-12");
    add_athlete(&writer, &profile);

    let provider = FakeProvider::new();
    provider.fail_listing(ProviderError::Malformed("tests: expected array".to_string()));

    let error = orchestrator(provider, &writer)
        .sync_athlete(profile.id)
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::Provider(ProviderError::Malformed(_))));
    assert_eq!(error.status(), SyncStatus::BadGateway);
}

#[tokio::test]
async fn test_recompute_all_appends_superseding_history() {
    let writer = writer();
    let profile = AthleteProfile::new("Morgan", Some(Cohort::HighSchool)).with_external_id("prof-13");
    add_athlete(&writer, &profile);
    seed_cmj(&writer, Cohort::HighSchool, &[1500.0, 1800.0, 2100.0], &[20.0, 25.0, 30.0]);
    seed_cmj(&writer, Cohort::College, &[1900.0, 2000.0], &[26.0, 28.0]);

    let provider = FakeProvider::new();
    provider.add_test(
        "prof-13",
        test_ref("cmj-1", Discipline::CounterMovementJump, "prof-13", day(3)),
        cmj_trials(day(3), 1800.0, 25.0, 80.0),
    );
    let orchestrator = orchestrator(provider, &writer);
    orchestrator.sync_athlete(profile.id).await.unwrap();
    let before = history_count(&writer, &profile.id);

    let summary = orchestrator.recompute_all(profile.id, Cohort::College).unwrap();

    assert_eq!(summary.cohort, Cohort::College);
    assert_eq!(summary.tests_recomputed, 1);
    assert_eq!(summary.history_rows, before);
    assert_eq!(history_count(&writer, &profile.id), 2 * before);

    // Below every College sample on both metrics.
    assert_eq!(summary.composite_score, Some(0.0));
    let updated = athlete(&writer, &profile.id);
    assert_eq!(updated.cohort, Some(Cohort::College));
    assert_eq!(updated.composite_score, Some(0.0));

    let latest = writer
        .with_conn(|conn| PercentileStore::new(conn).latest_entries(&profile.id))
        .unwrap();
    assert_eq!(latest.len(), before);
    assert!(latest.iter().all(|e| e.cohort == Cohort::College));

    // Earlier rows are kept as a dated record.
    let history = writer
        .with_conn(|conn| PercentileStore::new(conn).history_for(&profile.id, None))
        .unwrap();
    assert!(history.iter().any(|e| e.cohort == Cohort::HighSchool));

    let rolling = writer
        .with_conn(|conn| PercentileStore::new(conn).composite_history(&profile.id, CompositeKind::Rolling))
        .unwrap();
    assert_eq!(rolling.len(), 2);
    assert_eq!(rolling[1].cohort, Cohort::College);
}

#[tokio::test]
async fn test_sync_all_linked_isolates_athletes() {
    let writer = writer();
    let linked_a = AthleteProfile::new("Noa", Some(Cohort::Pro)).with_external_id("prof-a");
    let linked_b = AthleteProfile::new("Oak", Some(Cohort::Pro)).with_external_id("prof-b");
    let dangling = AthleteProfile::new("Pax", Some(Cohort::Pro)).with_pending_link("sync-unknown");
    let unlinked = AthleteProfile::new("Quin", Some(Cohort::Pro));
    for athlete in [&linked_a, &linked_b, &dangling, &unlinked] {
        add_athlete(&writer, athlete);
    }

    let provider = FakeProvider::new();
    provider.add_test(
        "prof-a",
        test_ref("a-1", Discipline::HopJump, "prof-a", day(1)),
        hop_trials(day(1), 2.0),
    );
    provider.add_test(
        "prof-b",
        test_ref("b-1", Discipline::HopJump, "prof-b", day(1)),
        hop_trials(day(1), 2.4),
    );
    provider.add_test(
        "prof-b",
        test_ref("b-2", Discipline::HopJump, "prof-b", day(2)),
        hop_trials(day(2), 2.5),
    );

    let summary = orchestrator(provider, &writer).sync_all_linked().await.unwrap();

    assert_eq!(summary.athletes, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.tests_synced, 3);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].athlete_id, dangling.id);
}

fn lock_with_trigger(writer: &ServiceWriter, sql: &str) {
    writer
        .with_conn(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
        })
        .unwrap();
}

#[tokio::test]
async fn test_contribution_failure_keeps_history_and_contributes_nothing() {
    let writer = writer();
    let profile = AthleteProfile::new("Rory", Some(Cohort::College)).with_external_id("prof-14");
    add_athlete(&writer, &profile);
    lock_with_trigger(
        &writer,
        "CREATE TRIGGER lock_contributions BEFORE INSERT ON cohort_contributions
         BEGIN SELECT RAISE(ABORT, 'contributions are read-only'); END;",
    );

    let provider = FakeProvider::new();
    for n in 1..=2u32 {
        provider.add_test(
            "prof-14",
            test_ref(&format!("hop-{}", n), Discipline::HopJump, "prof-14", day(n)),
            hop_trials(day(n), 2.0 + n as f64 / 10.0),
        );
    }

    let result = orchestrator(provider, &writer).sync_athlete(profile.id).await.unwrap();

    assert_eq!(result.tests_synced, 2);
    assert!(result.errors.is_none());
    assert_eq!(stored_count(&writer, &profile.id), 2);
    assert_eq!(history_count(&writer, &profile.id), 2);

    let contributions = writer
        .with_conn(|conn| PercentileStore::new(conn).contributions_for(&profile.id))
        .unwrap();
    assert!(contributions.is_empty());
    assert!(athlete(&writer, &profile.id).last_synced_at.is_some());
}

#[tokio::test]
async fn test_bodyweight_failure_does_not_fail_the_test() {
    let writer = writer();
    let profile = AthleteProfile::new("Sage", Some(Cohort::HighSchool)).with_external_id("prof-15");
    add_athlete(&writer, &profile);
    seed_cmj(&writer, Cohort::HighSchool, &[1500.0, 1800.0, 2100.0], &[20.0, 25.0, 30.0]);
    lock_with_trigger(
        &writer,
        "CREATE TRIGGER lock_bodyweight BEFORE UPDATE OF bodyweight_lb ON athletes
         BEGIN SELECT RAISE(ABORT, 'bodyweight is read-only'); END;",
    );

    let provider = FakeProvider::new();
    provider.add_test(
        "prof-15",
        test_ref("cmj-1", Discipline::CounterMovementJump, "prof-15", day(3)),
        cmj_trials(day(3), 1800.0, 25.0, 80.0),
    );

    let result = orchestrator(provider, &writer).sync_athlete(profile.id).await.unwrap();

    assert_eq!(result.tests_synced, 1);
    assert!(result.errors.is_none());
    assert_eq!(stored_count(&writer, &profile.id), 1);
    assert_eq!(
        history_count(&writer, &profile.id),
        Discipline::CounterMovementJump.tracked_metrics().len()
    );

    let updated = athlete(&writer, &profile.id);
    assert_eq!(updated.bodyweight_lb, None);
    assert!(updated.composite_score.is_some());
}
