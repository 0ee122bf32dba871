//! Test store uniqueness under concurrent writers.

use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{TimeZone, Utc};
use forcesync::integrations::forcedecks::{TrialRecord, TrialResult};
use forcesync::storage::{AthleteStore, Database, ServiceWriter, TestStore};
use forcesync::{AthleteProfile, Cohort, Discipline};

fn trials() -> Vec<TrialRecord> {
    vec![TrialRecord {
        recorded_at: Utc.with_ymd_and_hms(2026, 4, 2, 9, 30, 0).unwrap(),
        recorded_timezone: None,
        results: vec![
            TrialResult::trial("PEAK_VERTICAL_FORCE", 3100.0, "N"),
            TrialResult::trial("BODY_WEIGHT", 90.0, "kg"),
        ],
    }]
}

#[test]
fn test_concurrent_writers_store_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("forcesync.db")).unwrap();
    let athlete = AthleteProfile::new("Quinn", Some(Cohort::College)).with_external_id("prof-1");
    AthleteStore::new(db.connection())
        .insert_athlete(&athlete)
        .unwrap();
    let writer = ServiceWriter::elevate(Arc::new(Mutex::new(db)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let writer = writer.clone();
            let athlete_id = athlete.id;
            thread::spawn(move || {
                let recorded_at = Utc.with_ymd_and_hms(2026, 4, 2, 9, 30, 0).unwrap();
                writer
                    .with_transaction(|tx| {
                        TestStore::new(tx).store_test(
                            Discipline::IsometricMidThighPull,
                            &trials(),
                            "imtp-1",
                            &athlete_id,
                            &recorded_at,
                        )
                    })
                    .unwrap()
                    .was_inserted()
            })
        })
        .collect();

    let inserted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|inserted| *inserted)
        .count();

    assert_eq!(inserted, 1);
    let stored = writer
        .with_conn(|conn| TestStore::new(conn).tests_for(Discipline::IsometricMidThighPull, &athlete.id))
        .unwrap();
    assert_eq!(stored.len(), 1);

    let net = stored[0].metrics.get("net_peak_vertical_force").unwrap();
    assert!((net - (3100.0 - 90.0 * 9.81)).abs() < 1e-9);
}

#[test]
fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forcesync.db");
    let athlete = AthleteProfile::new("Rowan", Some(Cohort::Pro));

    {
        let db = Database::open(&path).unwrap();
        AthleteStore::new(db.connection())
            .insert_athlete(&athlete)
            .unwrap();
        TestStore::new(db.connection())
            .store_test(
                Discipline::IsometricMidThighPull,
                &trials(),
                "imtp-1",
                &athlete.id,
                &Utc::now(),
            )
            .unwrap();
    }

    let db = Database::open(&path).unwrap();
    let found = TestStore::new(db.connection())
        .find_test(Discipline::IsometricMidThighPull, "imtp-1", &athlete.id)
        .unwrap();
    assert!(found.is_some());
}
