//! Reference seed files.

use forcesync::storage::{Database, PercentileStore, ReferenceSeed};
use forcesync::{Cohort, Discipline};

const SEED_FILE: &str = r#"[
    {"discipline": "CMJ", "metric": "peak_takeoff_power", "cohort": "high_school",
     "values": [3200.0, 3650.5, 4100.0], "source": "2025 combine"},
    {"discipline": "CMJ", "metric": "peak_takeoff_power", "cohort": "pro",
     "values": [5200.0, 6100.0]},
    {"discipline": "IMTP", "metric": "relative_strength", "cohort": "college",
     "values": [2.1, 2.6]}
]"#;

fn import(db: &Database) -> usize {
    let seeds: Vec<ReferenceSeed> = serde_json::from_str(SEED_FILE).unwrap();
    let store = PercentileStore::new(db.connection());
    seeds
        .iter()
        .map(|seed| store.insert_reference_seed(seed).unwrap())
        .sum()
}

#[test]
fn test_seed_file_shape() {
    let seeds: Vec<ReferenceSeed> = serde_json::from_str(SEED_FILE).unwrap();

    assert_eq!(seeds.len(), 3);
    assert_eq!(seeds[0].discipline, Discipline::CounterMovementJump);
    assert_eq!(seeds[0].cohort, Cohort::HighSchool);
    assert_eq!(seeds[0].source.as_deref(), Some("2025 combine"));
    assert!(seeds[1].source.is_none());
    assert_eq!(seeds[2].discipline, Discipline::IsometricMidThighPull);
}

#[test]
fn test_seeds_build_cohort_and_overall_populations() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(import(&db), 7);

    let store = PercentileStore::new(db.connection());
    let high_school = store
        .reference_population(Discipline::CounterMovementJump, "peak_takeoff_power", Some(Cohort::HighSchool))
        .unwrap();
    let overall = store
        .reference_population(Discipline::CounterMovementJump, "peak_takeoff_power", None)
        .unwrap();
    let youth = store
        .reference_population(Discipline::CounterMovementJump, "peak_takeoff_power", Some(Cohort::Youth))
        .unwrap();

    assert_eq!(high_school.len(), 3);
    assert_eq!(overall.len(), 5);
    assert!(youth.is_empty());
    let pct = overall.percentile_of(4100.0).unwrap();
    assert!((pct - 60.0).abs() < 1e-9);
}
