//! Inclusive-rank percentile boundaries.

use forcesync::metrics::percentile::{percentile_rank, PercentilePair, ReferencePopulation};

#[test]
fn test_documented_example() {
    let pct = percentile_rank(&[10.0, 20.0, 30.0], 20.0).unwrap();
    assert!((pct - 66.666_666).abs() < 1e-3);
    assert_eq!(format!("{:.1}", pct), "66.7");
}

#[test]
fn test_population_maximum_ranks_100() {
    let population = ReferencePopulation::new(vec![12.0, 3.0, 7.5, 9.0]);
    assert_eq!(population.percentile_of(12.0), Some(100.0));
    assert_eq!(population.percentile_of(50.0), Some(100.0));
}

#[test]
fn test_population_minimum_ranks_lowest() {
    let population = ReferencePopulation::new((1..=100).map(f64::from).collect());
    assert_eq!(population.percentile_of(1.0), Some(1.0));
    assert_eq!(population.percentile_of(0.5), Some(0.0));
}

#[test]
fn test_unavailable_is_not_zero() {
    let empty = ReferencePopulation::default();
    let overall = ReferencePopulation::new(vec![1.0, 2.0]);

    let pair = PercentilePair::compute(&empty, &overall, 2.0);
    assert_eq!(pair.cohort, None);
    assert_eq!(pair.overall, Some(100.0));
    assert!(!pair.is_unavailable());

    assert!(PercentilePair::compute(&empty, &empty, 2.0).is_unavailable());
}
