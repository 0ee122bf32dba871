//! Metrics module for force-plate disciplines, percentiles and composites.

pub mod composite;
pub mod disciplines;
pub mod percentile;

pub use composite::{CompositeKind, CompositeScore, DatedComposite, DisciplineScore};
pub use disciplines::{Discipline, MetricSet, Reduction};
pub use percentile::{PercentileHistoryEntry, PercentilePair, ReferencePopulation};
