//! Storage module for database and configuration.

pub mod athlete_store;
pub mod config;
pub mod database;
pub mod percentile_store;
pub mod schema;
pub mod test_store;

pub use athlete_store::AthleteStore;
pub use config::{AppConfig, ConfigError, ProviderConfig, SyncSettings};
pub use database::{Database, DatabaseError, ServiceWriter};
pub use percentile_store::{
    CohortContribution, CompositeRecord, ContributionOutcome, PercentileStore, ReferenceSeed,
};
pub use test_store::{StoreOutcome, StoredTest, TestStore};
