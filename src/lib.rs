//! ForceSync - Force-plate test synchronization
//!
//! Pulls jump and strength force-plate tests from the lab-equipment provider,
//! stores them without duplication, ranks every tracked metric against
//! play-level and global reference populations, and rolls the ranks into
//! composite scores.

pub mod athletes;
pub mod integrations;
pub mod metrics;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use athletes::{AthleteProfile, Cohort};
pub use integrations::forcedecks::{ForceDecksClient, TestProvider};
pub use metrics::disciplines::Discipline;
pub use storage::{AppConfig, Database, ServiceWriter};
pub use sync::{SyncError, SyncOrchestrator, SyncResult};
