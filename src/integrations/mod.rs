//! External Integrations Module
//!
//! Provides the force-plate provider integration.

pub mod forcedecks;

// Re-export main types for convenience
pub use forcedecks::{
    ChangedTests, ExternalTestRef, ForceDecksClient, ProviderError, TestProvider, TrialRecord,
};
