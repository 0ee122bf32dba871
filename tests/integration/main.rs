//! Integration test modules.

mod sync_pipeline_test;
