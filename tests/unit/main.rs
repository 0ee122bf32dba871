//! Unit test modules.

mod composite_test;
mod percentile_test;
mod seed_file_test;
mod test_store_test;
