//! Live-database test suite entry point.

#[path = "../common/mod.rs"]
mod common;
mod search_tests;
mod store_tests;
