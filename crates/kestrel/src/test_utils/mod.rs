//
// test_utils/mod.rs
//
// Shared fixtures for unit tests, integration tests and benchmarks
//

pub mod counting_manager;
pub mod fixture_workspace;

pub use counting_manager::CountingLibraryManager;
pub use fixture_workspace::{create_fixture_workspace, FixtureConfig, TestWorkspace};
