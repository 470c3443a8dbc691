//
// lib.rs
//
// Keyword namespace and resolution engine. The binary entry point lives in
// main.rs; benches/ and tests/ use this crate directly.
//

pub mod backend;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod library_doc;
pub mod library_manager;
pub mod model;
pub mod names;
pub mod namespace;
pub mod parser;
pub mod revalidation;
pub mod state;
pub mod stdlib;
pub mod utf16;
// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
