// lib.rs: library root shared by the server binary, benchmarks and
// integration tests.
//
// The binary entry point in main.rs only parses arguments and hands off to
// `backend::start_lsp`.

pub mod backend;
pub mod compile;
pub mod config;
pub mod document_store;
pub mod handlers;
pub mod license;
pub mod notifications;
pub mod paths;
pub mod perf;
pub mod project;
pub mod publisher;
pub mod revalidation;
pub mod source_cache;
pub mod state;
pub mod utf16;
// test_utils is available in test builds and when the `test-support` feature is enabled.
// This allows benchmarks and integration tests to import directly instead of #[path] hacks.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
