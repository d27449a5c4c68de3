//! Tracing and logging setup shared by binaries and tests.

/// Initialize process-wide tracing with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

pub use tracing::{init_for_tests, init_with, ObservabilityConfig};

/// Tracing configuration (filters, layers).
pub mod tracing;
