//! Process-wide tracing setup for claimq binaries and tests.

/// Initialize process-wide tracing (JSON, `RUST_LOG`, default `info`).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
