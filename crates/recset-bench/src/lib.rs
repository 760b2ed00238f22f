//! Benchmark suite for the recset execution core.
//!
//! # Benchmark Categories
//!
//! - **filter**: Predicate evaluation over full scans vs index range seeks
//! - **join**: Join algorithm comparison at different cardinalities
//! - **cache**: Plan compilation cost vs cached reuse

pub mod fixtures;

pub use fixtures::{orders_index, users_index, users_scan, Scale};

/// Installs a fmt subscriber filtered by `RUST_LOG`.
///
/// Benches are silent by default; set `RUST_LOG=recset_core=debug` to
/// watch plan rewrites while profiling. Repeat calls are no-ops.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}
