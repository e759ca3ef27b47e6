//! Logging setup for binaries and tests

/// Install a default env-filtered `tracing` subscriber unless one is already set.
///
/// Libraries embedding the pools usually install their own subscriber; this
/// is a convenience for the demo binary and ad-hoc debugging (`RUST_LOG=ttlpool=trace`).
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
