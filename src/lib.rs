pub mod analytics;
pub mod config;
pub mod ingestion;
pub mod message;
pub mod prelude;
pub mod sinks;
pub mod sources;

/// Installs the global subscriber, filtered with `RUST_LOG`.
///
/// Calling it more than once is harmless, later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    #[cfg(test)]
    let builder = builder.with_test_writer();
    let _ = builder.try_init();
}
