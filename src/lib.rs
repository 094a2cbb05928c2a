pub mod config;
pub mod models;
pub mod db;
pub mod storage;
pub mod queue;
pub mod pipeline;
pub mod claims;
pub mod session;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for embedding applications and integration tests.
///
/// Respects `RUST_LOG`; falls back to the default filter in `config`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
