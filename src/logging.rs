//! Structured logging init.
//!
//! The gateway emits `tracing` events at module-appropriate levels:
//! `info!` for connect/disconnect and lifecycle transitions, `warn!` for
//! recoverable failures, `error!` for fatal/auth failures, `debug!`/
//! `trace!` for frame-level protocol detail.

use tracing_subscriber::{fmt, EnvFilter};

/// Configure the global tracing subscriber once at process start.
///
/// Honors `RUST_LOG`; defaults to `info` for this crate's own spans and
/// `warn` for dependencies when the variable is unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,epiloop=info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init(); // second call must not panic (subscriber already set)
    }
}
