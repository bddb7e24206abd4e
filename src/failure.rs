//! Process-wide unhandled-failure handler registry (spec §4.10).
//!
//! Any registered handler may consume a rejection (returning `true`
//! stops further handlers from seeing it); if none consume it, the
//! default behavior prints a structured error and exits the process
//! with status 1. Mirrors the `OnceLock`-backed global registry shape
//! `sessions::SESSION_MANAGER` uses for process-wide shared state.

use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

pub trait FailureHandler: Send + Sync {
    /// Return `true` if this handler fully handled the failure (no
    /// further handlers run, and the process does not exit).
    fn handle(&self, error: &anyhow::Error) -> bool;
}

#[derive(Default)]
struct Handlers(Vec<Arc<dyn FailureHandler>>);

static REGISTRY: OnceLock<Mutex<Handlers>> = OnceLock::new();

fn registry() -> &'static Mutex<Handlers> {
    REGISTRY.get_or_init(|| Mutex::new(Handlers::default()))
}

pub struct FailureRegistry;

impl FailureRegistry {
    pub async fn register(handler: Arc<dyn FailureHandler>) {
        registry().lock().await.0.push(handler);
    }

    /// Dispatch a process-fatal error through registered handlers. If
    /// none consume it, logs it and exits with status 1.
    pub async fn report_fatal(error: anyhow::Error) {
        let handlers = registry().lock().await;
        for handler in handlers.0.iter() {
            if handler.handle(&error) {
                return;
            }
        }
        tracing::error!(error = %error, "unhandled fatal error");
        std::process::exit(1);
    }

    #[cfg(test)]
    async fn clear() {
        registry().lock().await.0.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Consuming(Arc<AtomicBool>);

    impl FailureHandler for Consuming {
        fn handle(&self, _error: &anyhow::Error) -> bool {
            self.0.store(true, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn a_consuming_handler_prevents_process_exit() {
        FailureRegistry::clear().await;
        let called = Arc::new(AtomicBool::new(false));
        FailureRegistry::register(Arc::new(Consuming(called.clone()))).await;

        FailureRegistry::report_fatal(anyhow::anyhow!("boom")).await;
        assert!(called.load(Ordering::SeqCst));
    }
}
