//! Channel-plugin registry & lifecycle (spec §4.6).
//!
//! Generalizes the fixed `MessengerManager` (one concrete adapter per
//! messenger) and `HookRegistry` (declarative eligibility) patterns into
//! a single registry of pluggable channel backends with a start/stop
//! lifecycle.

pub mod channel;

pub use channel::{ChannelApi, ChannelPlugin};

use crate::error::LifecycleError;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

/// Static metadata about a plugin, independent of whether it is
/// currently enabled.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub config_schema: serde_json::Value,
}

struct RegisteredPlugin {
    id: String,
    descriptor: PluginDescriptor,
    plugin: Arc<dyn ChannelPlugin>,
    enabled: bool,
}

/// Registry of known channel plugins, preserving registration order (so
/// start/stop sequencing per spec §4.6 is well-defined — a `HashMap`
/// would not guarantee that). Bundled plugins are registered disabled
/// by default; a deployment opts in per `config.plugins`.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<Vec<RegisteredPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Bundled (first-party) plugins default
    /// disabled; callers flip `enabled` via [`PluginRegistry::set_enabled`]
    /// once config is loaded. Re-registering an id replaces it in place,
    /// preserving its original position.
    pub async fn register(&self, descriptor: PluginDescriptor, plugin: Arc<dyn ChannelPlugin>) {
        let mut plugins = self.plugins.write().await;
        let id = descriptor.id.clone();
        let entry = RegisteredPlugin {
            id: id.clone(),
            descriptor,
            plugin,
            enabled: false,
        };
        match plugins.iter().position(|p| p.id == id) {
            Some(idx) => plugins[idx] = entry,
            None => plugins.push(entry),
        }
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut plugins = self.plugins.write().await;
        match plugins.iter_mut().find(|p| p.id == id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Start every enabled plugin in registration order. A single
    /// plugin's start failure is logged and does not block the rest.
    pub async fn start_all(&self) -> Vec<(String, Result<(), LifecycleError>)> {
        let plugins = self.plugins.read().await;
        let mut results = Vec::new();
        for entry in plugins.iter() {
            if !entry.enabled {
                continue;
            }
            let result = entry.plugin.start().await.map_err(|e| LifecycleError::StartFailed {
                id: entry.id.clone(),
                reason: e.to_string(),
            });
            results.push((entry.id.clone(), result));
        }
        results
    }

    /// Stop every enabled plugin in reverse registration order,
    /// best-effort with a per-plugin timeout.
    pub async fn stop_all(&self, timeout: std::time::Duration) -> Vec<(String, Result<(), LifecycleError>)> {
        let plugins = self.plugins.read().await;
        let mut results = Vec::new();
        for entry in plugins.iter().rev() {
            if !entry.enabled {
                continue;
            }
            let result = match tokio::time::timeout(timeout, entry.plugin.stop()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(LifecycleError::StopFailed {
                    id: entry.id.clone(),
                    reason: e.to_string(),
                }),
                Err(_) => Err(LifecycleError::StopFailed {
                    id: entry.id.clone(),
                    reason: "timed out".to_string(),
                }),
            };
            results.push((entry.id.clone(), result));
        }
        results
    }
}

/// Process-wide registry handle, set once at startup by whichever
/// plugin brings the runtime up (mirrors `sessions::SESSION_MANAGER`'s
/// `OnceLock` global-registry pattern).
static PLUGIN_RUNTIME: OnceLock<Arc<PluginRegistry>> = OnceLock::new();

pub struct PluginRuntime;

impl PluginRuntime {
    /// Must be called exactly once before [`PluginRuntime::get`].
    pub fn register(registry: Arc<PluginRegistry>) {
        let _ = PLUGIN_RUNTIME.set(registry);
    }

    /// Panics with a clear message if called before `register` — a
    /// programmer error, not a runtime condition to recover from.
    pub fn get() -> Arc<PluginRegistry> {
        PLUGIN_RUNTIME
            .get()
            .expect("PluginRuntime::register must be called before PluginRuntime::get")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopPlugin;

    #[async_trait]
    impl ChannelPlugin for NoopPlugin {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn descriptor(id: &str) -> PluginDescriptor {
        PluginDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            config_schema: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn bundled_plugins_start_disabled() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("slack"), Arc::new(NoopPlugin)).await;
        let started = registry.start_all().await;
        assert!(started.is_empty());
    }

    #[tokio::test]
    async fn enabling_a_plugin_allows_it_to_start() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("slack"), Arc::new(NoopPlugin)).await;
        registry.set_enabled("slack", true).await;
        let started = registry.start_all().await;
        assert_eq!(started.len(), 1);
        assert!(started[0].1.is_ok());
    }

    #[tokio::test]
    async fn stop_runs_in_reverse_registration_order() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a"), Arc::new(NoopPlugin)).await;
        registry.register(descriptor("b"), Arc::new(NoopPlugin)).await;
        registry.set_enabled("a", true).await;
        registry.set_enabled("b", true).await;
        let stopped = registry.stop_all(std::time::Duration::from_secs(1)).await;
        assert_eq!(stopped[0].0, "b");
        assert_eq!(stopped[1].0, "a");
    }
}
