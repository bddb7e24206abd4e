//! The channel-plugin surface itself: what a plugin is handed at
//! registration, and the trait it implements.

use crate::hooks::HookRequirements;
use crate::target::ChannelDirectoryEntry;
use async_trait::async_trait;

/// Handed to a plugin's `register` call so it can wire itself into the
/// gateway (deliver outbound messages, answer directory lookups)
/// without depending on the gateway's internals directly.
pub struct ChannelApi {
    pub channel_id: String,
}

/// A pluggable channel backend (Slack, Discord, a custom bridge, ...).
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Start the plugin's background connection/listener.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop the plugin, releasing any connection/listener resources.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Eligibility requirements (missing bins/env/config mean this
    /// plugin is listed but never started).
    fn requirements(&self) -> HookRequirements {
        HookRequirements::default()
    }

    /// Deliver a message to `target`. Implemented per-backend.
    async fn deliver(&self, _target: &str, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// List directory entries visible to this plugin for `account`.
    async fn list_directory(&self, _account: &str) -> anyhow::Result<Vec<ChannelDirectoryEntry>> {
        Ok(Vec::new())
    }
}
