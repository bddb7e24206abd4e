//! Declarative configuration schema.
//!
//! One struct per top-level config key, each `#[serde(default)]`, in the
//! nested-config convention this codebase uses elsewhere for agent/
//! channel/plugin settings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub channels: ChannelsSection,
    #[serde(default)]
    pub agents: AgentsSection,
    #[serde(default)]
    pub plugins: PluginsSection,
    #[serde(default)]
    pub auth_profiles: Vec<AuthProfile>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySection::default(),
            discovery: DiscoverySection::default(),
            channels: ChannelsSection::default(),
            agents: AgentsSection::default(),
            plugins: PluginsSection::default(),
            auth_profiles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum BindMode {
    Loopback,
    Tailnet,
    All,
}

impl Default for BindMode {
    fn default() -> Self {
        BindMode::Loopback
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum TailscaleMode {
    Off,
    Serve,
    Funnel,
}

impl Default for TailscaleMode {
    fn default() -> Self {
        TailscaleMode::Off
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum AuthMode {
    None,
    Token { token: Option<String> },
    Password { password: Option<String> },
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TlsSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySection {
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub bind: BindMode,
    #[serde(default)]
    pub auth: AuthMode,
    #[serde(default)]
    pub tailscale_mode: TailscaleMode,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub http_chat_completions_enabled: bool,
}

fn default_gateway_port() -> u16 {
    9001
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: BindMode::default(),
            auth: AuthMode::default(),
            tailscale_mode: TailscaleMode::default(),
            tls: TlsSection::default(),
            http_chat_completions_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySection {
    #[serde(default)]
    pub wide_area: WideAreaSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WideAreaSection {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsSection {
    #[serde(default)]
    pub defaults: ChannelDefaults,
    /// Per-channel settings keyed by channel name (e.g. "whatsapp").
    #[serde(default)]
    pub per_channel: HashMap<String, ChannelSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_limit: Option<usize>,
    /// Per-account overrides keyed by account id.
    #[serde(default)]
    pub accounts: HashMap<String, AccountSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_limit: Option<usize>,
    #[serde(default)]
    pub resolve_ambiguous: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentsSection {
    #[serde(default)]
    pub default_agent_id: Option<String>,
    #[serde(default)]
    pub list: Vec<AgentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntry {
    pub id: String,
    #[serde(default)]
    pub routing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PluginsSection {
    /// Plugin id -> enabled + opaque per-plugin config blob.
    #[serde(default)]
    pub entries: HashMap<String, PluginEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PluginEntry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A credential usable with a model provider (spec §3 AuthProfile).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum AuthProfile {
    Oauth {
        id: String,
        provider: String,
        label: String,
        refresh_token: String,
        expiry_ms: u64,
    },
    Token {
        id: String,
        provider: String,
        label: String,
        token: String,
    },
}

impl AuthProfile {
    pub fn provider(&self) -> &str {
        match self {
            AuthProfile::Oauth { provider, .. } => provider,
            AuthProfile::Token { provider, .. } => provider,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            AuthProfile::Oauth { label, .. } => label,
            AuthProfile::Token { label, .. } => label,
        }
    }
}
