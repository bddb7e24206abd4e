//! Heartbeat visibility & delivery policy (spec §4.9).
//!
//! A pure three-layer precedence resolver: per-account overrides beat
//! per-channel overrides beat channel-wide defaults beat global
//! defaults. Distinct from the model-watchdog monitoring loop in
//! `gateway::heartbeat` — this module only decides what gets *shown*
//! and how, never whether a model call is stuck.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableRenderMode {
    Plain,
    CompactUnicode,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyTo {
    Mention,
    Quote,
    None,
}

/// Fully resolved heartbeat visibility/delivery policy for one
/// account+channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub show_ok: bool,
    pub show_alerts: bool,
    pub use_indicator: bool,
    pub table_render_mode: TableRenderMode,
    pub reply_to: ReplyTo,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            show_ok: false,
            show_alerts: true,
            use_indicator: true,
            table_render_mode: TableRenderMode::Plain,
            reply_to: ReplyTo::None,
        }
    }
}

/// One layer of (possibly partial) overrides. `None` fields fall
/// through to the next-lower-precedence layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatOverrides {
    pub show_ok: Option<bool>,
    pub show_alerts: Option<bool>,
    pub use_indicator: Option<bool>,
    pub table_render_mode: Option<TableRenderMode>,
    pub reply_to: Option<ReplyTo>,
}

/// Merge layers from lowest to highest precedence: global defaults,
/// channel defaults, per-channel override, per-account override.
pub fn resolve(
    global_defaults: HeartbeatOverrides,
    channel_defaults: HeartbeatOverrides,
    per_channel: HeartbeatOverrides,
    per_account: HeartbeatOverrides,
) -> HeartbeatPolicy {
    let base = HeartbeatPolicy::default();
    let layers = [global_defaults, channel_defaults, per_channel, per_account];

    let mut resolved = base;
    for layer in layers {
        if let Some(v) = layer.show_ok {
            resolved.show_ok = v;
        }
        if let Some(v) = layer.show_alerts {
            resolved.show_alerts = v;
        }
        if let Some(v) = layer.use_indicator {
            resolved.use_indicator = v;
        }
        if let Some(v) = layer.table_render_mode {
            resolved.table_render_mode = v;
        }
        if let Some(v) = layer.reply_to {
            resolved.reply_to = v;
        }
    }
    resolved
}
