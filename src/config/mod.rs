//! Config & Profile layer (spec §4.1).
//!
//! Exposes `load()`, `resolve_state_dir()` (see [`crate::profile`]), and
//! `migrate()`. Legacy shapes are migrated in place; the migration is
//! value-preserving and idempotent, and reports the paths it changed.

mod schema;

pub use schema::{
    AccountSettings, AgentEntry, AgentsSection, AuthMode, AuthProfile, BindMode, ChannelDefaults,
    ChannelSettings, ChannelsSection, DiscoverySection, GatewayConfig, GatewaySection, PluginEntry,
    PluginsSection, TailscaleMode, TlsSection, WideAreaSection,
};

use crate::error::ConfigError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Result of loading: the resolved configuration plus a list of changed
/// JSON paths if legacy migration touched anything (empty otherwise).
#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub config: GatewayConfig,
    pub changes: Vec<String>,
}

/// Load `epiloop.json` from the state dir. Missing file yields the
/// default config (no migration needed). A present-but-legacy-shaped
/// file is migrated and re-validated.
pub fn load(state_dir: &Path) -> Result<GatewayConfig> {
    let path = config_path(state_dir);
    if !path.exists() {
        return Ok(GatewayConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;

    let result = migrate(raw)?;
    Ok(result.config)
}

pub fn save(state_dir: &Path, config: &GatewayConfig) -> Result<()> {
    let path = config_path(state_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))
}

pub fn config_path(state_dir: &Path) -> PathBuf {
    state_dir.join("epiloop.json")
}

/// Migrate a raw JSON config blob into the current [`GatewayConfig`]
/// shape, reporting every path it rewrote. Value-preserving: no data is
/// dropped, only relocated or re-tagged. Idempotent: migrating an
/// already-current shape produces the same config with no changes.
pub fn migrate(mut raw: serde_json::Value) -> Result<MigrationResult, ConfigError> {
    let mut changes = Vec::new();

    // Legacy: a bare top-level `gatewayPort` number used to live outside
    // the `gateway` object.
    if let Some(port) = raw.get("gatewayPort").and_then(|v| v.as_u64()) {
        let obj = raw.as_object_mut().expect("raw config must be an object");
        let gateway = obj
            .entry("gateway")
            .or_insert_with(|| serde_json::json!({}));
        if let Some(gateway_obj) = gateway.as_object_mut() {
            gateway_obj.insert("port".to_string(), serde_json::json!(port));
        }
        obj.remove("gatewayPort");
        changes.push("gatewayPort -> gateway.port".to_string());
    }

    // Legacy: authProfiles entries used a flat `{provider,label,token,mode:"token"}`
    // shape even when a refresh token was present. Anthropic CLI profiles
    // accept either flow, so migrate `"token"` mode to `"oauth"` whenever
    // a `refreshToken` field is present alongside it.
    if let Some(profiles) = raw.get_mut("authProfiles").and_then(|v| v.as_array_mut()) {
        for (idx, profile) in profiles.iter_mut().enumerate() {
            let Some(profile_obj) = profile.as_object_mut() else {
                continue;
            };
            let is_legacy_token = profile_obj.get("mode").and_then(|m| m.as_str()) == Some("token");
            let provider_is_anthropic =
                profile_obj.get("provider").and_then(|p| p.as_str()) == Some("anthropic");
            let has_refresh = profile_obj.contains_key("refreshToken");

            if is_legacy_token && provider_is_anthropic && has_refresh {
                profile_obj.insert("mode".to_string(), serde_json::json!("oauth"));
                if let Some(refresh) = profile_obj.remove("refreshToken") {
                    profile_obj.insert("refreshToken".to_string(), refresh);
                }
                changes.push(format!("authProfiles[{}].mode: token -> oauth", idx));
            }
        }
    }

    let config: GatewayConfig = serde_json::from_value(raw)
        .map_err(|e| ConfigError::Other(format!("failed to deserialize migrated config: {e}")))?;

    if let Err(errors) = validate(&config) {
        if !changes.is_empty() {
            return Err(ConfigError::MigrationAfterInvalid { changes, errors });
        }
        return Err(ConfigError::Validation(errors));
    }

    Ok(MigrationResult { config, changes })
}

/// Validate a config, returning every violated path rather than failing
/// on the first error.
pub fn validate(config: &GatewayConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let resolved = config.resolve_auth();
    match resolved.mode {
        ResolvedAuthMode::Token if resolved.token.is_none() => {
            errors.push("gateway.auth.token: required when mode=token (or set EPILOOP_GATEWAY_TOKEN)".to_string())
        }
        ResolvedAuthMode::Password if resolved.password.is_none() => {
            errors.push("gateway.auth.password: required when mode=password (or set EPILOOP_GATEWAY_PASSWORD)".to_string())
        }
        _ => {}
    }

    if config.gateway.tls.enabled
        && (config.gateway.tls.cert_path.is_none() || config.gateway.tls.key_path.is_none())
    {
        errors.push("gateway.tls: cert_path and key_path required when enabled".to_string());
    }

    let mut seen = std::collections::HashSet::new();
    for profile in &config.auth_profiles {
        let key = (profile.provider().to_string(), profile.label().to_string());
        if !seen.insert(key.clone()) {
            errors.push(format!(
                "auth_profiles: duplicate (provider={}, label={})",
                key.0, key.1
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Resolved, wire-ready auth decision inputs (spec §3 ResolvedGatewayAuth).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGatewayAuth {
    pub mode: ResolvedAuthMode,
    pub token: Option<String>,
    pub password: Option<String>,
    pub allow_tailscale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedAuthMode {
    None,
    Token,
    Password,
}

impl GatewayConfig {
    /// Resolve `gateway.auth` + `gateway.tailscale_mode` into a
    /// [`ResolvedGatewayAuth`]. `allow_tailscale` defaults to true only
    /// when the tailscale mode is `serve` and the outer mode is not
    /// `password`. A configured token/password takes precedence; absent
    /// one, `EPILOOP_GATEWAY_TOKEN`/`EPILOOP_GATEWAY_PASSWORD` fill in
    /// (spec §6), so a deployment can keep secrets out of `epiloop.json`.
    pub fn resolve_auth(&self) -> ResolvedGatewayAuth {
        let (mode, token, password) = match &self.gateway.auth {
            AuthMode::None => (ResolvedAuthMode::None, None, None),
            AuthMode::Token { token } => (
                ResolvedAuthMode::Token,
                token.clone().or_else(|| std::env::var("EPILOOP_GATEWAY_TOKEN").ok()),
                None,
            ),
            AuthMode::Password { password } => (
                ResolvedAuthMode::Password,
                None,
                password
                    .clone()
                    .or_else(|| std::env::var("EPILOOP_GATEWAY_PASSWORD").ok()),
            ),
        };

        let allow_tailscale = self.gateway.tailscale_mode == TailscaleMode::Serve
            && !matches!(mode, ResolvedAuthMode::Password);

        ResolvedGatewayAuth {
            mode,
            token,
            password,
            allow_tailscale,
        }
    }

    /// Asserts the declared auth mode has its secret configured; called
    /// at startup so the gateway refuses to boot in an insecure state
    /// rather than silently accepting unauthenticated connections.
    pub fn assert_configured(&self) -> Result<(), ConfigError> {
        validate(self).map_err(ConfigError::Validation)
    }

    /// Resolve the outbound chunk limit for `(channel, account)`: per-
    /// account override, else per-channel override, else the channel
    /// defaults, else [`crate::chunk::DEFAULT_CHUNK_LIMIT`] (spec §4.4).
    pub fn resolve_chunk_limit(&self, channel: &str, account: &str) -> usize {
        let channel_settings = self.channels.per_channel.get(channel);
        let account_limit = channel_settings
            .and_then(|c| c.accounts.get(account))
            .and_then(|a| a.chunk_limit);
        let channel_limit = channel_settings.and_then(|c| c.chunk_limit);
        let default_limit = self.channels.defaults.chunk_limit;
        crate::chunk::resolve_limit(account_limit, channel_limit, default_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn migrate_legacy_gateway_port() {
        let raw = json!({ "gatewayPort": 18789 });
        let result = migrate(raw).unwrap();
        assert_eq!(result.config.gateway.port, 18789);
        assert_eq!(result.changes, vec!["gatewayPort -> gateway.port"]);
    }

    #[test]
    fn migrate_is_idempotent() {
        let raw = json!({ "gatewayPort": 18789 });
        let once = migrate(raw).unwrap();
        let as_value = serde_json::to_value(&once.config).unwrap();
        let twice = migrate(as_value).unwrap();
        assert_eq!(once.config, twice.config);
        assert!(twice.changes.is_empty());
    }

    #[test]
    fn migrate_anthropic_token_to_oauth() {
        let raw = json!({
            "authProfiles": [{
                "mode": "token",
                "id": "p1",
                "provider": "anthropic",
                "label": "default",
                "refreshToken": "refresh-abc",
                "expiryMs": 0,
            }]
        });
        let result = migrate(raw).unwrap();
        assert_eq!(
            result.changes,
            vec!["authProfiles[0].mode: token -> oauth"]
        );
        match &result.config.auth_profiles[0] {
            AuthProfile::Oauth { provider, refresh_token, .. } => {
                assert_eq!(provider, "anthropic");
                assert_eq!(refresh_token, "refresh-abc");
            }
            other => panic!("expected Oauth variant, got {other:?}"),
        }
    }

    #[test]
    fn validate_reports_all_paths() {
        let mut config = GatewayConfig::default();
        config.gateway.auth = AuthMode::Token { token: None };
        config.gateway.tls.enabled = true;
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
