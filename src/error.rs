//! Structured error taxonomy for the gateway core.
//!
//! Module boundaries bubble errors with `anyhow::Result` + `.context(...)`
//! like the rest of the crate; call sites that need to branch on *kind*
//! (local recovery vs surface-to-user vs exit-nonzero) match on
//! [`GatewayError`] directly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("auth: {0}")]
    Auth(#[from] AuthError),

    #[error("resolution: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("delivery: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("runner: {0}")]
    Runner(#[from] RunnerError),

    #[error("node-rpc: {0}")]
    NodeRpc(#[from] NodeRpcError),

    #[error("lifecycle: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl GatewayError {
    /// Propagation policy per spec §7: which kinds are locally
    /// recoverable (retry/fallback) vs. must surface to the end user vs.
    /// must exit the process non-zero.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, GatewayError::Delivery(_) | GatewayError::NodeRpc(_))
    }

    pub fn surfaces_to_user(&self) -> bool {
        matches!(self, GatewayError::Resolution(_) | GatewayError::Auth(_))
    }

    pub fn exits_process(&self) -> bool {
        matches!(self, GatewayError::Config(_) | GatewayError::Fatal(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("schema validation failed: {0:?}")]
    Validation(Vec<String>),
    #[error("migration left the config invalid after changes {changes:?}: {errors:?}")]
    MigrationAfterInvalid {
        changes: Vec<String>,
        errors: Vec<String>,
    },
    #[error("missing required secret for auth mode {mode}")]
    MissingSecret { mode: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token configured for token mode")]
    TokenMissingConfig,
    #[error("connect attempt carried no token")]
    TokenMissing,
    #[error("token did not match configured token")]
    TokenMismatch,
    #[error("no password configured for password mode")]
    PasswordMissingConfig,
    #[error("connect attempt carried no password")]
    PasswordMissing,
    #[error("password did not match configured password")]
    PasswordMismatch,
    #[error("tailscale user login header missing")]
    TailscaleUserMissing,
    #[error("tailscale proxy signature headers missing")]
    TailscaleProxyMissing,
    #[error("unauthorized")]
    Unauthorized,
}

impl AuthError {
    /// Stable machine-readable reason code, as returned on the wire.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthError::TokenMissingConfig => "token_missing_config",
            AuthError::TokenMissing => "token_missing",
            AuthError::TokenMismatch => "token_mismatch",
            AuthError::PasswordMissingConfig => "password_missing_config",
            AuthError::PasswordMissing => "password_missing",
            AuthError::PasswordMismatch => "password_mismatch",
            AuthError::TailscaleUserMissing => "tailscale_user_missing",
            AuthError::TailscaleProxyMissing => "tailscale_proxy_missing",
            AuthError::Unauthorized => "unauthorized",
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("ambiguous target {query:?}: {candidates:?}")]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },
    #[error("unknown target {query:?}: {hint}")]
    Unknown { query: String, hint: String },
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("channel plugin rejected delivery: {0}")]
    Rejected(String),
    #[error("delivery timed out")]
    TimedOut,
    #[error("channel returned structured error: {code}: {message}")]
    Structured { code: String, message: String },
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("model error: {0}")]
    Model(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("run timed out")]
    TimedOut,
    #[error("internal runner error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum NodeRpcError {
    #[error("node unavailable: {0}")]
    Unavailable(String),
    #[error("permission required: {0}")]
    PermissionRequired(String),
    #[error("system run denied: {0}")]
    SystemRunDenied(String),
    #[error("invocation timed out")]
    TimedOut,
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

impl NodeRpcError {
    /// Stable machine-readable code (spec §6). The companion node owns
    /// its own capability-specific permission codes (`CAMERA_
    /// PERMISSION_REQUIRED`, `LOCATION_PERMISSION_REQUIRED`, ...) and
    /// reports them opaquely in `node.reply`'s `error` payload; this
    /// enum only covers failures the gateway core itself detects before
    /// or around the RPC round-trip.
    pub fn stable_code(&self) -> &'static str {
        match self {
            NodeRpcError::Unavailable(_) => "NODE_BACKGROUND_UNAVAILABLE",
            NodeRpcError::PermissionRequired(_) => "PERMISSION_REQUIRED",
            NodeRpcError::SystemRunDenied(_) => "SYSTEM_RUN_DENIED",
            NodeRpcError::TimedOut => "NODE_RPC_TIMEOUT",
            NodeRpcError::PayloadTooLarge(_) => "NODE_RPC_PAYLOAD_TOO_LARGE",
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("plugin {id} failed to start: {reason}")]
    StartFailed { id: String, reason: String },
    #[error("plugin {id} failed to stop: {reason}")]
    StopFailed { id: String, reason: String },
    #[error("service dependency missing: {0}")]
    DependencyMissing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_reason_codes_are_stable() {
        assert_eq!(AuthError::TokenMismatch.reason_code(), "token_mismatch");
        assert_eq!(
            AuthError::TailscaleUserMissing.reason_code(),
            "tailscale_user_missing"
        );
    }

    #[test]
    fn node_rpc_stable_codes_match_spec() {
        assert_eq!(
            NodeRpcError::Unavailable("offline".into()).stable_code(),
            "NODE_BACKGROUND_UNAVAILABLE"
        );
        assert_eq!(
            NodeRpcError::SystemRunDenied("blocked by policy".into()).stable_code(),
            "SYSTEM_RUN_DENIED"
        );
    }

    #[test]
    fn propagation_policy_matches_taxonomy() {
        let delivery: GatewayError = DeliveryError::TimedOut.into();
        assert!(delivery.is_locally_recoverable());
        assert!(!delivery.surfaces_to_user());

        let resolution: GatewayError = ResolutionError::Unknown {
            query: "ops".into(),
            hint: "no matches".into(),
        }
        .into();
        assert!(resolution.surfaces_to_user());
        assert!(!resolution.exits_process());

        let config: GatewayError = ConfigError::MissingSecret { mode: "token".into() }.into();
        assert!(config.exits_process());
    }
}
