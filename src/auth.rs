//! Connection auth resolution (spec §4.2).
//!
//! `authorize_connect` is the single decision point for whether an
//! incoming WebSocket/HTTP connection gets in, and if so, which
//! [`Principal`] it authenticates as.

use subtle::ConstantTimeEq;

use crate::config::{ResolvedAuthMode, ResolvedGatewayAuth};
use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    None,
    Token,
    Password,
    Tailscale { user: String },
    DeviceToken { device_id: String },
}

/// Headers relevant to auth, as seen by the connect handler. All are
/// optional; a reverse-proxy deployment is expected to supply the
/// tailscale-related ones consistently or not at all.
#[derive(Debug, Clone, Default)]
pub struct ConnectHeaders<'a> {
    pub tailscale_user_login: Option<&'a str>,
    pub forwarded_for: Option<&'a str>,
    pub forwarded_proto: Option<&'a str>,
    pub forwarded_host: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectAuth<'a> {
    pub token: Option<&'a str>,
    pub password: Option<&'a str>,
    pub device_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    pub principal: Principal,
}

/// Set by tests (and only tests) to exercise the local-direct bypass
/// without standing up a real loopback connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectContext {
    pub is_local_direct: bool,
}

/// Is this request "local-direct" (spec §4.2 step 1)? True iff the peer
/// socket is loopback, the `Host` header names `localhost`/`127.0.0.1`/
/// `::1` or ends with `.ts.net`, and no forwarded headers are present.
/// Local-direct requests never authenticate via tailscale, so a process
/// listening on loopback can never be impersonated as a tailnet user by
/// a caller who merely sets the header.
pub fn is_local_direct(peer_is_loopback: bool, host_header: Option<&str>, headers: &ConnectHeaders<'_>) -> bool {
    if !peer_is_loopback {
        return false;
    }
    let host_ok = host_header
        .map(|h| {
            let bare = h.rsplit_once(':').map(|(host, _port)| host).unwrap_or(h);
            matches!(bare, "localhost" | "127.0.0.1" | "::1") || bare.ends_with(".ts.net")
        })
        .unwrap_or(false);
    if !host_ok {
        return false;
    }
    headers.forwarded_for.is_none() && headers.forwarded_proto.is_none() && headers.forwarded_host.is_none()
}

/// Decide whether a connect attempt is authorized, and under which
/// principal, per the fixed decision order: local-direct bypass,
/// tailscale (both the user-login header and all three forwarded
/// headers must be present), `mode=none`, `mode=token` (constant-time
/// compare), `mode=password` (timing-safe compare), else unauthorized.
pub fn authorize_connect(
    resolved: &ResolvedGatewayAuth,
    headers: &ConnectHeaders<'_>,
    connect: &ConnectAuth<'_>,
    ctx: ConnectContext,
) -> Result<AuthDecision, AuthError> {
    if ctx.is_local_direct {
        return Ok(AuthDecision {
            principal: Principal::None,
        });
    }

    if resolved.allow_tailscale {
        let has_forwarded = headers.forwarded_for.is_some()
            && headers.forwarded_proto.is_some()
            && headers.forwarded_host.is_some();
        match (headers.tailscale_user_login, has_forwarded) {
            (Some(user), true) => {
                return Ok(AuthDecision {
                    principal: Principal::Tailscale {
                        user: user.to_string(),
                    },
                })
            }
            (None, true) => return Err(AuthError::TailscaleUserMissing),
            (Some(_), false) => return Err(AuthError::TailscaleProxyMissing),
            (None, false) => {} // fall through to the configured mode
        }
    }

    match resolved.mode {
        ResolvedAuthMode::None => Ok(AuthDecision {
            principal: Principal::None,
        }),
        ResolvedAuthMode::Token => {
            let configured = resolved.token.as_deref().ok_or(AuthError::TokenMissingConfig)?;
            let given = connect.token.ok_or(AuthError::TokenMissing)?;
            if constant_time_eq(configured, given) {
                Ok(AuthDecision {
                    principal: Principal::Token,
                })
            } else {
                Err(AuthError::TokenMismatch)
            }
        }
        ResolvedAuthMode::Password => {
            let configured = resolved
                .password
                .as_deref()
                .ok_or(AuthError::PasswordMissingConfig)?;
            let given = connect.password.ok_or(AuthError::PasswordMissing)?;
            if constant_time_eq(configured, given) {
                Ok(AuthDecision {
                    principal: Principal::Password,
                })
            } else {
                Err(AuthError::PasswordMismatch)
            }
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
