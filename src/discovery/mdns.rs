//! Local-network advertiser via multicast mDNS (spec §4.8).

use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::HashMap;

pub const SERVICE_TYPE: &str = "_epiloop-gw._tcp.local.";
pub const ENV_DISABLE_BONJOUR: &str = "EPILOOP_DISABLE_BONJOUR";

#[derive(Debug, Clone)]
pub struct AdvertiseParams {
    pub role: String,
    pub display_name: String,
    pub lan_host: String,
    pub gateway_port: u16,
    pub gateway_tls: bool,
    pub gateway_tls_sha256: Option<String>,
    pub canvas_port: Option<u16>,
    pub ssh_port: u16,
    pub transport: String,
    pub cli_path: Option<String>,
    pub tailnet_dns: Option<String>,
}

impl AdvertiseParams {
    pub fn ssh_port_or_default(ssh_port: Option<u16>) -> u16 {
        ssh_port.unwrap_or(22)
    }
}

/// Idempotent instance-name normalization: trims whitespace, falls back
/// to "Epiloop" for an empty name, leaves a name alone if it already
/// mentions "Epiloop" (case-insensitively), otherwise appends the
/// suffix. Re-running on an already-normalized name is a no-op.
pub fn format_instance_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "Epiloop".to_string();
    }
    if trimmed.to_ascii_lowercase().contains("epiloop") {
        return trimmed.to_string();
    }
    format!("{trimmed} (Epiloop)")
}

fn txt_records(params: &AdvertiseParams) -> HashMap<String, String> {
    let mut txt = HashMap::new();
    txt.insert("role".to_string(), params.role.clone());
    txt.insert("displayName".to_string(), params.display_name.clone());
    txt.insert("lanHost".to_string(), params.lan_host.clone());
    txt.insert("gatewayPort".to_string(), params.gateway_port.to_string());
    txt.insert("gatewayTls".to_string(), params.gateway_tls.to_string());
    if let Some(sha) = &params.gateway_tls_sha256 {
        txt.insert("gatewayTlsSha256".to_string(), sha.clone());
    }
    if let Some(canvas) = params.canvas_port {
        txt.insert("canvasPort".to_string(), canvas.to_string());
    }
    txt.insert("sshPort".to_string(), params.ssh_port.to_string());
    txt.insert("transport".to_string(), params.transport.clone());
    if let Some(cli) = &params.cli_path {
        txt.insert("cliPath".to_string(), cli.clone());
    }
    // Only emitted when the tailnet hostname is actually known; never
    // derived from a bare IPv6 address (see DESIGN.md open question 3).
    if let Some(dns) = &params.tailnet_dns {
        txt.insert("tailnetDns".to_string(), dns.clone());
    }
    txt
}

/// Registers the `_epiloop-gw._tcp` mDNS service. Disabled under tests
/// or when `EPILOOP_DISABLE_BONJOUR=1`.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl MdnsAdvertiser {
    pub fn start(params: &AdvertiseParams, env: &HashMap<String, String>) -> anyhow::Result<Option<Self>> {
        if env.get(ENV_DISABLE_BONJOUR).map(|v| v == "1").unwrap_or(false) || cfg!(test) {
            return Ok(None);
        }

        let daemon = ServiceDaemon::new()?;
        let instance_name = format_instance_name(&params.display_name);
        let txt = txt_records(params);
        let txt_refs: Vec<(&str, &str)> = txt.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let service_info = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &params.lan_host,
            "",
            params.gateway_port,
            &txt_refs[..],
        )?;

        daemon.register(service_info.clone())?;

        Ok(Some(Self {
            daemon,
            fullname: service_info.get_fullname().to_string(),
        }))
    }

    /// Explicit retraction before process exit, ahead of the mDNS
    /// daemon's own teardown.
    pub fn retract(&self) -> anyhow::Result<()> {
        self.daemon.unregister(&self.fullname)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_instance_name_handles_empty() {
        assert_eq!(format_instance_name(""), "Epiloop");
        assert_eq!(format_instance_name("   "), "Epiloop");
    }

    #[test]
    fn format_instance_name_leaves_existing_mention() {
        assert_eq!(format_instance_name("My Epiloop Gateway"), "My Epiloop Gateway");
        assert_eq!(format_instance_name("my epiloop gw"), "my epiloop gw");
    }

    #[test]
    fn format_instance_name_appends_suffix() {
        assert_eq!(format_instance_name("Mac Mini"), "Mac Mini (Epiloop)");
    }

    #[test]
    fn format_instance_name_is_idempotent() {
        let once = format_instance_name("Mac Mini");
        let twice = format_instance_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn disabled_under_tests() {
        let params = AdvertiseParams {
            role: "operator".into(),
            display_name: "Test".into(),
            lan_host: "test.local".into(),
            gateway_port: 9001,
            gateway_tls: false,
            gateway_tls_sha256: None,
            canvas_port: None,
            ssh_port: 22,
            transport: "ws".into(),
            cli_path: None,
            tailnet_dns: None,
        };
        let result = MdnsAdvertiser::start(&params, &HashMap::new()).unwrap();
        assert!(result.is_none());
    }
}
