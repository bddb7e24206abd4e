//! Unicast wide-area DNS-SD zone file renderer (spec §4.8).
//!
//! Writes a BIND-style zone file under `~/.epiloop/dns/epiloop.internal.db`
//! so a tailnet-wide unicast DNS-SD resolver can find this gateway
//! without multicast reachability. Rewritten only when content actually
//! changes, so the file's mtime (and any serial derived from it) stays
//! stable across repeated no-op renders.

use std::path::{Path, PathBuf};

pub const ZONE_ORIGIN: &str = "epiloop.internal.";
pub const ZONE_RELATIVE_PATH: &str = ".epiloop/dns/epiloop.internal.db";

#[derive(Debug, Clone)]
pub struct ZoneRecord {
    pub host: String,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub txt: Vec<(String, String)>,
}

pub fn zone_path(home: &Path) -> PathBuf {
    home.join(ZONE_RELATIVE_PATH)
}

/// Render the zone file body for one or more gateway instances.
pub fn render_zone(records: &[ZoneRecord]) -> String {
    let mut out = String::new();
    out.push_str(&format!("$ORIGIN {ZONE_ORIGIN}\n"));

    for record in records {
        if let Some(ipv4) = &record.ipv4 {
            out.push_str(&format!("{}\tIN\tA\t{}\n", record.host, ipv4));
        }
        if let Some(ipv6) = &record.ipv6 {
            out.push_str(&format!("{}\tIN\tAAAA\t{}\n", record.host, ipv6));
        }

        let service = "_epiloop-gw._tcp";
        out.push_str(&format!("{service}\tIN\tPTR\t{}.{service}\n", record.host));
        out.push_str(&format!(
            "{}.{service}\tIN\tSRV\t{} {} {} {}\n",
            record.host, record.priority, record.weight, record.port, record.host
        ));

        let txt_body: String = record
            .txt
            .iter()
            .map(|(k, v)| format!("\"{k}={v}\""))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("{}.{service}\tIN\tTXT\t{txt_body}\n", record.host));
    }

    out
}

/// Write the zone file only if its content changed. Returns `true` if
/// the file was (re)written.
pub fn write_zone_if_changed(path: &Path, content: &str) -> std::io::Result<bool> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        if existing == content {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(true)
}
