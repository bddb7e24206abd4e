//! Discovery advertiser (spec §4.8): local mDNS plus optional wide-area
//! unicast DNS-SD, with a CLI path fallback chain feeding both.

pub mod cli_path;
pub mod mdns;
pub mod wide_area;

pub use cli_path::resolve_cli_path;
pub use mdns::{AdvertiseParams, MdnsAdvertiser};
pub use wide_area::{render_zone, write_zone_if_changed, zone_path, ZoneRecord};
