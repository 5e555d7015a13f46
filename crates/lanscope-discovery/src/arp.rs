//! Neighbour (ARP) table inspection

use async_trait::async_trait;
use lanscope_core::{RawObservation, Technique};
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::debug;

use crate::adapter::{is_command_available, run_command, ScanContext, TechniqueAdapter};
use crate::error::AdapterError;

/// ARP table entry
#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub interface: String,
    pub state: ArpState,
}

/// ARP entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Unknown,
}

impl ArpState {
    /// The kernel has recent proof the neighbour answers
    pub fn is_active(&self) -> bool {
        matches!(self, ArpState::Reachable | ArpState::Delay | ArpState::Permanent)
    }

    /// The entry names no host worth reporting
    pub fn is_dead(&self) -> bool {
        matches!(self, ArpState::Failed | ArpState::Incomplete)
    }
}

/// Reads the neighbour table with `ip neigh`, or `arp -an` where iproute2
/// is missing
#[derive(Debug, Clone, Default)]
pub struct ArpTableAdapter;

#[async_trait]
impl TechniqueAdapter for ArpTableAdapter {
    fn technique(&self) -> Technique {
        Technique::ArpTable
    }

    fn command(&self) -> String {
        "ip neigh show".to_string()
    }

    async fn invoke(&self, ctx: &ScanContext) -> Result<Vec<RawObservation>, AdapterError> {
        let entries = get_arp_table().await?;

        let observations: Vec<RawObservation> = entries
            .into_iter()
            .filter(|e| !e.state.is_dead())
            .filter(|e| ctx.target.map_or(true, |subnet| subnet.contains(e.ip)))
            .map(|e| {
                let obs = RawObservation::new(e.ip.to_string(), Technique::ArpTable).with_mac(e.mac);
                if e.state.is_active() {
                    obs.active()
                } else {
                    obs
                }
            })
            .collect();

        Ok(observations)
    }
}

/// Get current ARP table entries
pub async fn get_arp_table() -> Result<Vec<ArpEntry>, AdapterError> {
    let entries: Vec<ArpEntry> = if is_command_available("ip").await {
        run_command("ip", &["neigh", "show"])
            .await?
            .lines()
            .filter_map(parse_ip_neigh_line)
            .collect()
    } else {
        run_command("arp", &["-an"])
            .await?
            .lines()
            .filter_map(parse_arp_an_line)
            .collect()
    };

    debug!("Found {} ARP entries", entries.len());
    Ok(entries)
}

/// Parse a line from `ip neigh show` output
fn parse_ip_neigh_line(line: &str) -> Option<ArpEntry> {
    // Format: "192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE"
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() < 4 {
        return None;
    }

    let ip = Ipv4Addr::from_str(parts[0]).ok()?;

    let dev_idx = parts.iter().position(|&p| p == "dev")?;
    let lladdr_idx = parts.iter().position(|&p| p == "lladdr");

    if dev_idx + 1 >= parts.len() {
        return None;
    }

    let interface = parts[dev_idx + 1].to_string();

    // MAC might not be present for INCOMPLETE entries
    let mac = lladdr_idx
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_string())
        .unwrap_or_default();

    let state = parts.last().map(|s| parse_arp_state(s)).unwrap_or(ArpState::Unknown);

    Some(ArpEntry { ip, mac, interface, state })
}

/// Parse a line from BSD/macOS `arp -an` output
fn parse_arp_an_line(line: &str) -> Option<ArpEntry> {
    // Format: "? (192.168.1.1) at aa:bb:cc:dd:ee:ff on en0 ifscope [ethernet]"
    let parts: Vec<&str> = line.split_whitespace().collect();

    let ip_part = parts.iter().find(|p| p.starts_with('(') && p.ends_with(')'))?;
    let ip = Ipv4Addr::from_str(ip_part.trim_matches(|c| c == '(' || c == ')')).ok()?;

    let mac = parts
        .iter()
        .position(|&p| p == "at")
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_string())
        .unwrap_or_default();

    let interface = parts
        .iter()
        .position(|&p| p == "on")
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_string())
        .unwrap_or_default();

    let state = if mac.contains("incomplete") {
        ArpState::Incomplete
    } else if line.contains("permanent") {
        ArpState::Permanent
    } else {
        ArpState::Unknown
    };

    Some(ArpEntry { ip, mac, interface, state })
}

/// Parse ARP state string
fn parse_arp_state(s: &str) -> ArpState {
    match s.to_uppercase().as_str() {
        "REACHABLE" => ArpState::Reachable,
        "STALE" => ArpState::Stale,
        "DELAY" => ArpState::Delay,
        "PROBE" => ArpState::Probe,
        "FAILED" => ArpState::Failed,
        "INCOMPLETE" => ArpState::Incomplete,
        "PERMANENT" => ArpState::Permanent,
        _ => ArpState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_neigh_line_reachable() {
        let line = "192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(entry.interface, "eth0");
        assert_eq!(entry.state, ArpState::Reachable);
        assert!(entry.state.is_active());
    }

    #[test]
    fn test_parse_ip_neigh_line_stale() {
        let line = "192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff STALE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.state, ArpState::Stale);
        assert!(!entry.state.is_active());
        assert!(!entry.state.is_dead());
    }

    #[test]
    fn test_parse_incomplete_line() {
        let line = "192.168.1.100 dev eth0 INCOMPLETE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.mac, "");
        assert!(entry.state.is_dead());
    }

    #[test]
    fn test_parse_ipv6_neigh_is_skipped() {
        let line = "fe80::1 dev eth0 lladdr aa:bb:cc:dd:ee:ff router REACHABLE";
        assert!(parse_ip_neigh_line(line).is_none());
    }

    #[test]
    fn test_parse_arp_an_line() {
        let line = "? (192.168.1.1) at 0:1b:63:a:b:c on en0 ifscope [ethernet]";
        let entry = parse_arp_an_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(entry.mac, "0:1b:63:a:b:c");
        assert_eq!(entry.interface, "en0");
        assert_eq!(entry.state, ArpState::Unknown);

        let line = "? (192.168.1.9) at (incomplete) on en0 ifscope [ethernet]";
        assert_eq!(parse_arp_an_line(line).unwrap().state, ArpState::Incomplete);
    }

    #[test]
    fn test_parse_too_short() {
        assert!(parse_ip_neigh_line("192.168.1.100 dev").is_none());
        assert!(parse_arp_an_line("garbage").is_none());
    }
}
