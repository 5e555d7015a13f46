//! Routing table inspection: gateways and the host's own source addresses

use async_trait::async_trait;
use lanscope_core::{RawObservation, Technique};
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::debug;

use crate::adapter::{is_command_available, run_command, ScanContext, TechniqueAdapter};
use crate::error::AdapterError;

/// Something the routing table says about an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteHint {
    /// Next hop of a default route
    Gateway { ip: Ipv4Addr, interface: Option<String> },
    /// Preferred source address, i.e. one of ours
    Source { ip: Ipv4Addr, interface: Option<String> },
}

#[derive(Debug, Clone, Default)]
pub struct RouteTableAdapter;

#[async_trait]
impl TechniqueAdapter for RouteTableAdapter {
    fn technique(&self) -> Technique {
        Technique::RouteTable
    }

    fn command(&self) -> String {
        "ip route show".to_string()
    }

    async fn invoke(&self, _ctx: &ScanContext) -> Result<Vec<RawObservation>, AdapterError> {
        let hints: Vec<RouteHint> = if is_command_available("ip").await {
            run_command("ip", &["route", "show"])
                .await?
                .lines()
                .flat_map(parse_ip_route_line)
                .collect()
        } else {
            run_command("netstat", &["-rn", "-f", "inet"])
                .await?
                .lines()
                .filter_map(parse_netstat_line)
                .collect()
        };

        debug!("Found {} routing hints", hints.len());
        Ok(hints.into_iter().map(hint_to_observation).collect())
    }
}

fn hint_to_observation(hint: RouteHint) -> RawObservation {
    match hint {
        RouteHint::Gateway { ip, .. } => {
            RawObservation::new(ip.to_string(), Technique::RouteTable).with_device_type("router")
        }
        RouteHint::Source { ip, .. } => {
            RawObservation::new(ip.to_string(), Technique::RouteTable).local().active()
        }
    }
}

/// Parse a line from `ip route show` output
fn parse_ip_route_line(line: &str) -> Vec<RouteHint> {
    // "default via 192.168.1.1 dev eth0 proto dhcp src 192.168.1.20 metric 100"
    // "192.168.1.0/24 dev eth0 proto kernel scope link src 192.168.1.20"
    let parts: Vec<&str> = line.split_whitespace().collect();
    let value_after = |key: &str| {
        parts
            .iter()
            .position(|&p| p == key)
            .and_then(|idx| parts.get(idx + 1))
            .copied()
    };

    let interface = value_after("dev").map(|s| s.to_string());
    let mut hints = Vec::new();

    if parts.first() == Some(&"default") {
        if let Some(ip) = value_after("via").and_then(|s| Ipv4Addr::from_str(s).ok()) {
            hints.push(RouteHint::Gateway { ip, interface: interface.clone() });
        }
    }

    if let Some(ip) = value_after("src").and_then(|s| Ipv4Addr::from_str(s).ok()) {
        hints.push(RouteHint::Source { ip, interface });
    }

    hints
}

/// Parse a line from BSD `netstat -rn` output; only default routes are used
fn parse_netstat_line(line: &str) -> Option<RouteHint> {
    // "default            192.168.1.1        UGScg                 en0"
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 || !(parts[0] == "default" || parts[0] == "0.0.0.0") {
        return None;
    }

    let ip = Ipv4Addr::from_str(parts[1]).ok()?;
    Some(RouteHint::Gateway {
        ip,
        interface: parts.last().map(|s| s.to_string()),
    })
}
