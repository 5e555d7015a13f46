//! Reverse name resolution for addresses found by earlier stages

use async_trait::async_trait;
use lanscope_core::{RawObservation, Technique};
use std::net::Ipv4Addr;
use std::str::FromStr;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::adapter::{is_command_available, run_command, ScanContext, TechniqueAdapter};
use crate::error::AdapterError;

/// PTR lookups through the system resolver (`getent hosts`), so that
/// `/etc/hosts`, mDNS (nss-mdns) and DNS are all consulted
#[derive(Debug, Clone, Default)]
pub struct ReverseDnsAdapter;

#[async_trait]
impl TechniqueAdapter for ReverseDnsAdapter {
    fn technique(&self) -> Technique {
        Technique::ReverseDns
    }

    fn command(&self) -> String {
        "getent hosts <ip>".to_string()
    }

    async fn invoke(&self, ctx: &ScanContext) -> Result<Vec<RawObservation>, AdapterError> {
        if !is_command_available("getent").await {
            return Err(AdapterError::Unavailable("getent not found".to_string()));
        }

        let mut tasks = JoinSet::new();
        for &ip in &ctx.known_ips {
            tasks.spawn(async move { (ip, lookup(ip).await) });
        }

        let mut observations = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Ok((ip, Some(hostname))) = result {
                trace!(ip = %ip, hostname = %hostname, "Resolved");
                observations.push(
                    RawObservation::new(ip.to_string(), Technique::ReverseDns).with_hostname(hostname),
                );
            }
        }

        debug!(
            "Resolved {} of {} addresses",
            observations.len(),
            ctx.known_ips.len()
        );
        Ok(observations)
    }
}

async fn lookup(ip: Ipv4Addr) -> Option<String> {
    // getent exits with status 2 when the key is not found
    let output = run_command("getent", &["hosts", &ip.to_string()]).await.ok()?;
    output.lines().find_map(|line| parse_getent_line(line, ip))
}

/// Parse a line from `getent hosts` output: "192.168.1.5  printer.lan printer"
fn parse_getent_line(line: &str, ip: Ipv4Addr) -> Option<String> {
    let mut parts = line.split_whitespace();
    let addr = Ipv4Addr::from_str(parts.next()?).ok()?;
    if addr != ip {
        return None;
    }
    parts
        .next()
        .map(|name| name.trim_end_matches('.').to_string())
        .filter(|name| !name.is_empty() && name != &ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_getent_line() {
        let ip = Ipv4Addr::new(192, 168, 1, 5);
        assert_eq!(
            parse_getent_line("192.168.1.5     printer.lan printer", ip).as_deref(),
            Some("printer.lan")
        );
        assert_eq!(
            parse_getent_line("192.168.1.5 nas.local.", ip).as_deref(),
            Some("nas.local")
        );
    }

    #[test]
    fn test_parse_getent_line_rejects_mismatch() {
        let ip = Ipv4Addr::new(192, 168, 1, 5);
        assert!(parse_getent_line("192.168.1.6 other", ip).is_none());
        assert!(parse_getent_line("192.168.1.5", ip).is_none());
        assert!(parse_getent_line("192.168.1.5 192.168.1.5", ip).is_none());
        assert!(parse_getent_line("", ip).is_none());
    }
}
