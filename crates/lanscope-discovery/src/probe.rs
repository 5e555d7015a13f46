//! ICMP echo sweep over the target subnet

use async_trait::async_trait;
use lanscope_core::{RawObservation, Technique};
use std::net::Ipv4Addr;
use std::str::FromStr;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::adapter::{is_command_available, run_command, ScanContext, TechniqueAdapter};
use crate::error::AdapterError;

/// Default cap on the number of addresses one sweep will touch (a /22)
pub const DEFAULT_MAX_SWEEP_HOSTS: usize = 1022;

/// Pings every host address of the target subnet, with `fping` when it is
/// installed and parallel `ping` processes otherwise
#[derive(Debug, Clone)]
pub struct PingSweepAdapter {
    /// Per-echo wait in seconds
    pub ping_timeout_secs: u64,
    pub max_hosts: usize,
}

impl Default for PingSweepAdapter {
    fn default() -> Self {
        Self {
            ping_timeout_secs: 1,
            max_hosts: DEFAULT_MAX_SWEEP_HOSTS,
        }
    }
}

impl PingSweepAdapter {
    pub fn new(ping_timeout_secs: u64, max_hosts: usize) -> Self {
        Self {
            ping_timeout_secs: ping_timeout_secs.max(1),
            max_hosts,
        }
    }
}

#[async_trait]
impl TechniqueAdapter for PingSweepAdapter {
    fn technique(&self) -> Technique {
        Technique::PingSweep
    }

    fn command(&self) -> String {
        format!("fping -a -q -r 1 -t {} <hosts>", self.ping_timeout_secs * 1000)
    }

    async fn invoke(&self, ctx: &ScanContext) -> Result<Vec<RawObservation>, AdapterError> {
        let subnet = ctx
            .target
            .ok_or_else(|| AdapterError::Unavailable("no target subnet to sweep".to_string()))?;

        let hosts: Vec<Ipv4Addr> = subnet.hosts().take(self.max_hosts).collect();
        if (hosts.len() as u64) < subnet.host_count() {
            warn!(
                subnet = %subnet,
                swept = hosts.len(),
                "Subnet larger than sweep limit, sweeping a prefix of it"
            );
        }

        debug!("Sweeping {} hosts in {}", hosts.len(), subnet);

        let reachable = if is_command_available("fping").await {
            self.sweep_with_fping(&hosts).await?
        } else {
            self.sweep_with_ping(&hosts).await
        };

        Ok(reachable
            .into_iter()
            .map(|ip| RawObservation::new(ip.to_string(), Technique::PingSweep).active())
            .collect())
    }
}

impl PingSweepAdapter {
    async fn sweep_with_fping(&self, hosts: &[Ipv4Addr]) -> Result<Vec<Ipv4Addr>, AdapterError> {
        let timeout_ms = (self.ping_timeout_secs * 1000).to_string();
        let host_list: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();

        let mut args: Vec<&str> = vec!["-a", "-q", "-r", "1", "-t", timeout_ms.as_str()];
        args.extend(host_list.iter().map(|s| s.as_str()));

        // fping exits non-zero when any host is unreachable, so read stdout
        // regardless of status
        let output = tokio::process::Command::new("fping").args(&args).output().await?;
        let reachable = parse_fping_output(&String::from_utf8_lossy(&output.stdout));

        debug!("fping found {} reachable hosts", reachable.len());
        Ok(reachable)
    }

    async fn sweep_with_ping(&self, hosts: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
        let mut tasks = JoinSet::new();
        let wait = self.ping_timeout_secs.to_string();

        for &host in hosts {
            let wait = wait.clone();
            tasks.spawn(async move {
                match run_command("ping", &["-c", "1", "-W", &wait, &host.to_string()]).await {
                    Ok(_) => Some(host),
                    Err(_) => None,
                }
            });
        }

        // Collect the whole sweep before handing it back as one unit
        let mut reachable = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(ip)) = result {
                reachable.push(ip);
            }
        }
        reachable.sort();

        debug!("ping found {} reachable hosts", reachable.len());
        reachable
    }
}

fn parse_fping_output(stdout: &str) -> Vec<Ipv4Addr> {
    stdout
        .lines()
        .filter_map(|line| Ipv4Addr::from_str(line.trim()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::ScanMode;

    #[test]
    fn test_parse_fping_output() {
        let out = "192.168.1.1\n192.168.1.20\n\nICMP Host Unreachable from 192.168.1.20\n";
        assert_eq!(
            parse_fping_output(out),
            vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 20)]
        );
    }

    #[tokio::test]
    async fn test_sweep_without_subnet_is_unavailable() {
        let ctx = ScanContext {
            mode: ScanMode::Fast,
            local: None,
            target: None,
            known_ips: Vec::new(),
        };
        let result = PingSweepAdapter::default().invoke(&ctx).await;
        assert!(matches!(result, Err(AdapterError::Unavailable(_))));
    }
}
