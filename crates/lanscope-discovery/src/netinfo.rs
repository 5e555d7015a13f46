//! Information about the scanning host and the segment it sits on

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::debug;

/// An IPv4 network in CIDR form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Subnet {
    /// Build from any address inside the network; host bits are cleared
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        Self {
            network: Ipv4Addr::from(u32::from(addr) & mask(prefix_len)),
            prefix_len,
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = mask(self.prefix_len);
        (u32::from(ip) & mask) == (u32::from(self.network) & mask)
    }

    /// Host addresses, skipping the network and broadcast addresses for
    /// prefixes shorter than /31
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let network = u32::from(self.network) & mask(self.prefix_len);
        let broadcast = network | !mask(self.prefix_len);
        let (first, last) = if self.prefix_len >= 31 {
            (network, broadcast)
        } else {
            (network + 1, broadcast - 1)
        };
        (first..=last).map(Ipv4Addr::from)
    }

    pub fn host_count(&self) -> u64 {
        let size = 1u64 << (32 - u32::from(self.prefix_len));
        if self.prefix_len >= 31 {
            size
        } else {
            size - 2
        }
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= 32 {
        0xFFFF_FFFF
    } else {
        !((1u32 << (32 - prefix_len)) - 1)
    }
}

/// The scanning host as seen on its primary interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalHost {
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    pub interface: String,
    pub prefix_len: u8,
}

impl LocalHost {
    pub fn subnet(&self) -> Subnet {
        Subnet::new(self.ip, self.prefix_len)
    }
}

/// Supplies the scanning host's own address, asked once per scan
#[async_trait]
pub trait NetworkInfo: Send + Sync {
    async fn local_host(&self) -> Option<LocalHost>;
}

/// Reads interfaces from the operating system
#[derive(Debug, Clone, Default)]
pub struct SystemNetworkInfo {
    /// Preferred interface name; the first usable one otherwise
    pub interface: Option<String>,
}

impl SystemNetworkInfo {
    pub fn new(interface: Option<String>) -> Self {
        Self { interface }
    }
}

#[async_trait]
impl NetworkInfo for SystemNetworkInfo {
    async fn local_host(&self) -> Option<LocalHost> {
        use network_interface::{NetworkInterface, NetworkInterfaceConfig};

        let interfaces = match NetworkInterface::show() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!(error = %e, "Failed to list network interfaces");
                return None;
            }
        };

        let candidates: Vec<LocalHost> = interfaces
            .into_iter()
            .filter(|iface| is_usable_interface(&iface.name))
            .filter_map(|iface| {
                iface.addr.iter().find_map(|addr| {
                    if let network_interface::Addr::V4(v4) = addr {
                        if v4.ip.is_loopback() || v4.ip.is_link_local() {
                            return None;
                        }
                        let prefix_len = v4
                            .netmask
                            .map(|m| u32::from(m).count_ones() as u8)
                            .unwrap_or(24);
                        Some(LocalHost {
                            ip: v4.ip,
                            mac: iface.mac_addr.clone(),
                            interface: iface.name.clone(),
                            prefix_len,
                        })
                    } else {
                        None
                    }
                })
            })
            .collect();

        let chosen = match &self.interface {
            Some(name) => candidates.iter().find(|c| &c.interface == name).cloned(),
            None => None,
        };

        let local = chosen.or_else(|| candidates.into_iter().next());
        debug!(local = ?local, "Resolved local host");
        local
    }
}

/// Skip loopback, container bridges and virtual ethernet pairs
fn is_usable_interface(name: &str) -> bool {
    !name.starts_with("lo")
        && !name.starts_with("docker")
        && !name.starts_with("br-")
        && !name.starts_with("veth")
}

/// A fixed answer, for configured overrides and tests
#[derive(Debug, Clone, Default)]
pub struct StaticNetworkInfo(pub Option<LocalHost>);

#[async_trait]
impl NetworkInfo for StaticNetworkInfo {
    async fn local_host(&self) -> Option<LocalHost> {
        self.0.clone()
    }
}
