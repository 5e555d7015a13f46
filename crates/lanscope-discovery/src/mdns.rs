//! mDNS / DNS-SD service browsing

use async_trait::async_trait;
use lanscope_core::{RawObservation, Technique};
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::debug;

use crate::adapter::{is_command_available, run_command, ScanContext, TechniqueAdapter};
use crate::error::AdapterError;

/// A resolved service announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub interface: String,
    pub name: String,
    pub service_type: String,
    pub hostname: String,
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Browses all advertised services once with `avahi-browse` and reports the
/// hosts behind them
#[derive(Debug, Clone, Default)]
pub struct ServiceDiscoveryAdapter;

#[async_trait]
impl TechniqueAdapter for ServiceDiscoveryAdapter {
    fn technique(&self) -> Technique {
        Technique::ServiceDiscovery
    }

    fn command(&self) -> String {
        "avahi-browse -aprt".to_string()
    }

    async fn invoke(&self, _ctx: &ScanContext) -> Result<Vec<RawObservation>, AdapterError> {
        if !is_command_available("avahi-browse").await {
            return Err(AdapterError::Unavailable("avahi-browse not found".to_string()));
        }

        let stdout = run_command("avahi-browse", &["-aprt"]).await?;
        let services: Vec<ServiceRecord> = stdout.lines().filter_map(parse_avahi_line).collect();

        debug!("Found {} resolved services", services.len());

        Ok(services
            .into_iter()
            .map(|svc| {
                let obs = RawObservation::new(svc.ip.to_string(), Technique::ServiceDiscovery)
                    .with_hostname(svc.hostname)
                    .active();
                match device_type_for_service(&svc.service_type) {
                    Some(kind) => obs.with_device_type(kind),
                    None => obs,
                }
            })
            .collect())
    }
}

/// Parse a resolved line of `avahi-browse -p` output:
/// `=;eth0;IPv4;HP LaserJet;_ipp._tcp;local;hp.local;192.168.1.40;631;"txtvers=1"`
fn parse_avahi_line(line: &str) -> Option<ServiceRecord> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < 9 || fields[0] != "=" || fields[2] != "IPv4" {
        return None;
    }

    Some(ServiceRecord {
        interface: fields[1].to_string(),
        name: unescape_avahi(fields[3]),
        service_type: fields[4].to_string(),
        hostname: fields[6].trim_end_matches('.').to_string(),
        ip: Ipv4Addr::from_str(fields[7]).ok()?,
        port: fields[8].parse().ok()?,
    })
}

/// avahi escapes punctuation in names as `\DDD` decimal sequences
fn unescape_avahi(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() && bytes[i + 1..i + 4].iter().all(u8::is_ascii_digit) {
            let code = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|s| s.parse::<u8>().ok());
            if let Some(code) = code {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Map a DNS-SD service type to a device type hint
pub fn device_type_for_service(service_type: &str) -> Option<&'static str> {
    let base = service_type.split('.').next().unwrap_or(service_type);
    match base {
        "_ipp" | "_ipps" | "_printer" | "_pdl-datastream" => Some("printer"),
        "_scanner" | "_uscan" | "_uscans" => Some("scanner"),
        "_airplay" | "_raop" | "_googlecast" => Some("media-player"),
        "_spotify-connect" | "_sonos" => Some("speaker"),
        "_hap" | "_homekit" | "_matter" | "_hue" => Some("smart-home"),
        "_smb" | "_afpovertcp" | "_nfs" | "_adisk" => Some("file-server"),
        "_workstation" | "_rfb" | "_ssh" | "_sftp-ssh" => Some("computer"),
        _ => None,
    }
}
