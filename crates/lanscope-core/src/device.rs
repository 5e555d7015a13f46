//! Observation and device record types, and the rules for fusing them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::validate::{self, UNKNOWN};

/// A discovery technique that can report hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Technique {
    /// Kernel neighbour (ARP) table
    ArpTable,
    /// Kernel routing table (gateways, own addresses)
    RouteTable,
    /// PTR lookups for already known addresses
    ReverseDns,
    /// ICMP echo sweep over the subnet
    PingSweep,
    /// mDNS / DNS-SD service browsing
    ServiceDiscovery,
    /// The scanning host's own interface
    LocalInterface,
}

/// Broad family of a technique, used for weighting sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TechniqueKind {
    TableRead,
    Resolution,
    ActiveProbe,
    Broadcast,
    Local,
}

impl Technique {
    pub const ALL: [Technique; 6] = [
        Technique::ArpTable,
        Technique::RouteTable,
        Technique::ReverseDns,
        Technique::PingSweep,
        Technique::ServiceDiscovery,
        Technique::LocalInterface,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::ArpTable => "arp-table",
            Technique::RouteTable => "route-table",
            Technique::ReverseDns => "reverse-dns",
            Technique::PingSweep => "ping-sweep",
            Technique::ServiceDiscovery => "service-discovery",
            Technique::LocalInterface => "local-interface",
        }
    }

    pub fn kind(&self) -> TechniqueKind {
        match self {
            Technique::ArpTable | Technique::RouteTable => TechniqueKind::TableRead,
            Technique::ReverseDns => TechniqueKind::Resolution,
            Technique::PingSweep => TechniqueKind::ActiveProbe,
            Technique::ServiceDiscovery => TechniqueKind::Broadcast,
            Technique::LocalInterface => TechniqueKind::Local,
        }
    }

    /// Confidence that a host reported by this technique really exists
    pub fn base_confidence(&self) -> f32 {
        match self {
            Technique::LocalInterface => 1.0,
            Technique::ArpTable => 0.9,
            Technique::PingSweep => 0.85,
            Technique::RouteTable => 0.8,
            Technique::ServiceDiscovery => 0.6,
            Technique::ReverseDns => 0.5,
        }
    }
}

impl std::fmt::Display for Technique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Technique {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Technique::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown technique: {}", s))
    }
}

/// One technique's raw report about one address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    /// Address as printed by the technique, not yet validated
    pub ip: String,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    /// Free-text hint such as "router" or "printer"
    pub device_type: Option<String>,
    pub source: Technique,
    pub timestamp: DateTime<Utc>,
    /// The host answered, or the technique considers it reachable
    pub active: bool,
    /// The address belongs to the scanning host
    pub local: bool,
    pub confidence: f32,
}

impl RawObservation {
    pub fn new(ip: impl Into<String>, source: Technique) -> Self {
        Self {
            ip: ip.into(),
            mac: None,
            hostname: None,
            device_type: None,
            source,
            timestamp: Utc::now(),
            active: false,
            local: false,
            confidence: source.base_confidence(),
        }
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Result of a manufacturer lookup for one MAC address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub identified: bool,
    pub manufacturer: Option<String>,
    pub device_type: Option<String>,
    /// 0.0 ..= 1.0
    pub confidence: f32,
    /// Which database or service answered
    pub source: String,
}

impl Identification {
    pub fn unidentified(source: impl Into<String>) -> Self {
        Self {
            identified: false,
            manufacturer: None,
            device_type: None,
            confidence: 0.0,
            source: source.into(),
        }
    }
}

/// The consolidated view of one host within a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub hostname: String,
    pub device_type: String,
    pub manufacturer: String,
    pub manufacturer_confidence: f32,
    pub manufacturer_identified: bool,
    pub manufacturer_source: Option<String>,
    pub sources: BTreeSet<Technique>,
    pub is_active: bool,
    pub is_local: bool,
    pub confidence: f32,
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    /// An empty record carrying only its key
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            mac: UNKNOWN.to_string(),
            hostname: UNKNOWN.to_string(),
            device_type: UNKNOWN.to_string(),
            manufacturer: UNKNOWN.to_string(),
            manufacturer_confidence: 0.0,
            manufacturer_identified: false,
            manufacturer_source: None,
            sources: BTreeSet::new(),
            is_active: false,
            is_local: false,
            confidence: 0.0,
            last_seen: Utc::now(),
        }
    }

    /// Seed a record from an observation whose address was already validated
    pub fn from_observation(ip: Ipv4Addr, obs: &RawObservation) -> Self {
        let mut record = Self::new(ip);
        if let Some(mac) = &obs.mac {
            record.mac = clean_mac(mac);
        }
        if let Some(hostname) = &obs.hostname {
            record.hostname = clean_label(hostname, ip);
        }
        if let Some(device_type) = &obs.device_type {
            record.device_type = clean_label(device_type, ip);
        }
        record.sources.insert(obs.source);
        record.is_active = obs.active;
        record.is_local = obs.local;
        record.confidence = obs.confidence;
        record
    }

    /// Fold another view of the same host into this one.
    ///
    /// Every field is combined by a join (max, OR, union, or a priority pick
    /// under a total order), so the result does not depend on which side
    /// arrived first. Only `last_seen` moves with time.
    pub fn merge(&mut self, other: &DeviceRecord) {
        debug_assert_eq!(self.ip, other.ip);

        self.mac = pick_mac(&self.mac, &other.mac).to_string();
        self.hostname = pick_label(&self.hostname, &other.hostname, self.ip).to_string();
        self.device_type = pick_label(&self.device_type, &other.device_type, self.ip).to_string();

        let order = manufacturer_rank(other).cmp(&manufacturer_rank(self));
        match order {
            Ordering::Greater => {
                self.manufacturer = other.manufacturer.clone();
                self.manufacturer_confidence = other.manufacturer_confidence;
                self.manufacturer_identified = other.manufacturer_identified;
                self.manufacturer_source = other.manufacturer_source.clone();
            }
            Ordering::Equal => {
                let source = self.manufacturer_source.take().max(other.manufacturer_source.clone());
                self.manufacturer_source = source;
            }
            Ordering::Less => {}
        }

        self.confidence = self.confidence.max(other.confidence);
        self.is_active |= other.is_active;
        self.is_local |= other.is_local;
        self.sources.extend(other.sources.iter().copied());
        self.last_seen = Utc::now();
    }

    /// Fold a raw observation of this host into the record
    pub fn absorb(&mut self, obs: &RawObservation) {
        let incoming = DeviceRecord::from_observation(self.ip, obs);
        self.merge(&incoming);
    }

    /// Attach a manufacturer lookup result. An identified manufacturer is
    /// never replaced by an unidentified one, and a device type already
    /// known is kept.
    pub fn apply_identification(&mut self, id: &Identification) {
        let mut incoming = DeviceRecord::new(self.ip);
        incoming.manufacturer_identified = id.identified;
        incoming.manufacturer_confidence = id.confidence.clamp(0.0, 1.0);
        incoming.manufacturer_source = Some(id.source.clone());
        if let Some(name) = &id.manufacturer {
            incoming.manufacturer = clean_label(name, self.ip);
        }
        // Only fills a missing type; discovery knows more than a vendor prefix
        if let Some(device_type) = id.device_type.as_ref().filter(|_| !self.has_device_type()) {
            incoming.device_type = clean_label(device_type, self.ip);
        }
        // Identification does not count as a sighting.
        let last_seen = self.last_seen;
        let confidence = self.confidence;
        self.merge(&incoming);
        self.last_seen = last_seen;
        self.confidence = confidence;
    }

    /// Record that no identification could be made, and why
    pub fn mark_unidentified(&mut self, reason: &str) {
        if !self.manufacturer_identified {
            self.manufacturer_source = Some(reason.to_string());
        }
    }

    pub fn has_mac(&self) -> bool {
        validate::is_valid_mac(&self.mac)
    }

    pub fn has_hostname(&self) -> bool {
        !validate::is_generic_label(&self.hostname, self.ip)
    }

    pub fn has_device_type(&self) -> bool {
        !validate::is_generic_label(&self.device_type, self.ip)
    }
}

fn clean_mac(raw: &str) -> String {
    if let Some(mac) = validate::normalize_mac(raw) {
        mac
    } else if validate::is_placeholder_mac(raw) {
        UNKNOWN.to_string()
    } else {
        raw.trim().to_string()
    }
}

fn clean_label(raw: &str, ip: Ipv4Addr) -> String {
    if validate::is_generic_label(raw, ip) {
        UNKNOWN.to_string()
    } else {
        raw.trim().to_string()
    }
}

/// 2 = valid, 1 = something unparseable but not a placeholder, 0 = placeholder
fn mac_rank(mac: &str) -> u8 {
    if validate::is_valid_mac(mac) {
        2
    } else if validate::is_placeholder_mac(mac) {
        0
    } else {
        1
    }
}

fn pick_mac<'a>(a: &'a str, b: &'a str) -> &'a str {
    match mac_rank(a).cmp(&mac_rank(b)) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => a.min(b),
    }
}

/// Specific beats generic; between two specific labels the longer (more
/// qualified) one wins, then the lexically smaller.
fn pick_label<'a>(a: &'a str, b: &'a str, ip: Ipv4Addr) -> &'a str {
    let a_specific = !validate::is_generic_label(a, ip);
    let b_specific = !validate::is_generic_label(b, ip);
    match (a_specific, b_specific) {
        (true, false) => a,
        (false, true) => b,
        (false, false) => UNKNOWN,
        (true, true) => match a.len().cmp(&b.len()) {
            Ordering::Greater => a,
            Ordering::Less => b,
            Ordering::Equal => a.min(b),
        },
    }
}

/// Total order over manufacturer state: identified first, then confidence,
/// then the lexically smaller name.
fn manufacturer_rank(record: &DeviceRecord) -> (bool, OrderedConfidence, Reverse<&str>) {
    (
        record.manufacturer_identified,
        OrderedConfidence(record.manufacturer_confidence),
        Reverse(record.manufacturer.as_str()),
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedConfidence(f32);

impl Eq for OrderedConfidence {}

impl PartialOrd for OrderedConfidence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedConfidence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, 5)
    }

    fn merged(first: &RawObservation, second: &RawObservation) -> DeviceRecord {
        let mut record = DeviceRecord::from_observation(ip(), first);
        record.absorb(second);
        record
    }

    fn same_fields(a: &DeviceRecord, b: &DeviceRecord) {
        assert_eq!(a.mac, b.mac);
        assert_eq!(a.hostname, b.hostname);
        assert_eq!(a.device_type, b.device_type);
        assert_eq!(a.manufacturer, b.manufacturer);
        assert_eq!(a.manufacturer_identified, b.manufacturer_identified);
        assert_eq!(a.sources, b.sources);
        assert_eq!(a.is_active, b.is_active);
        assert_eq!(a.is_local, b.is_local);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn test_basic_merge() {
        let a = RawObservation::new("192.168.1.5", Technique::ArpTable).with_mac("aa:bb:cc:dd:ee:ff");
        let b = RawObservation::new("192.168.1.5", Technique::PingSweep).with_hostname("printer.local");
        let record = merged(&a, &b);

        assert_eq!(record.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(record.hostname, "printer.local");
        assert_eq!(
            record.sources,
            BTreeSet::from([Technique::ArpTable, Technique::PingSweep])
        );
    }

    #[test]
    fn test_merge_is_order_independent() {
        let observations = vec![
            RawObservation::new("192.168.1.5", Technique::ArpTable).with_mac("AA:BB:CC:DD:EE:FF").active(),
            RawObservation::new("192.168.1.5", Technique::ReverseDns).with_hostname("printer"),
            RawObservation::new("192.168.1.5", Technique::ServiceDiscovery)
                .with_hostname("printer.local")
                .with_device_type("printer"),
            RawObservation::new("192.168.1.5", Technique::RouteTable)
                .with_mac("(incomplete)")
                .with_hostname("192.168.1.5")
                .local(),
            RawObservation::new("192.168.1.5", Technique::PingSweep).with_mac("11:22:33:44:55:66"),
        ];

        for a in &observations {
            for b in &observations {
                same_fields(&merged(a, b), &merged(b, a));
            }
        }
    }

    #[test]
    fn test_valid_mac_survives_placeholders() {
        let mut record = DeviceRecord::from_observation(
            ip(),
            &RawObservation::new("192.168.1.5", Technique::ArpTable).with_mac("aa:bb:cc:dd:ee:ff"),
        );
        for junk in ["unknown", "", "(incomplete)", "zz:zz", "00:00:00:00:00:00"] {
            record.absorb(&RawObservation::new("192.168.1.5", Technique::PingSweep).with_mac(junk));
            assert_eq!(record.mac, "aa:bb:cc:dd:ee:ff");
        }
    }

    #[test]
    fn test_unparseable_mac_beats_placeholder() {
        let record = merged(
            &RawObservation::new("192.168.1.5", Technique::ArpTable).with_mac("unknown"),
            &RawObservation::new("192.168.1.5", Technique::ServiceDiscovery).with_mac("aabb.ccdd.eeff"),
        );
        assert_eq!(record.mac, "aabb.ccdd.eeff");
    }

    #[test]
    fn test_null_and_broadcast_macs_are_never_stored() {
        for null in ["00:00:00:00:00:00", "ff:ff:ff:ff:ff:ff"] {
            let record = DeviceRecord::from_observation(
                ip(),
                &RawObservation::new("192.168.1.5", Technique::ArpTable).with_mac(null),
            );
            assert_eq!(record.mac, UNKNOWN);
            assert!(!record.has_mac());
        }

        let record = merged(
            &RawObservation::new("192.168.1.5", Technique::ArpTable).with_mac("ff:ff:ff:ff:ff:ff"),
            &RawObservation::new("192.168.1.5", Technique::ServiceDiscovery).with_mac("aabb.ccdd.eeff"),
        );
        assert_eq!(record.mac, "aabb.ccdd.eeff");
    }

    #[test]
    fn test_hostname_equal_to_ip_is_generic() {
        let record = merged(
            &RawObservation::new("192.168.1.5", Technique::ReverseDns).with_hostname("nas"),
            &RawObservation::new("192.168.1.5", Technique::ArpTable).with_hostname("192.168.1.5"),
        );
        assert_eq!(record.hostname, "nas");
    }

    #[test]
    fn test_flags_and_confidence_are_monotonic() {
        let mut record = DeviceRecord::from_observation(
            ip(),
            &RawObservation::new("192.168.1.5", Technique::LocalInterface).local().active(),
        );
        record.absorb(&RawObservation::new("192.168.1.5", Technique::ReverseDns));
        assert!(record.is_active);
        assert!(record.is_local);
        assert_eq!(record.confidence, 1.0);
    }

    #[test]
    fn test_identification_never_regresses() {
        let mut record = DeviceRecord::new(ip());
        record.apply_identification(&Identification {
            identified: true,
            manufacturer: Some("Raspberry Pi Foundation".to_string()),
            device_type: Some("single-board computer".to_string()),
            confidence: 0.9,
            source: "oui".to_string(),
        });
        record.apply_identification(&Identification::unidentified("lookup-failed"));
        record.mark_unidentified("timeout");

        assert!(record.manufacturer_identified);
        assert_eq!(record.manufacturer, "Raspberry Pi Foundation");
        assert_eq!(record.manufacturer_source.as_deref(), Some("oui"));
        assert_eq!(record.device_type, "single-board computer");
    }

    #[test]
    fn test_identification_keeps_discovered_device_type() {
        let mut record = DeviceRecord::from_observation(
            ip(),
            &RawObservation::new("192.168.1.5", Technique::RouteTable).with_device_type("router"),
        );
        record.apply_identification(&Identification {
            identified: true,
            manufacturer: Some("Ubiquiti".to_string()),
            device_type: Some("network".to_string()),
            confidence: 0.9,
            source: "oui".to_string(),
        });

        assert_eq!(record.device_type, "router");
        assert_eq!(record.manufacturer, "Ubiquiti");
        assert!(record.manufacturer_identified);
    }

    #[test]
    fn test_mark_unidentified_records_reason() {
        let mut record = DeviceRecord::new(ip());
        record.mark_unidentified("invalid-mac");
        assert!(!record.manufacturer_identified);
        assert_eq!(record.manufacturer_source.as_deref(), Some("invalid-mac"));
    }

    #[test]
    fn test_technique_round_trips_through_str() {
        for technique in Technique::ALL {
            assert_eq!(technique.as_str().parse::<Technique>(), Ok(technique));
        }
        assert!("nmap".parse::<Technique>().is_err());
    }
}
