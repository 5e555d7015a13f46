//! Per-scan mapping from address to consolidated device record

use lanscope_core::{parse_host_ip, DeviceRecord, RawObservation};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::trace;

/// Owns every record of one scan. `merge` is the only way in.
#[derive(Debug, Default)]
pub struct DeviceAggregator {
    devices: HashMap<Ipv4Addr, DeviceRecord>,
    /// Insertion order, so that ranking ties are reproducible
    order: Vec<Ipv4Addr>,
}

impl DeviceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a batch of observations into the mapping. Observations for
    /// addresses that cannot name a LAN host are dropped.
    pub fn merge(&mut self, observations: Vec<RawObservation>) {
        for obs in observations {
            let ip = match parse_host_ip(&obs.ip) {
                Ok(ip) => ip,
                Err(reason) => {
                    trace!(ip = %obs.ip, source = %obs.source, reason = ?reason, "Rejected observation");
                    continue;
                }
            };

            match self.devices.get_mut(&ip) {
                Some(record) => record.absorb(&obs),
                None => {
                    self.devices.insert(ip, DeviceRecord::from_observation(ip, &obs));
                    self.order.push(ip);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, ip: &Ipv4Addr) -> Option<&DeviceRecord> {
        self.devices.get(ip)
    }

    /// Addresses in the order they were first seen
    pub fn known_ips(&self) -> Vec<Ipv4Addr> {
        self.order.clone()
    }

    /// Consume the mapping, yielding records in first-seen order
    pub fn into_records(mut self) -> Vec<DeviceRecord> {
        self.order
            .iter()
            .filter_map(|ip| self.devices.remove(ip))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanscope_core::Technique;
    use std::collections::BTreeSet;

    #[test]
    fn test_basic_merge() {
        let mut agg = DeviceAggregator::new();
        agg.merge(vec![
            RawObservation::new("192.168.1.5", Technique::ArpTable).with_mac("aa:bb:cc:dd:ee:ff"),
        ]);
        agg.merge(vec![
            RawObservation::new("192.168.1.5", Technique::PingSweep).with_hostname("printer.local"),
        ]);

        assert_eq!(agg.len(), 1);
        let record = agg.get(&Ipv4Addr::new(192, 168, 1, 5)).unwrap();
        assert_eq!(record.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(record.hostname, "printer.local");
        assert_eq!(
            record.sources,
            BTreeSet::from([Technique::ArpTable, Technique::PingSweep])
        );
    }

    #[test]
    fn test_rejected_addresses_never_create_records() {
        let mut agg = DeviceAggregator::new();
        for _ in 0..3 {
            agg.merge(vec![
                RawObservation::new("127.0.0.1", Technique::ArpTable),
                RawObservation::new("224.0.0.5", Technique::ServiceDiscovery),
                RawObservation::new("224.0.0.251", Technique::ServiceDiscovery),
                RawObservation::new("169.254.1.1", Technique::ArpTable),
                RawObservation::new("255.255.255.255", Technique::ArpTable),
                RawObservation::new("not-an-ip", Technique::ReverseDns),
            ]);
        }
        assert!(agg.is_empty());
        assert!(agg.known_ips().is_empty());
    }

    #[test]
    fn test_edge_addresses_are_kept() {
        let mut agg = DeviceAggregator::new();
        agg.merge(vec![
            RawObservation::new("192.168.1.0", Technique::ArpTable),
            RawObservation::new("192.168.1.255", Technique::ArpTable),
        ]);
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let a = RawObservation::new("10.0.0.9", Technique::ArpTable)
            .with_mac("de:ad:be:ef:00:01")
            .active();
        let b = RawObservation::new("10.0.0.9", Technique::ServiceDiscovery)
            .with_hostname("tv.local")
            .with_device_type("media-player")
            .with_mac("unknown");

        let mut forward = DeviceAggregator::new();
        forward.merge(vec![a.clone(), b.clone()]);
        let mut backward = DeviceAggregator::new();
        backward.merge(vec![b, a]);

        let f = forward.into_records().remove(0);
        let r = backward.into_records().remove(0);
        assert_eq!(f.mac, r.mac);
        assert_eq!(f.hostname, r.hostname);
        assert_eq!(f.device_type, r.device_type);
        assert_eq!(f.sources, r.sources);
        assert_eq!(f.is_active, r.is_active);
        assert_eq!(f.confidence, r.confidence);
    }

    #[test]
    fn test_records_keep_first_seen_order() {
        let mut agg = DeviceAggregator::new();
        agg.merge(vec![
            RawObservation::new("10.0.0.3", Technique::ArpTable),
            RawObservation::new("10.0.0.1", Technique::ArpTable),
        ]);
        agg.merge(vec![
            RawObservation::new("10.0.0.2", Technique::PingSweep),
            RawObservation::new("10.0.0.3", Technique::PingSweep),
        ]);

        let ips: Vec<String> = agg.into_records().iter().map(|r| r.ip.to_string()).collect();
        assert_eq!(ips, vec!["10.0.0.3", "10.0.0.1", "10.0.0.2"]);
    }
}
