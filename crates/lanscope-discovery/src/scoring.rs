//! Quality scoring, ranking and local-host pinning

use lanscope_core::{DeviceRecord, Technique, TechniqueKind};
use std::net::Ipv4Addr;

const MAC_BONUS: u32 = 20;
const HOSTNAME_BONUS: u32 = 15;
const DEVICE_TYPE_BONUS: u32 = 10;
const MANUFACTURER_BONUS: u32 = 25;

/// How much a sighting by each technique is worth. Table reads and active
/// probes outrank resolution and broadcast listening.
pub fn technique_weight(technique: Technique) -> u32 {
    match technique.kind() {
        TechniqueKind::TableRead | TechniqueKind::ActiveProbe => 30,
        TechniqueKind::Local => 20,
        TechniqueKind::Resolution => 15,
        TechniqueKind::Broadcast => 10,
    }
}

/// Confidence score of a record; a pure function of its fields
pub fn score(record: &DeviceRecord) -> u32 {
    let mut total: u32 = record.sources.iter().map(|&t| technique_weight(t)).sum();

    if record.has_mac() {
        total += MAC_BONUS;
    }
    if record.has_hostname() {
        total += HOSTNAME_BONUS;
    }
    if record.has_device_type() {
        total += DEVICE_TYPE_BONUS;
    }
    if record.manufacturer_identified {
        total += MANUFACTURER_BONUS;
    }

    total + (record.manufacturer_confidence.clamp(0.0, 1.0) * 5.0).floor() as u32
}

/// Sort by descending score; equal scores keep their input order
pub fn prioritize(mut records: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    records.sort_by_cached_key(|r| std::cmp::Reverse(score(r)));
    records
}

/// Move the scanning host's record to the front and flag it local
pub fn pin_local(mut records: Vec<DeviceRecord>, local_ip: Option<Ipv4Addr>) -> Vec<DeviceRecord> {
    let Some(local_ip) = local_ip else {
        return records;
    };

    if let Some(pos) = records.iter().position(|r| r.ip == local_ip) {
        let mut local = records.remove(pos);
        local.is_local = true;
        records.insert(0, local);
    }
    records
}
