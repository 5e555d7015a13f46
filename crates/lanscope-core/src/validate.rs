//! Address validation shared by the aggregator and the enrichment pass

use std::net::Ipv4Addr;
use std::str::FromStr;

/// Sentinel used for every text field that has no usable value
pub const UNKNOWN: &str = "unknown";

/// Why an observed address was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Not a dotted-quad IPv4 address
    Malformed,
    Loopback,
    LinkLocal,
    Multicast,
    /// 255.255.255.255
    Broadcast,
    /// 0.0.0.0
    Unspecified,
}

/// Parse an observed IP and check that it can name a host on the LAN.
///
/// Network and directed-broadcast looking addresses (`x.x.x.0`, `x.x.x.255`)
/// are accepted: some segments hand them out to real hosts.
pub fn parse_host_ip(raw: &str) -> Result<Ipv4Addr, Rejection> {
    let ip = Ipv4Addr::from_str(raw.trim()).map_err(|_| Rejection::Malformed)?;
    check_host_ip(ip)?;
    Ok(ip)
}

/// Range checks for an already parsed address
pub fn check_host_ip(ip: Ipv4Addr) -> Result<(), Rejection> {
    if ip.is_loopback() {
        Err(Rejection::Loopback)
    } else if ip.is_link_local() {
        Err(Rejection::LinkLocal)
    } else if ip.is_multicast() {
        Err(Rejection::Multicast)
    } else if ip.is_broadcast() {
        Err(Rejection::Broadcast)
    } else if ip.is_unspecified() {
        Err(Rejection::Unspecified)
    } else {
        Ok(())
    }
}

pub fn is_valid_host_ip(ip: Ipv4Addr) -> bool {
    check_host_ip(ip).is_ok()
}

fn parse_mac(raw: &str) -> Option<[u8; 6]> {
    let parts: Vec<&str> = raw.trim().split(|c| c == ':' || c == '-').collect();
    if parts.len() != 6 {
        return None;
    }

    let mut octets = [0u8; 6];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        if part.is_empty() || part.len() > 2 {
            return None;
        }
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    Some(octets)
}

fn is_null_or_broadcast(octets: &[u8; 6]) -> bool {
    *octets == [0; 6] || *octets == [0xff; 6]
}

/// Normalize a MAC address to lowercase, colon separated form.
///
/// Accepts `:` or `-` separators and single-digit octets as printed by BSD
/// `arp` (`0:1b:63:a:b:c`). Returns `None` for anything else, and for the
/// all-zero and broadcast addresses, which never identify a device.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let octets = parse_mac(raw).filter(|o| !is_null_or_broadcast(o))?;
    Some(
        octets
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

pub fn is_valid_mac(raw: &str) -> bool {
    normalize_mac(raw).is_some()
}

/// Values adapters print when they have no MAC for a host, including the
/// all-zero and broadcast addresses
pub fn is_placeholder_mac(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    matches!(
        lowered.as_str(),
        "" | UNKNOWN | "(incomplete)" | "<incomplete>" | "incomplete" | "-" | "n/a"
    ) || parse_mac(raw).is_some_and(|o| is_null_or_broadcast(&o))
}

/// Whether a MAC is locally administered (randomized by the OS, or virtual)
pub fn is_locally_administered(mac: &str) -> bool {
    normalize_mac(mac)
        .and_then(|m| u8::from_str_radix(&m[0..2], 16).ok())
        .map(|first| first & 0x02 != 0)
        .unwrap_or(false)
}

/// A hostname or type label that carries no information about the device.
///
/// `ip` is the record's own address; some resolvers echo it back as the name.
pub fn is_generic_label(value: &str, ip: Ipv4Addr) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case(UNKNOWN) || value == ip.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_reserved_ranges() {
        assert_eq!(parse_host_ip("127.0.0.1"), Err(Rejection::Loopback));
        assert_eq!(parse_host_ip("169.254.1.1"), Err(Rejection::LinkLocal));
        assert_eq!(parse_host_ip("224.0.0.251"), Err(Rejection::Multicast));
        assert_eq!(parse_host_ip("255.255.255.255"), Err(Rejection::Broadcast));
        assert_eq!(parse_host_ip("0.0.0.0"), Err(Rejection::Unspecified));
        assert_eq!(parse_host_ip("192.168.1"), Err(Rejection::Malformed));
        assert_eq!(parse_host_ip("192.168.1.300"), Err(Rejection::Malformed));
        assert_eq!(parse_host_ip("printer.local"), Err(Rejection::Malformed));
    }

    #[test]
    fn test_accepts_edge_of_subnet() {
        assert_eq!(parse_host_ip("192.168.1.0"), Ok(Ipv4Addr::new(192, 168, 1, 0)));
        assert_eq!(parse_host_ip("192.168.1.255"), Ok(Ipv4Addr::new(192, 168, 1, 255)));
        assert_eq!(parse_host_ip(" 10.0.0.7 "), Ok(Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("AA:BB:CC:DD:EE:FF").as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(normalize_mac("aa-bb-cc-dd-ee-01").as_deref(), Some("aa:bb:cc:dd:ee:01"));
        assert_eq!(normalize_mac("0:1b:63:a:b:c").as_deref(), Some("00:1b:63:0a:0b:0c"));
        assert_eq!(normalize_mac("00:00:00:00:00:00"), None);
        assert_eq!(normalize_mac("ff:ff:ff:ff:ff:ff"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:fg"), None);
        assert_eq!(normalize_mac("(incomplete)"), None);
    }

    #[test]
    fn test_placeholder_mac() {
        assert!(is_placeholder_mac("unknown"));
        assert!(is_placeholder_mac("(incomplete)"));
        assert!(is_placeholder_mac(""));
        assert!(is_placeholder_mac("00:00:00:00:00:00"));
        assert!(is_placeholder_mac("FF-FF-FF-FF-FF-FF"));
        assert!(!is_placeholder_mac("aa:bb:cc:dd:ee:ff"));
        assert!(!is_placeholder_mac("zz:zz"));
    }

    #[test]
    fn test_locally_administered() {
        assert!(is_locally_administered("52:54:00:12:34:56"));
        assert!(is_locally_administered("da:a1:19:00:00:01"));
        assert!(!is_locally_administered("b8:27:eb:00:00:01"));
        assert!(!is_locally_administered("garbage"));
    }

    #[test]
    fn test_generic_label() {
        let ip = Ipv4Addr::new(192, 168, 1, 5);
        assert!(is_generic_label("", ip));
        assert!(is_generic_label("Unknown", ip));
        assert!(is_generic_label("192.168.1.5", ip));
        assert!(!is_generic_label("printer.local", ip));
    }
}
