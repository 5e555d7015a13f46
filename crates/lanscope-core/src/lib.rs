//! LanScope Core - Observation and device record types
//!
//! This crate provides the data model shared by the discovery engine and the
//! daemon:
//! - Raw observations reported by individual discovery techniques
//! - Consolidated per-address device records and their merge rules
//! - Address and MAC validation

pub mod device;
pub mod validate;

pub use device::{DeviceRecord, Identification, RawObservation, Technique, TechniqueKind};
pub use validate::{normalize_mac, parse_host_ip, Rejection, UNKNOWN};
