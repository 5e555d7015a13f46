//! LanScope Discovery - Multi-technique LAN device discovery
//!
//! A scan runs a fixed list of stages for its mode:
//! - Table reads (ARP neighbours, routes) for hosts the kernel already knows
//! - Active probing (ping sweep) and name resolution (reverse DNS)
//! - Service browsing (mDNS / DNS-SD)
//! - Manufacturer enrichment from MAC prefixes
//!
//! Every observation is folded into one record per IPv4 address, and the
//! records are ranked with the scanning host pinned first.

pub mod adapter;
pub mod aggregator;
pub mod arp;
pub mod enrichment;
pub mod error;
pub mod mdns;
pub mod netinfo;
pub mod probe;
pub mod progress;
pub mod resolve;
pub mod route;
pub mod scanner;
pub mod scoring;
pub mod stage;
pub mod vendor;

pub use adapter::{ScanContext, TechniqueAdapter};
pub use aggregator::DeviceAggregator;
pub use enrichment::{EnrichmentCoordinator, EnrichmentSummary};
pub use error::{AdapterError, IdentifyError};
pub use netinfo::{LocalHost, NetworkInfo, StaticNetworkInfo, Subnet, SystemNetworkInfo};
pub use progress::{progress_channel, EventStatus, ProgressEvent, ProgressSender};
pub use scanner::{ScanMode, ScanReport, ScanState, Scanner, ScannerConfig};
pub use scoring::{pin_local, prioritize, score};
pub use stage::{StageId, StageOutcome, StageStatus};
pub use vendor::{ManufacturerIdentifier, OuiIdentifier};
