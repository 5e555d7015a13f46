//! Manufacturer identification by MAC address prefix

use async_trait::async_trait;
use lanscope_core::{normalize_mac, validate::is_locally_administered, Identification};
use mac_oui::Oui;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::error::IdentifyError;

/// Turns a MAC address into a manufacturer
#[async_trait]
pub trait ManufacturerIdentifier: Send + Sync {
    async fn identify(&self, mac: &str) -> Result<Identification, IdentifyError>;
}

/// One override entry from a vendor file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorEntry {
    /// First three octets, e.g. "b8:27:eb"
    pub prefix: String,
    pub name: String,
    #[serde(default)]
    pub device_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VendorFile {
    #[serde(default, rename = "vendor")]
    vendors: Vec<VendorEntry>,
}

const DATABASE_CONFIDENCE: f32 = 0.9;
const OVERRIDE_CONFIDENCE: f32 = 1.0;
const SOURCE: &str = "oui";

/// Device types implied by well-known vendor names
const TYPE_HINTS: &[(&str, &str)] = &[
    ("raspberry pi", "single-board computer"),
    ("espressif", "iot"),
    ("philips lighting", "smart-home"),
    ("signify", "smart-home"),
    ("nest labs", "smart-home"),
    ("synology", "file-server"),
    ("qnap", "file-server"),
    ("ubiquiti", "network"),
    ("cisco", "network"),
    ("tp-link", "network"),
    ("netgear", "network"),
    ("mikrotik", "network"),
    ("vmware", "virtual-machine"),
    ("virtualbox", "virtual-machine"),
    ("pcs systemtechnik", "virtual-machine"),
    ("hikvision", "camera"),
    ("axis communications", "camera"),
];

static OUI_DB: OnceLock<Option<Oui>> = OnceLock::new();

fn oui_db() -> Option<&'static Oui> {
    OUI_DB
        .get_or_init(|| match Oui::default() {
            Ok(db) => Some(db),
            Err(e) => {
                warn!(error = %e, "Failed to load OUI database");
                None
            }
        })
        .as_ref()
}

fn device_type_hint(manufacturer: &str) -> Option<String> {
    let name = manufacturer.to_ascii_lowercase();
    TYPE_HINTS
        .iter()
        .find(|(needle, _)| name.contains(needle))
        .map(|(_, device_type)| device_type.to_string())
}

/// OUI lookups against the IEEE registry bundled with `mac_oui`, with
/// optional local overrides consulted first
#[derive(Debug, Clone)]
pub struct OuiIdentifier {
    overrides: HashMap<String, VendorEntry>,
    use_database: bool,
}

impl Default for OuiIdentifier {
    fn default() -> Self {
        Self::builtin()
    }
}

impl OuiIdentifier {
    /// The registry compiled into the binary
    pub fn builtin() -> Self {
        Self {
            overrides: HashMap::new(),
            use_database: true,
        }
    }

    /// Only entries added with [`OuiIdentifier::with_entry`] or a vendor file
    pub fn overrides_only() -> Self {
        Self {
            overrides: HashMap::new(),
            use_database: false,
        }
    }

    pub fn with_entry(mut self, entry: VendorEntry) -> Self {
        if let Some(prefix) = normalize_prefix(&entry.prefix) {
            self.overrides.insert(prefix.clone(), VendorEntry { prefix, ..entry });
        }
        self
    }

    /// Add entries from a TOML file of `[[vendor]]` tables; they take
    /// precedence over the registry
    pub fn with_file(mut self, path: &Path) -> Result<Self, IdentifyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| IdentifyError::Lookup(format!("{}: {}", path.display(), e)))?;
        let file: VendorFile = toml::from_str(&content)
            .map_err(|e| IdentifyError::Lookup(format!("{}: {}", path.display(), e)))?;

        let before = self.overrides.len();
        for entry in file.vendors {
            self = self.with_entry(entry);
        }

        info!(
            path = %path.display(),
            entries = self.overrides.len() - before,
            "Loaded OUI overrides"
        );
        Ok(self)
    }

    /// Number of local override entries
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    fn lookup_override(&self, mac: &str) -> Option<Identification> {
        let entry = self.overrides.get(&mac[..8])?;
        Some(Identification {
            identified: true,
            manufacturer: Some(entry.name.clone()),
            device_type: entry
                .device_type
                .clone()
                .or_else(|| device_type_hint(&entry.name)),
            confidence: OVERRIDE_CONFIDENCE,
            source: SOURCE.to_string(),
        })
    }

    fn lookup_database(&self, mac: &str) -> Option<Identification> {
        if !self.use_database {
            return None;
        }
        let db = oui_db()?;
        match db.lookup_by_mac(mac) {
            Ok(Some(entry)) => {
                let name = entry.company_name.trim().to_string();
                Some(Identification {
                    identified: true,
                    device_type: device_type_hint(&name),
                    manufacturer: Some(name),
                    confidence: DATABASE_CONFIDENCE,
                    source: SOURCE.to_string(),
                })
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ManufacturerIdentifier for OuiIdentifier {
    async fn identify(&self, mac: &str) -> Result<Identification, IdentifyError> {
        let mac = normalize_mac(mac).ok_or_else(|| IdentifyError::InvalidMac(mac.to_string()))?;

        if let Some(id) = self.lookup_override(&mac) {
            debug!(mac = %mac, "OUI override match");
            return Ok(id);
        }

        // Randomized addresses are never registered
        if is_locally_administered(&mac) {
            return Ok(Identification::unidentified("randomized"));
        }

        if let Some(id) = self.lookup_database(&mac) {
            debug!(mac = %mac, vendor = ?id.manufacturer, "OUI match");
            return Ok(id);
        }

        Ok(Identification::unidentified(SOURCE))
    }
}

fn normalize_prefix(raw: &str) -> Option<String> {
    normalize_mac(&format!("{}:01:02:03", raw.trim().replace('-', ":"))).map(|m| m[..8].to_string())
}
