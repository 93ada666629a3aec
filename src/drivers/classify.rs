//! Driver package classification.
//!
//! Packages are sorted by directory name alone, except for network drivers,
//! whose names are too varied: when the name rules miss, the package's
//! `.inf` descriptors are scanned for the network device class.

use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DriverCategory {
    Storage,
    Usb,
    Network,
    Other,
}

impl std::fmt::Display for DriverCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Storage => "storage",
            Self::Usb => "usb",
            Self::Network => "network",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Which packages to stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryFilter {
    All,
    Only(DriverCategory),
}

impl CategoryFilter {
    pub fn includes(self, category: DriverCategory) -> bool {
        match self {
            Self::All => category != DriverCategory::Other,
            Self::Only(wanted) => wanted == category,
        }
    }
}

const STORAGE_PREFIXES: &[&str] = &["storahci", "stornvme", "msahci", "iastor", "iaahci"];
const STORAGE_TOKENS: &[&str] = &[
    "nvme", "ahci", "rst", "vmd", "raid", "scsi", "ide", "iastor", "iaahci", "msahci", "disk",
    "storage", "sata", "pciide", "atapi", "intelide", "amdide", "viaide",
];

const USB_PREFIXES: &[&str] = &["usb", "xhci"];
const USB_TOKENS: &[&str] = &["iusb3", "usb3", "xhc", "xhci", "amdhub3", "amdxhc", "intelusb3"];

const NETWORK_PREFIXES: &[&str] = &["net", "vwifi", "vwlan"];
const NETWORK_TOKENS: &[&str] = &["wifi", "wlan", "wwan"];

/// Markers of the network device class in a normalized descriptor.
const NETWORK_CLASS_MARKERS: &[&str] = &["classnet", "4d36e972e32511cebfc108002be10318"];

fn matches_name(name_lower: &str, prefixes: &[&str], tokens: &[&str]) -> bool {
    prefixes.iter().any(|p| name_lower.starts_with(p)) || tokens.iter().any(|t| name_lower.contains(t))
}

pub fn is_storage(name_lower: &str) -> bool {
    matches_name(name_lower, STORAGE_PREFIXES, STORAGE_TOKENS)
}

pub fn is_usb(name_lower: &str) -> bool {
    matches_name(name_lower, USB_PREFIXES, USB_TOKENS)
}

pub fn is_network_name(name_lower: &str) -> bool {
    matches_name(name_lower, NETWORK_PREFIXES, NETWORK_TOKENS)
}

/// Lowercase and keep only ASCII letters and digits.
pub fn normalize_descriptor(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// True if a descriptor declares the network device class.
pub fn is_network_descriptor(text: &str) -> bool {
    let normalized = normalize_descriptor(text);
    NETWORK_CLASS_MARKERS.iter().any(|m| normalized.contains(m))
}

/// Categories of a package called `name`.
///
/// `load_descriptors` is only called when the network name rules miss. It
/// returns the text of the package's descriptors.
pub fn classify<F>(name: &str, load_descriptors: F) -> Vec<DriverCategory>
where
    F: FnOnce() -> Vec<String>,
{
    let name_lower = name.to_lowercase();
    let mut categories = Vec::new();

    if is_storage(&name_lower) {
        categories.push(DriverCategory::Storage);
    }
    if is_usb(&name_lower) {
        categories.push(DriverCategory::Usb);
    }
    if is_network_name(&name_lower)
        || load_descriptors().iter().any(|text| is_network_descriptor(text))
    {
        categories.push(DriverCategory::Network);
    }

    if categories.is_empty() {
        categories.push(DriverCategory::Other);
    }
    categories
}

/// Text of every top-level `.inf` file in `package_dir`. Unreadable files
/// are skipped.
pub fn read_descriptors(package_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(package_dir) else {
        return Vec::new();
    };

    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("inf"))
                .unwrap_or(false)
        })
        .filter_map(|p| fs::read(&p).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .collect()
}

/// Classify the package stored in `package_dir`.
pub fn classify_dir(package_dir: &Path) -> Vec<DriverCategory> {
    let name = package_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    classify(&name, || read_descriptors(package_dir))
}
