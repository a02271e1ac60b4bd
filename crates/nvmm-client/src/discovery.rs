//! Discovery of the published register bank through the exposure framework's
//! filesystem namespace.
//!
//! Layout (one directory per published device):
//!
//! ```text
//! <root>/<entry>/name              text, newline-terminated
//! <root>/<entry>/maps/map<n>/offset  "0x…" hex
//! <root>/<entry>/maps/map<n>/size    "0x…" hex
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::ClientError;

/// Default namespace root on Linux.
pub const DEFAULT_NAMESPACE_ROOT: &str = "/sys/class/uio";

/// The (offset, size) pair a client needs to turn the generic device file
/// into a usable register-bank mapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MappingParams {
    /// Byte offset of the register bank within the mapping.
    pub offset: u64,
    /// Byte size of the mapping.
    pub size: u64,
}

/// Root of the discovery namespace.
#[derive(Clone, Debug)]
pub struct UioNamespace {
    root: PathBuf,
}

impl Default for UioNamespace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE_ROOT)
    }
}

impl UioNamespace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Finds the entry whose `name` attribute equals `expected_name`.
    ///
    /// Comparison is case-sensitive after stripping one trailing newline.
    /// Entries whose `name` attribute cannot be read are skipped, not fatal:
    /// the namespace may hold devices published by unrelated drivers. First
    /// match wins; names are unique per entry, so no tie exists.
    pub fn discover(&self, expected_name: &str) -> Result<UioDevice, ClientError> {
        let entries = fs::read_dir(&self.root).map_err(|source| {
            ClientError::NamespaceUnreadable {
                root: self.root.clone(),
                source,
            }
        })?;

        for entry in entries.flatten() {
            let entry_dir = entry.path();
            let Ok(raw) = fs::read_to_string(entry_dir.join("name")) else {
                continue;
            };
            let name = raw.strip_suffix('\n').unwrap_or(&raw);
            if name == expected_name {
                let entry_name = entry.file_name().to_string_lossy().into_owned();
                debug!(entry = %entry_name, "matched published device");
                return Ok(UioDevice {
                    entry_name,
                    entry_dir,
                });
            }
        }

        Err(ClientError::DeviceNotFound {
            expected: expected_name.to_owned(),
            root: self.root.clone(),
        })
    }
}

/// A matched namespace entry.
#[derive(Clone, Debug)]
pub struct UioDevice {
    entry_name: String,
    entry_dir: PathBuf,
}

impl UioDevice {
    /// The namespace entry name, e.g. `uio0`.
    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Path of the device file to open and map, e.g. `/dev/uio0`.
    pub fn device_path(&self, dev_root: impl AsRef<Path>) -> PathBuf {
        dev_root.as_ref().join(&self.entry_name)
    }

    /// Reads the `offset` and `size` attributes for one mapping index.
    pub fn mapping_params(&self, index: usize) -> Result<MappingParams, ClientError> {
        let map_dir = self.entry_dir.join("maps").join(format!("map{index}"));
        let offset = read_hex_attribute(&map_dir.join("offset"))?;
        let size = read_hex_attribute(&map_dir.join("size"))?;
        Ok(MappingParams { offset, size })
    }
}

/// Parses one `0x%x`-formatted attribute file.
fn read_hex_attribute(path: &Path) -> Result<u64, ClientError> {
    let unreadable = || ClientError::MetadataUnreadable {
        path: path.to_path_buf(),
    };
    let raw = fs::read_to_string(path).map_err(|_| unreadable())?;
    let digits = raw.trim().strip_prefix("0x").ok_or_else(unreadable)?;
    u64::from_str_radix(digits, 16).map_err(|_| unreadable())
}
