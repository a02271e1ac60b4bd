use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from discovery and register access. All are fatal to the client
/// invocation; none is retried internally.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot enumerate {root}: {source}", root = .root.display())]
    NamespaceUnreadable {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No published entry carried the expected name. Safe to retry later,
    /// once the identifier has attached the board.
    #[error("no published device named {expected:?} under {root}", root = .root.display())]
    DeviceNotFound { expected: String, root: PathBuf },

    /// A mapping attribute was absent or not a `0x`-prefixed hex string —
    /// either the identifier has not finished attaching or it published an
    /// incompatible format.
    #[error("unreadable mapping metadata at {path}", path = .path.display())]
    MetadataUnreadable { path: PathBuf },

    #[error("failed to open device file {path}: {source}", path = .path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to map {len:#x} bytes of register bank: {source}")]
    MapFailed {
        len: u64,
        #[source]
        source: io::Error,
    },

    /// The published (offset, size) pair does not leave room for the register
    /// bank inside the mapping.
    #[error("mapping of {size:#x} bytes too small for register bank at offset {offset:#x}")]
    BankOutOfRange { offset: u64, size: u64 },

    /// Reported rather than swallowed: a mapping the kernel refused to tear
    /// down means any later use of the pointer range is suspect.
    #[error("failed to unmap {len:#x} bytes of register bank: {source}")]
    UnmapFailed {
        len: u64,
        #[source]
        source: io::Error,
    },
}
