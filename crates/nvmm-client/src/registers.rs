//! Mapped register-bank client.
//!
//! The mapping covers a page-aligned superset of the bank; the true register
//! base may start mid-page, so the published offset is added to the raw
//! mapping before any field address is derived. Field addresses only ever
//! come from the named offsets in `nvmm-regs` — no caller-supplied pointer
//! arithmetic.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

use tracing::debug;

use nvmm_regs::{
    apply_led, Led, LedState, CSR_MAPPING_INDEX, MEMCTRLCMD_ERRCTRL, MEMCTRLCMD_LEDCTRL,
    MEMCTRLSTATUS_BATTERY, MEMCTRLSTATUS_MAGIC, MEMCTRLSTATUS_MEMORY,
};

use crate::discovery::MappingParams;
use crate::ClientError;

/// The five named byte-wide fields of the register bank.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Field {
    Magic,
    MemoryStatus,
    BatteryStatus,
    LedControl,
    ErrorControl,
}

impl Field {
    pub const fn offset(self) -> usize {
        match self {
            Self::Magic => MEMCTRLSTATUS_MAGIC,
            Self::MemoryStatus => MEMCTRLSTATUS_MEMORY,
            Self::BatteryStatus => MEMCTRLSTATUS_BATTERY,
            Self::LedControl => MEMCTRLCMD_LEDCTRL,
            Self::ErrorControl => MEMCTRLCMD_ERRCTRL,
        }
    }
}

/// One read of each field, for diagnostic printing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegisterSnapshot {
    pub magic: u8,
    pub memory_status: u8,
    pub battery_status: u8,
    pub led_control: u8,
    pub error_control: u8,
}

/// An open, mapped register bank.
///
/// The mapped pointer is valid from [`RegisterClient::open`] until
/// [`RegisterClient::close`] (or drop, which unmaps best-effort but cannot
/// report failure — prefer `close`).
#[derive(Debug)]
pub struct RegisterClient {
    // Held only to keep the descriptor alive for the mapping's lifetime;
    // closes on drop, after the unmap.
    _file: File,
    map_base: *mut libc::c_void,
    map_len: usize,
    regs: *mut u8,
}

impl RegisterClient {
    /// Opens `device_path` read/write and maps `params.size` bytes of it.
    ///
    /// The file offset selects the mapping index: index n lives at
    /// `n * page_size`, so index 0 maps from offset 0.
    pub fn open(device_path: &Path, params: MappingParams) -> Result<Self, ClientError> {
        // Reject metadata that cannot hold the bank before touching mmap, so
        // the field accessors can never resolve outside the mapping.
        let bank_fits = params
            .offset
            .checked_add(MEMCTRLCMD_ERRCTRL as u64 + 1)
            .is_some_and(|end| end <= params.size);
        if !bank_fits {
            return Err(ClientError::BankOutOfRange {
                offset: params.offset,
                size: params.size,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_path)
            .map_err(|source| ClientError::OpenFailed {
                path: device_path.to_path_buf(),
                source,
            })?;

        // SAFETY: sysconf has no memory-safety preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as libc::off_t;
        let map_len = params.size as usize;

        // SAFETY: fd is valid for the lifetime of `file`; length and
        // protection flags are plain data. The returned region is only
        // accessed through this struct and unmapped exactly once.
        let map_base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                CSR_MAPPING_INDEX as libc::off_t * page_size,
            )
        };
        if map_base == libc::MAP_FAILED {
            return Err(ClientError::MapFailed {
                len: params.size,
                source: io::Error::last_os_error(),
            });
        }

        debug!(
            path = %device_path.display(),
            len = format_args!("{:#x}", params.size),
            offset = format_args!("{:#x}", params.offset),
            "register bank mapped"
        );

        // SAFETY: offset + bank extent was checked against the mapping size
        // above, so the adjusted base stays inside the mapped region.
        let regs = unsafe { map_base.cast::<u8>().add(params.offset as usize) };

        Ok(Self {
            _file: file,
            map_base,
            map_len,
            regs,
        })
    }

    /// Single-byte volatile read of a named field.
    pub fn read(&self, field: Field) -> u8 {
        // SAFETY: every Field offset lies within the bank extent validated at
        // open; volatile keeps each call a single real bus access.
        unsafe { self.regs.add(field.offset()).read_volatile() }
    }

    /// Single-byte volatile write of a named field.
    pub fn write(&self, field: Field, value: u8) {
        // SAFETY: as for `read`.
        unsafe { self.regs.add(field.offset()).write_volatile(value) }
    }

    /// Updates one LED's 2-bit field via read-modify-write.
    ///
    /// Not atomic against other processes mapping the same bank: two clients
    /// interleaving their read-modify-write cycles can corrupt each other's
    /// field. Callers needing multi-process safety must serialize externally
    /// (e.g. a file lock); this client deliberately adds no locking.
    pub fn set_led(&self, led: Led, state: LedState) {
        let current = self.read(Field::LedControl);
        self.write(Field::LedControl, apply_led(current, led, state));
    }

    /// Reads each field once.
    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            magic: self.read(Field::Magic),
            memory_status: self.read(Field::MemoryStatus),
            battery_status: self.read(Field::BatteryStatus),
            led_control: self.read(Field::LedControl),
            error_control: self.read(Field::ErrorControl),
        }
    }

    /// Unmaps the bank and closes the device file.
    ///
    /// Unmaps the full original mapping (not the offset-adjusted base). An
    /// unmap failure is reported, not ignored: a leaked mapping means a stale
    /// pointer range stays live in this process.
    pub fn close(mut self) -> Result<(), ClientError> {
        // SAFETY: map_base/map_len are the exact values mmap returned, and
        // the null assignment below keeps Drop from unmapping twice.
        let rc = unsafe { libc::munmap(self.map_base, self.map_len) };
        self.map_base = ptr::null_mut();
        if rc != 0 {
            return Err(ClientError::UnmapFailed {
                len: self.map_len as u64,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Drop for RegisterClient {
    fn drop(&mut self) {
        if !self.map_base.is_null() {
            // SAFETY: still the original mapping; close() nulls the base
            // before this can run again.
            unsafe { libc::munmap(self.map_base, self.map_len) };
        }
    }
}
