#![forbid(unsafe_code)]

//! Register contract for the Micro Memory battery-backed PCI NVRAM boards.
//!
//! This crate exists so the privileged board identifier (`nvmm-board`) and the
//! unprivileged register client (`nvmm-client`) agree on constants that must
//! match exactly at runtime: the CSR byte offsets, the per-model magic-number
//! table, the LED field encodings, and the published device name. Neither side
//! links against the other, so any drift here is a silent wrong-register access
//! on live hardware.

use bitflags::bitflags;

/// Name under which the identifier publishes the board and which the client
/// matches against each namespace entry's `name` attribute.
pub const DRIVER_NAME: &str = "nvram_uio";

/// Name of the register bank region as published through the exposure
/// framework (mapping index [`CSR_MAPPING_INDEX`]).
pub const CSR_REGION_NAME: &str = "csr";

/// The boards expose a single register bank, always at mapping index 0.
pub const CSR_MAPPING_INDEX: usize = 0;

/// PCI vendor id of Micro Memory (later Curtiss-Wright) boards.
pub const PCI_VENDOR_ID_MICRO_MEMORY: u16 = 0x1332;

pub const PCI_DEVICE_ID_MM5415CN: u16 = 0x5415;
pub const PCI_DEVICE_ID_MM5425CN: u16 = 0x5425;
pub const PCI_DEVICE_ID_MM6155: u16 = 0x6155;

/// Latency-timer value the boards require for correct bus behavior. Written to
/// the standard latency-timer config byte at attach; not a tunable.
pub const REQUIRED_LATENCY_TIMER: u8 = 0xF8;

/// Standard PCI config-space offset of the latency-timer byte.
pub const PCI_LATENCY_TIMER_OFFSET: u8 = 0x0D;

// CSR byte offsets from the effective register base. Fixed hardware contract;
// all fields are one byte wide.
pub const MEMCTRLSTATUS_MAGIC: usize = 0x00;
pub const MEMCTRLSTATUS_MEMORY: usize = 0x07;
pub const MEMCTRLSTATUS_BATTERY: usize = 0x08;
pub const MEMCTRLCMD_LEDCTRL: usize = 0x10;
pub const MEMCTRLCMD_ERRCTRL: usize = 0x11;

/// Expected magic-number bytes for a given PCI device id, in scan order.
///
/// Unknown device ids get the empty slice, so identification fails closed: a
/// board that enumerates like this family but is not in the known set is never
/// bound, whatever its magic register reads.
pub const fn magic_candidates(device_id: u16) -> &'static [u8] {
    match device_id {
        PCI_DEVICE_ID_MM5415CN => &[0x59],
        PCI_DEVICE_ID_MM5425CN => &[0x5C, 0x5E],
        PCI_DEVICE_ID_MM6155 => &[0x99],
        _ => &[],
    }
}

/// The three board LEDs, by bit position of their 2-bit control field within
/// [`MEMCTRLCMD_LEDCTRL`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Led {
    Removal,
    Fault,
    Power,
}

impl Led {
    pub const fn shift(self) -> u8 {
        match self {
            Self::Removal => 2,
            Self::Fault => 4,
            Self::Power => 6,
        }
    }
}

/// LED states. The three flash/on/off values are the hardware's 2-bit field
/// encodings; `Flip` is a pseudo-state that toggles only the low bit of the
/// field instead of installing a new value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LedState {
    Off,
    On,
    /// Flash at 3.5 Hz.
    FlashSlow,
    /// Flash at 7.0 Hz.
    FlashFast,
    Flip,
}

impl LedState {
    /// The 2-bit field encoding. `Flip` has none.
    pub const fn field_bits(self) -> Option<u8> {
        match self {
            Self::Off => Some(0b00),
            Self::On => Some(0b01),
            Self::FlashSlow => Some(0b10),
            Self::FlashFast => Some(0b11),
            Self::Flip => None,
        }
    }
}

/// Computes the byte to write back for one LED update.
///
/// Pure: takes the current [`MEMCTRLCMD_LEDCTRL`] byte and returns the new
/// one. Concrete states clear the LED's 2-bit field and install the new value;
/// `Flip` XORs the low bit of the field and leaves the high bit alone. Bits
/// outside `0b11 << shift` are never altered.
pub const fn apply_led(current: u8, led: Led, state: LedState) -> u8 {
    let shift = led.shift();
    match state.field_bits() {
        Some(bits) => (current & !(0b11 << shift)) | (bits << shift),
        None => current ^ (1 << shift),
    }
}

bitflags! {
    /// Decoded [`MEMCTRLSTATUS_BATTERY`] byte.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct BatteryStatus: u8 {
        const BATTERY_1_DISABLED = 1 << 0;
        const BATTERY_1_FAILURE = 1 << 1;
        const BATTERY_2_DISABLED = 1 << 2;
        const BATTERY_2_FAILURE = 1 << 3;
    }
}

/// Rounds `len` up to the next multiple of `page_size` (a power of two).
///
/// The hardware may report a register bank shorter than one page; mapping APIs
/// hand out whole pages, and a short length makes the userspace `mmap` fail
/// with `EINVAL`. Returns the smallest page multiple `>= len`.
pub const fn round_up_to_page(len: u64, page_size: u64) -> u64 {
    debug_assert!(page_size.is_power_of_two());
    (len + (page_size - 1)) & !(page_size - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_table_matches_known_models() {
        assert_eq!(magic_candidates(PCI_DEVICE_ID_MM5415CN), &[0x59]);
        assert_eq!(magic_candidates(PCI_DEVICE_ID_MM5425CN), &[0x5C, 0x5E]);
        assert_eq!(magic_candidates(PCI_DEVICE_ID_MM6155), &[0x99]);
    }

    #[test]
    fn unknown_device_ids_have_no_candidates() {
        assert!(magic_candidates(0x0000).is_empty());
        assert!(magic_candidates(0x5426).is_empty());
        assert!(magic_candidates(0xFFFF).is_empty());
    }

    #[test]
    fn led_fields_do_not_overlap() {
        let all = [Led::Removal, Led::Fault, Led::Power];
        for a in all {
            for b in all {
                if a != b {
                    assert_eq!((0b11 << a.shift()) & (0b11 << b.shift()), 0);
                }
            }
        }
    }

    #[test]
    fn concrete_led_states_isolate_their_field() {
        for current in 0..=u8::MAX {
            for state in [
                LedState::Off,
                LedState::On,
                LedState::FlashSlow,
                LedState::FlashFast,
            ] {
                let next = apply_led(current, Led::Fault, state);
                let mask: u8 = 0b11 << Led::Fault.shift();
                assert_eq!(next & !mask, current & !mask);
                assert_eq!((next & mask) >> Led::Fault.shift(), state.field_bits().unwrap());
                // Idempotent: applying the same concrete state again is a no-op.
                assert_eq!(apply_led(next, Led::Fault, state), next);
            }
        }
    }

    #[test]
    fn flip_is_an_involution() {
        for current in 0..=u8::MAX {
            let once = apply_led(current, Led::Power, LedState::Flip);
            let twice = apply_led(once, Led::Power, LedState::Flip);
            assert_eq!(twice, current);
            // Only the low bit of the 2-bit field moves.
            assert_eq!(once ^ current, 1 << Led::Power.shift());
        }
    }

    #[test]
    fn page_rounding_is_minimal() {
        const PAGE: u64 = 4096;
        assert_eq!(round_up_to_page(0, PAGE), 0);
        assert_eq!(round_up_to_page(1, PAGE), PAGE);
        assert_eq!(round_up_to_page(PAGE, PAGE), PAGE);
        assert_eq!(round_up_to_page(PAGE + 1, PAGE), 2 * PAGE);
        for len in [1u64, 0x40, 0xFFF, 0x1000, 0x1001, 0x7FFF] {
            let rounded = round_up_to_page(len, PAGE);
            assert!(rounded >= len);
            assert_eq!(rounded % PAGE, 0);
            assert!(rounded < len + PAGE);
        }
    }
}
