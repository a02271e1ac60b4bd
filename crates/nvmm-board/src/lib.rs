//! Board identifier for the Micro Memory battery-backed PCI NVRAM family.
//!
//! This crate owns the privileged half of the system: it brings up the PCI
//! function, finds and maps the CSR register bank, authenticates the board
//! model by its magic-number byte, and republishes the bank through a generic
//! exposure framework so unprivileged clients can map it themselves.
//!
//! The only external inputs are two trait seams: [`PciFunction`] (the platform
//! PCI subsystem) and [`DeviceExposure`] (the UIO-like exposure framework).
//! Everything behind those seams — config-space mechanics, interrupt routing,
//! the device-file plumbing — is out of scope here and mocked in tests.

use thiserror::Error;
use tracing::{error, info, warn};

use nvmm_regs::{
    magic_candidates, round_up_to_page, CSR_REGION_NAME, DRIVER_NAME, MEMCTRLSTATUS_MAGIC,
    PCI_LATENCY_TIMER_OFFSET, REQUIRED_LATENCY_TIMER,
};

/// Version string carried in the published device metadata.
const DRIVER_VERSION: &str = "0.0.1";

/// A PCI base-address-register resource as reported by the platform.
///
/// A BAR that is not implemented reports zero for both fields.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PciResource {
    pub base: u64,
    pub len: u64,
}

/// A live mapping of the register bank into the identifier's address space.
///
/// Implementations unmap on drop. Accesses are single-byte and volatile; the
/// bank is live hardware state and must never be cached or coalesced.
pub trait MappedBank {
    fn read_u8(&self, offset: usize) -> u8;
    fn write_u8(&self, offset: usize, value: u8);
}

/// Seam to the platform PCI subsystem for one function.
///
/// Methods take `&self`: the implementation is a handle onto kernel-side
/// state, not a plain struct, and several acquisition guards need to hold it
/// at once during attach.
pub trait PciFunction {
    fn vendor_id(&self) -> u16;
    fn device_id(&self) -> u16;
    fn irq(&self) -> u32;
    fn page_size(&self) -> u64;

    fn enable(&self) -> bool;
    fn disable(&self);
    fn write_config_u8(&self, offset: u8, value: u8);
    fn set_bus_master(&self);
    /// Negotiates a DMA addressing mask of the given width. Returns `false`
    /// when the platform cannot satisfy it.
    fn set_dma_mask(&self, bits: u32) -> bool;
    /// Claims exclusive ownership of the function's resource regions under
    /// `name`. Returns `false` when another owner already holds them.
    fn request_regions(&self, name: &str) -> bool;
    fn release_regions(&self);
    fn resource(&self, bar: usize) -> PciResource;
    /// Maps `len` bytes of physical address space starting at `base`.
    fn map(&self, base: u64, len: u64) -> Option<Box<dyn MappedBank>>;
}

/// Response of an interrupt handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IrqResponse {
    Handled,
    Declined,
}

pub type IrqHandler = fn(u32) -> IrqResponse;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegionKind {
    Physical,
}

/// One memory region published through the exposure framework. The framework
/// turns this into per-mapping `offset`/`size` attributes in its namespace.
#[derive(Clone, Copy, Debug)]
pub struct ExposedRegion {
    pub addr: u64,
    pub len: u64,
    pub kind: RegionKind,
    pub name: &'static str,
}

/// Everything the exposure framework needs to publish one device.
pub struct ExposureInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub irq: u32,
    pub irq_shared: bool,
    pub handler: IrqHandler,
    pub regions: Vec<ExposedRegion>,
}

/// Opaque token returned by [`DeviceExposure::publish`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExposureHandle(pub u64);

/// Seam to the generic device-exposure framework.
pub trait DeviceExposure {
    fn publish(&self, info: ExposureInfo) -> Result<ExposureHandle, ()>;
    fn unpublish(&self, handle: ExposureHandle);
}

/// Errors from [`attach`]. All are fatal to the attach; partial acquisition is
/// unwound before any of these reaches the caller.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("failed to enable PCI function")]
    EnableFailed,

    /// Kept distinct from the other resource failures: the original driver
    /// conflated this with a generic allocation error code, but "this
    /// platform cannot do 64-bit DMA" and "out of resources" need different
    /// diagnoses.
    #[error("no suitable DMA addressing capability")]
    NoDmaCapability,

    #[error("resource regions already claimed by another owner")]
    ResourceBusy,

    #[error("PCI BAR {bar} reports no register bank")]
    NoRegisterBank { bar: usize },

    #[error("failed to map register bank at {base:#x} (len {len:#x})")]
    MapFailed { base: u64, len: u64 },

    #[error("magic number {observed:#04x} invalid for device {device_id:#06x}")]
    MagicMismatch { observed: u8, device_id: u16 },

    #[error("device exposure framework rejected the publication")]
    ExposeFailed,
}

/// Location and extent of the mapped CSR bank.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegisterBankInfo {
    pub base: u64,
    /// Page-rounded length actually mapped and published.
    pub len: u64,
}

/// State held for one attached board, from successful [`attach`] to
/// [`detach`]. The mapping it owns never crosses the privilege boundary; only
/// the bank's address and length do, via the exposure framework.
pub struct BoardDescriptor {
    pub vendor_id: u16,
    pub device_id: u16,
    pub bank: RegisterBankInfo,
    mapping: Box<dyn MappedBank>,
    handle: ExposureHandle,
}

impl BoardDescriptor {
    pub fn exposure_handle(&self) -> ExposureHandle {
        self.handle
    }
}

impl core::fmt::Debug for BoardDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoardDescriptor")
            .field("vendor_id", &self.vendor_id)
            .field("device_id", &self.device_id)
            .field("bank", &self.bank)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

fn decline_irq(_irq: u32) -> IrqResponse {
    // No interrupt-driven work exists for this board; registration in shared
    // mode only keeps the line routable for other users.
    IrqResponse::Declined
}

/// Drop guard that disables the PCI function unless disarmed.
struct EnableGuard<'a, P: PciFunction> {
    pci: &'a P,
    armed: bool,
}

impl<P: PciFunction> Drop for EnableGuard<'_, P> {
    fn drop(&mut self) {
        if self.armed {
            self.pci.disable();
        }
    }
}

/// Drop guard that releases the claimed resource regions unless disarmed.
struct RegionGuard<'a, P: PciFunction> {
    pci: &'a P,
    armed: bool,
}

impl<P: PciFunction> Drop for RegionGuard<'_, P> {
    fn drop(&mut self) {
        if self.armed {
            self.pci.release_regions();
        }
    }
}

/// Brings up the board and publishes its register bank.
///
/// On any failure the already-acquired subset is unwound in reverse order of
/// acquisition: the mapping (dropped first, being the most recent local),
/// then the region claim, then the function enable. The guards are disarmed
/// only once the publication has succeeded.
pub fn attach<P, E>(pci: &P, exposure: &E) -> Result<BoardDescriptor, AttachError>
where
    P: PciFunction,
    E: DeviceExposure,
{
    if !pci.enable() {
        return Err(AttachError::EnableFailed);
    }
    let mut enabled = EnableGuard { pci, armed: true };

    pci.write_config_u8(PCI_LATENCY_TIMER_OFFSET, REQUIRED_LATENCY_TIMER);
    pci.set_bus_master();

    info!(
        vendor = format_args!("{:#06x}", pci.vendor_id()),
        device = format_args!("{:#06x}", pci.device_id()),
        "Curtiss Wright controller found (PCI Mem Module (Battery Backup))"
    );

    if !pci.set_dma_mask(64) {
        warn!("no suitable DMA mask available");
        return Err(AttachError::NoDmaCapability);
    }

    if !pci.request_regions(DRIVER_NAME) {
        error!("unable to request memory region");
        return Err(AttachError::ResourceBusy);
    }
    let mut regions = RegionGuard { pci, armed: true };

    let csr = pci.resource(0);
    if csr.base == 0 || csr.len == 0 {
        return Err(AttachError::NoRegisterBank { bar: 0 });
    }

    let len = round_up_to_page(csr.len, pci.page_size());
    let mapping = pci
        .map(csr.base, len)
        .ok_or(AttachError::MapFailed { base: csr.base, len })?;

    info!(
        base = format_args!("{:#010x}", csr.base),
        len = format_args!("{:#x}", len),
        "csr register bank mapped"
    );

    let device_id = pci.device_id();
    let observed = mapping.read_u8(MEMCTRLSTATUS_MAGIC);
    let recognised = magic_candidates(device_id).contains(&observed);
    if !recognised {
        error!(
            magic = format_args!("{observed:#04x}"),
            device = format_args!("{device_id:#06x}"),
            "magic number invalid for device"
        );
        return Err(AttachError::MagicMismatch { observed, device_id });
    }

    let handle = exposure
        .publish(ExposureInfo {
            name: DRIVER_NAME,
            version: DRIVER_VERSION,
            irq: pci.irq(),
            irq_shared: true,
            handler: decline_irq,
            regions: vec![ExposedRegion {
                addr: csr.base,
                len,
                kind: RegionKind::Physical,
                name: CSR_REGION_NAME,
            }],
        })
        .map_err(|()| AttachError::ExposeFailed)?;

    enabled.armed = false;
    regions.armed = false;

    Ok(BoardDescriptor {
        vendor_id: pci.vendor_id(),
        device_id,
        bank: RegisterBankInfo { base: csr.base, len },
        mapping,
        handle,
    })
}

/// Reverses a successful [`attach`]: unpublish, release regions, disable the
/// function, unmap. `None` is a no-op, so a detach racing a failed attach is
/// harmless.
pub fn detach<P, E>(pci: &P, exposure: &E, descriptor: Option<BoardDescriptor>)
where
    P: PciFunction,
    E: DeviceExposure,
{
    let Some(descriptor) = descriptor else {
        return;
    };

    exposure.unpublish(descriptor.handle);
    pci.release_regions();
    pci.disable();
    // The mapping unmaps when the descriptor's box drops here, last, matching
    // the original remove order.
    drop(descriptor.mapping);

    info!(
        device = format_args!("{:#06x}", descriptor.device_id),
        "board detached"
    );
}
