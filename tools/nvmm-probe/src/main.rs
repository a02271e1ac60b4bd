#![forbid(unsafe_code)]

//! One-shot register probe for the NVRAM board.
//!
//! Discovers the published device, maps its register bank, prints a snapshot
//! of the five CSR fields, cycles the fault LED through its states, and
//! exits. Every failure is fatal: there is no partial-success mode for a
//! single-board register session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use nvmm_client::discovery::UioNamespace;
use nvmm_client::registers::RegisterClient;
use nvmm_regs::{BatteryStatus, Led, LedState, CSR_MAPPING_INDEX, DRIVER_NAME};

#[derive(Debug, Parser)]
#[command(
    name = "nvmm-probe",
    about = "Print the NVRAM board's register snapshot and cycle its fault LED"
)]
struct Args {
    /// Root of the discovery namespace.
    #[arg(long, default_value = "/sys/class/uio")]
    uio_root: PathBuf,

    /// Directory holding the device files.
    #[arg(long, default_value = "/dev")]
    dev_root: PathBuf,

    /// Published device name to match.
    #[arg(long, default_value = DRIVER_NAME)]
    name: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let namespace = UioNamespace::new(&args.uio_root);
    let device = namespace.discover(&args.name).with_context(|| {
        format!(
            "discovering device {:?} under {}",
            args.name,
            args.uio_root.display()
        )
    })?;
    let params = device
        .mapping_params(CSR_MAPPING_INDEX)
        .context("reading mapping metadata")?;

    let device_path = device.device_path(&args.dev_root);
    let client = RegisterClient::open(&device_path, params)
        .with_context(|| format!("opening {}", device_path.display()))?;

    let snapshot = client.snapshot();
    println!("memctrlstatus_magic=0x{:x}", snapshot.magic);
    println!("memctrlstatus_memory=0x{:x}", snapshot.memory_status);
    println!("memctrlstatus_battery=0x{:x}", snapshot.battery_status);
    println!("memctrlcmd_ledctrl=0x{:x}", snapshot.led_control);
    println!("memctrlcmd_errctrl=0x{:x}", snapshot.error_control);

    let battery = BatteryStatus::from_bits_truncate(snapshot.battery_status);
    if battery.intersects(BatteryStatus::BATTERY_1_FAILURE | BatteryStatus::BATTERY_2_FAILURE) {
        warn!(status = ?battery, "board reports a battery failure");
    }

    for state in [
        LedState::On,
        LedState::FlashFast,
        LedState::FlashSlow,
        LedState::Off,
    ] {
        client.set_led(Led::Fault, state);
    }

    client.close().context("closing the register mapping")?;
    Ok(())
}
