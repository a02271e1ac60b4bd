//! End-to-end CLI test against a synthetic namespace and device file.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const BANK_SIZE: usize = 0x1000;

/// Lays out `<root>/sys/uio0` (namespace entry) and `<root>/dev/uio0`
/// (bank-sized backing file) the way the exposure framework would.
fn publish_board(root: &Path, magic: u8) {
    let entry = root.join("sys/uio0");
    fs::create_dir_all(entry.join("maps/map0")).unwrap();
    fs::write(entry.join("name"), "nvram_uio\n").unwrap();
    fs::write(entry.join("maps/map0/offset"), "0x0\n").unwrap();
    fs::write(entry.join("maps/map0/size"), format!("0x{BANK_SIZE:x}\n")).unwrap();

    let dev = root.join("dev");
    fs::create_dir_all(&dev).unwrap();
    let mut bank = vec![0u8; BANK_SIZE];
    bank[0x00] = magic; // MEMCTRLSTATUS_MAGIC
    bank[0x08] = 0x05; // MEMCTRLSTATUS_BATTERY: both batteries disabled
    bank[0x10] = 0b1000_0001; // MEMCTRLCMD_LEDCTRL: power on, spare bit set
    fs::write(dev.join("uio0"), bank).unwrap();
}

fn probe(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("nvmm-probe").unwrap();
    cmd.arg("--uio-root")
        .arg(root.join("sys"))
        .arg("--dev-root")
        .arg(root.join("dev"));
    cmd
}

#[test]
fn prints_snapshot_and_cycles_fault_led() {
    let root = TempDir::new().unwrap();
    publish_board(root.path(), 0x5C);

    probe(root.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("memctrlstatus_magic=0x5c"))
        .stdout(predicate::str::contains("memctrlstatus_memory=0x0"))
        .stdout(predicate::str::contains("memctrlstatus_battery=0x5"))
        .stdout(predicate::str::contains("memctrlcmd_ledctrl=0x81"))
        .stdout(predicate::str::contains("memctrlcmd_errctrl=0x0"));

    // The fault LED cycle ends OFF; bits outside its 2-bit field survive.
    let bank = fs::read(root.path().join("dev/uio0")).unwrap();
    assert_eq!(bank[0x10], 0b1000_0001);
}

#[test]
fn missing_board_fails_with_diagnostic() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("sys")).unwrap();
    fs::create_dir_all(root.path().join("dev")).unwrap();

    probe(root.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no published device named"));
}

#[test]
fn unreadable_metadata_fails_with_diagnostic() {
    let root = TempDir::new().unwrap();
    publish_board(root.path(), 0x5C);
    fs::write(root.path().join("sys/uio0/maps/map0/size"), "garbage\n").unwrap();

    probe(root.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("mapping metadata"));
}

#[test]
fn alternate_name_flag_selects_the_entry() {
    let root = TempDir::new().unwrap();
    publish_board(root.path(), 0x5C);
    fs::write(root.path().join("sys/uio0/name"), "custom_board\n").unwrap();

    probe(root.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("nvram_uio"));

    probe(root.path())
        .arg("--name")
        .arg("custom_board")
        .assert()
        .success();
}
