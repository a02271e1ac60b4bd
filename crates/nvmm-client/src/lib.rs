//! Unprivileged client for a published NVRAM register bank.
//!
//! The privileged identifier (`nvmm-board`) and this crate never share a
//! compiled interface. Everything the client knows it reconstructs at runtime
//! from the exposure framework's filesystem namespace: it matches the
//! published `name` attribute, parses the `maps/map0/{offset,size}` hex
//! attributes, maps the device file, and only then can it resolve the named
//! register fields it shares with the hardware via `nvmm-regs`.

mod error;

pub mod discovery;
pub mod registers;

pub use error::ClientError;
