// SPDX-License-Identifier: MPL-2.0

//! Architecture support.
//!
//! The kernel core is single-ISA (x86-64, higher-half, paged); this module
//! holds the few places that touch the ISA directly and the [`PortIo`]
//! abstraction that lets drivers run against simulated hardware on hosted
//! builds.

pub mod x86_64;

pub use x86_64::{set_tls_register, PlatformPortIo, TlsRegister};

/// Port-mapped I/O, as used by the ATA host controller.
///
/// The platform implementation issues real `in`/`out` instructions; tests
/// substitute a simulated device bus.
pub trait PortIo: Send + Sync {
    fn read8(&self, port: u16) -> u8;
    fn write8(&self, port: u16, value: u8);
    fn read16(&self, port: u16) -> u16;
    fn write16(&self, port: u16, value: u16);
    fn read32(&self, port: u16) -> u32;
    fn write32(&self, port: u16, value: u32);
}

/// Writes raw bytes to the platform debug output.
pub fn debug_write_bytes(bytes: &[u8]) {
    x86_64::debug_write_bytes(bytes);
}

#[cfg(target_os = "none")]
pub fn monotonic_ns() -> u64 {
    x86_64::monotonic_ns()
}

#[cfg(target_os = "none")]
pub fn boot_epoch_unix_ns() -> u128 {
    x86_64::BOOT_EPOCH_UNIX_NS
}
