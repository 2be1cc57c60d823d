// SPDX-License-Identifier: MPL-2.0

//! The core of the Azalea microkernel.
//!
//! The crate collects the tightly coupled subsystems that make up the kernel
//! proper: the slab allocator, the process/thread model and scheduler, the
//! blocking synchronization primitives, the asynchronous message/work-queue
//! core, the System Tree namespace, the FAT filesystem and the ATA host
//! controller driver.
//!
//! Everything is written against `core`/`alloc`. On a hosted build (anything
//! other than `target_os = "none"`) a thin `std`-backed shim supplies paging,
//! clocks and thread parking, which is what the test suites run against; the
//! bare-metal x86-64 paths live in [`arch`].

#![no_std]
#![allow(clippy::new_without_default)]

extern crate alloc;

#[cfg(not(target_os = "none"))]
extern crate std;

pub mod arch;
pub mod block;
pub mod dev;
pub mod error;
pub mod fs;
pub mod ipc;
pub mod logger;
pub mod mm;
pub mod obj;
pub mod prelude;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod time;
pub mod tree;

pub use error::{Error, Result};

/// Brings up the kernel-wide singletons: the logger, the System Tree root and
/// the work queue. Idempotent; hosted test binaries call it freely.
pub fn init() {
    static INIT: spin::Once<()> = spin::Once::new();
    INIT.call_once(|| {
        logger::init();
        mm::init();
        tree::init();
        ipc::work_queue::init_queue();
        log::info!("azalea kernel core initialized");
    });
}
