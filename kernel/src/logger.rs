// SPDX-License-Identifier: MPL-2.0

//! Kernel logging through the `log` facade.
//!
//! On bare metal records go to the debug port; on a hosted build they go to
//! stderr so test runs show the kernel's trace output.

use log::{LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        #[cfg(target_os = "none")]
        {
            use core::fmt::Write;

            struct DebugPort;
            impl core::fmt::Write for DebugPort {
                fn write_str(&mut self, s: &str) -> core::fmt::Result {
                    crate::arch::debug_write_bytes(s.as_bytes());
                    Ok(())
                }
            }
            let _ = writeln!(DebugPort, "[{:>5}] {}", record.level(), record.args());
        }

        #[cfg(not(target_os = "none"))]
        std::eprintln!("[{:>5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Installs the kernel logger. Safe to call more than once.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
