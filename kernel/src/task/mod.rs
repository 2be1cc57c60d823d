// SPDX-License-Identifier: MPL-2.0

//! Processes, threads and scheduling.

pub mod irq;
mod process;
mod processor;
mod scheduler;
mod thread;

pub use process::{
    reap_defunct_processes, AddressSpace, MemInfo, Process, ProcessStatus,
};
pub use processor::{
    continue_this_thread, current_thread, processor_count, resume_scheduling, this_processor_id,
};
pub use scheduler::{is_runnable, runnable_count, tick, yield_now};
pub use thread::{Thread, ThreadEntry, KERNEL_STACK_SIZE, TLS_SLOT_COUNT};

pub(crate) use thread::WaitAdapter;

use crate::prelude::*;

/// Gives a freshly spawned host thread the identity of `thread`; used by the
/// hosted worker pool.
#[cfg(not(target_os = "none"))]
pub fn install_current_for_host(thread: Arc<Thread>) {
    processor::set_current_thread(thread);
}

/// Creates a process whose first thread runs `entry`.
pub fn create_process<F>(entry: F, kernel_mode: bool, mem_info: MemInfo) -> Arc<Process>
where
    F: Fn() + Send + Sync + 'static,
{
    Process::create(Box::new(entry), kernel_mode, mem_info)
}

/// Starts the dedicated tidying thread that reaps defunct processes.
#[cfg(target_os = "none")]
pub fn start_tidy_thread() {
    let tidy = create_process(
        || loop {
            reap_defunct_processes();
            sleep_ns(10_000_000);
        },
        true,
        MemInfo::default(),
    );
    tidy.start();
}

/// Puts the current thread to sleep for at least `duration_ns` nanoseconds.
pub fn sleep_ns(duration_ns: u64) {
    let current = current_thread();
    assert!(!current.is_worker_thread());

    continue_this_thread();
    current.stop();
    current.set_wake_after(Some(crate::time::now_ns().saturating_add(duration_ns)));
    resume_scheduling();
    yield_now();
}
