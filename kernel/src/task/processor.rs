// SPDX-License-Identifier: MPL-2.0

//! Per-processor state: the current thread and the scheduling pin used by
//! the blocking discipline.

use crate::prelude::*;
use crate::task::thread::Thread;

/// The thread executing on this processor.
///
/// On a hosted build a context without a kernel identity is adopted on first
/// use, the way the original threading adapter wraps foreign threads.
pub fn current_thread() -> Arc<Thread> {
    imp::current_thread()
}

pub(crate) fn current_thread_opt() -> Option<Arc<Thread>> {
    imp::current_thread_opt()
}

/// Installs `thread` as this processor's current thread.
pub(crate) fn set_current_thread(thread: Arc<Thread>) {
    imp::set_current_thread(thread)
}

/// Pins the current thread as the only runnable choice on this processor,
/// so a stop/enqueue sequence cannot be preempted mid-way.
pub fn continue_this_thread() {
    imp::set_pinned(true)
}

/// Undoes [`continue_this_thread`].
pub fn resume_scheduling() {
    imp::set_pinned(false)
}

#[allow(dead_code)]
pub(crate) fn scheduling_pinned() -> bool {
    imp::pinned()
}

pub fn processor_count() -> u32 {
    imp::processor_count()
}

pub fn this_processor_id() -> u32 {
    imp::this_processor_id()
}

#[cfg(not(target_os = "none"))]
mod imp {
    use core::cell::{Cell, RefCell};

    use crate::prelude::*;
    use crate::task::process::{MemInfo, Process};
    use crate::task::thread::Thread;

    std::thread_local! {
        static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
        static PINNED: Cell<bool> = const { Cell::new(false) };
    }

    pub fn current_thread() -> Arc<Thread> {
        if let Some(t) = current_thread_opt() {
            return t;
        }
        adopt()
    }

    pub fn current_thread_opt() -> Option<Arc<Thread>> {
        CURRENT.with(|c| c.borrow().clone())
    }

    pub fn set_current_thread(thread: Arc<Thread>) {
        CURRENT.with(|c| *c.borrow_mut() = Some(thread));
    }

    /// Gives a foreign host thread a kernel identity of its own.
    fn adopt() -> Arc<Thread> {
        let process = Process::create(Box::new(|| {}), true, MemInfo::default());
        process.start();
        let thread = process.main_thread().expect("fresh process has a thread");
        set_current_thread(thread.clone());
        thread
    }

    pub fn set_pinned(pinned: bool) {
        PINNED.with(|p| p.set(pinned));
    }

    pub fn pinned() -> bool {
        PINNED.with(|p| p.get())
    }

    pub fn processor_count() -> u32 {
        1
    }

    pub fn this_processor_id() -> u32 {
        0
    }
}

#[cfg(target_os = "none")]
mod imp {
    use core::sync::atomic::{AtomicBool, Ordering};

    use crate::prelude::*;
    use crate::task::thread::Thread;

    const MAX_PROCESSORS: usize = 32;

    static CURRENT: [SpinLock<Option<Arc<Thread>>>; MAX_PROCESSORS] =
        [const { SpinLock::new(None) }; MAX_PROCESSORS];
    static PINNED: [AtomicBool; MAX_PROCESSORS] =
        [const { AtomicBool::new(false) }; MAX_PROCESSORS];

    // Single bootstrap processor until SMP bring-up wires in APIC ids.
    fn cpu_id() -> usize {
        0
    }

    pub fn current_thread() -> Arc<Thread> {
        current_thread_opt().expect("no current thread on this processor")
    }

    pub fn current_thread_opt() -> Option<Arc<Thread>> {
        CURRENT[cpu_id()].lock().clone()
    }

    pub fn set_current_thread(thread: Arc<Thread>) {
        *CURRENT[cpu_id()].lock() = Some(thread);
    }

    pub fn set_pinned(pinned: bool) {
        PINNED[cpu_id()].store(pinned, Ordering::Release);
    }

    pub fn pinned() -> bool {
        PINNED[cpu_id()].load(Ordering::Acquire)
    }

    pub fn processor_count() -> u32 {
        1
    }

    pub fn this_processor_id() -> u32 {
        cpu_id() as u32
    }
}
