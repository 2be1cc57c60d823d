// SPDX-License-Identifier: MPL-2.0

//! The runnable cycle and the yield/tick machinery.
//!
//! Threads enter and leave the cycle under their cycle lock. On bare metal
//! `yield_now` performs an actual context switch; on hosted builds a stopped
//! thread parks inside `yield_now` until it is re-permitted or its wake-after
//! deadline passes, which gives the same observable blocking behaviour.

use intrusive_list::List;

use crate::prelude::*;
use crate::task::processor;
use crate::task::thread::{RunAdapter, Thread};

fn run_cycle() -> &'static SpinLock<List<RunAdapter>> {
    static RUN_CYCLE: SpinLock<List<RunAdapter>> = SpinLock::new(List::new());
    &RUN_CYCLE
}

fn sleepers() -> &'static SpinLock<Vec<Arc<Thread>>> {
    static SLEEPERS: SpinLock<Vec<Arc<Thread>>> = SpinLock::new(Vec::new());
    &SLEEPERS
}

pub(crate) fn make_runnable(thread: &Arc<Thread>) {
    let mut cycle = run_cycle().lock();
    if thread.is_destroyed() || cycle.contains(thread) {
        return;
    }
    thread.cycle_lock.lock();
    cycle.push_back(thread.clone());
    thread.cycle_lock.unlock();
}

pub(crate) fn remove_runnable(thread: &Arc<Thread>) {
    let mut cycle = run_cycle().lock();
    if cycle.contains(thread) {
        thread.cycle_lock.lock();
        cycle.remove(thread);
        thread.cycle_lock.unlock();
    }
}

/// Whether the thread currently sits on the runnable cycle.
pub fn is_runnable(thread: &Arc<Thread>) -> bool {
    run_cycle().lock().contains(thread)
}

pub fn runnable_count() -> usize {
    run_cycle().lock().len()
}

/// Records a thread that sleeps with a wake-after deadline so the periodic
/// tick can promote it.
pub(crate) fn register_sleeper(thread: Arc<Thread>) {
    sleepers().lock().push(thread);
}

/// The scheduler tick: promotes every sleeper whose wake-after timestamp has
/// passed back to runnable.
pub fn tick() {
    let now = crate::time::now_ns();
    let mut due: Vec<Arc<Thread>> = Vec::new();
    {
        let mut sleepers = sleepers().lock();
        sleepers.retain(|t| match t.wake_deadline() {
            Some(d) if d <= now => {
                due.push(t.clone());
                false
            }
            Some(_) => true,
            // Woken through another path already.
            None => false,
        });
    }
    for thread in due {
        thread.start();
    }

    #[cfg(target_os = "none")]
    schedule();
}

/// Voluntary reschedule.
///
/// A thread that stopped itself does not get past this call until another
/// thread re-permits it (or its wake-after deadline passes).
pub fn yield_now() {
    #[cfg(target_os = "none")]
    schedule();

    #[cfg(not(target_os = "none"))]
    {
        let thread = processor::current_thread();
        loop {
            if thread.is_permitted_to_run() || thread.is_destroyed() {
                break;
            }
            if let Some(deadline) = thread.wake_deadline() {
                if crate::time::now_ns() >= deadline {
                    // The tick would promote us now; do it ourselves.
                    thread.start();
                    break;
                }
            }
            std::thread::yield_now();
        }
    }
}

/// Picks the next permitted thread from the cycle and switches to it.
#[cfg(target_os = "none")]
pub fn schedule() {
    use crate::arch::x86_64::azalea_context_switch;

    if processor::scheduling_pinned() {
        return;
    }
    let Some(current) = processor::current_thread_opt() else {
        return;
    };

    let next = {
        let mut cycle = run_cycle().lock();
        let mut picked = None;
        for _ in 0..cycle.len() {
            let Some(t) = cycle.pop_front() else { break };
            t.cycle_lock.lock();
            cycle.push_back(t.clone());
            t.cycle_lock.unlock();
            if t.is_permitted_to_run() && !Arc::ptr_eq(&t, &current) {
                picked = Some(t);
                break;
            }
        }
        picked
    };

    let Some(next) = next else { return };
    processor::set_current_thread(next.clone());
    unsafe { azalea_context_switch(current.context_ptr(), next.context_ptr()) };
}

/// Entry point of every kernel thread on bare metal.
#[cfg(target_os = "none")]
pub(crate) extern "C" fn kernel_thread_main() -> ! {
    let thread = processor::current_thread();
    thread.invoke_entry();
    thread.destroy();
    schedule();
    unreachable!("destroyed thread was rescheduled");
}
