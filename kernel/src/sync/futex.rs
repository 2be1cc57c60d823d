// SPDX-License-Identifier: MPL-2.0

//! Futexes: per-process maps from a user-mode address to the threads
//! suspended on it.

use crate::prelude::*;
use crate::task;

/// Suspends the current thread while `*addr == expected`.
///
/// Returns immediately when the value already differs. A store that lands
/// between enqueueing and sleeping is caught by the re-check, which unwinds
/// the wait.
///
/// # Safety
///
/// `addr` must be a valid, readable `i32` location for the duration of the
/// call (the system-call layer validates user pointers before getting here).
pub unsafe fn futex_wait(addr: *const i32, expected: i32) -> Result {
    let current = task::current_thread();
    let process = current.process().clone();

    if unsafe { core::ptr::read_volatile(addr) } != expected {
        return Ok(());
    }

    let key = addr as u64;
    {
        let mut map = process.futex_map.lock();
        task::continue_this_thread();
        map.entry(key).or_default().push(current.clone());
        current.stop();
    }

    if unsafe { core::ptr::read_volatile(addr) } != expected {
        // Raced with a waker; pull ourselves back out.
        let mut map = process.futex_map.lock();
        if let Some(waiters) = map.get_mut(&key) {
            if let Some(pos) = waiters.iter().position(|t| Arc::ptr_eq(t, &current)) {
                waiters.remove(pos);
            }
            if waiters.is_empty() {
                map.remove(&key);
            }
        }
        drop(map);
        current.start();
    }

    task::resume_scheduling();
    task::yield_now();
    Ok(())
}

/// Wakes every thread of the current process suspended on `addr` and erases
/// the entry.
pub fn futex_wake(addr: *const i32) -> Result {
    let current = task::current_thread();
    let process = current.process().clone();

    let waiters = process.futex_map.lock().remove(&(addr as u64));
    match waiters {
        Some(list) => {
            for thread in list {
                thread.start();
            }
            Ok(())
        }
        None => Err(Error::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicI32, Ordering};
    use crate::task::{create_process, MemInfo};

    #[test]
    fn returns_promptly_on_changed_value() {
        let value = AtomicI32::new(5);
        let started = crate::time::now_ns();
        unsafe { futex_wait(value.as_ptr(), 4).unwrap() };
        // No matching value, no sleep.
        assert!(crate::time::now_ns() - started < 1_000_000_000);
    }

    #[test]
    fn wake_without_waiters_reports_not_found() {
        let value = AtomicI32::new(0);
        assert_eq!(futex_wake(value.as_ptr()).unwrap_err(), Error::NotFound);
    }

    #[test]
    fn wake_releases_same_process_waiters() {
        // Both sides must run threads of the same process; the map is
        // process-local.
        let process = create_process(|| {}, true, MemInfo::default());
        process.start();

        static VALUE: AtomicI32 = AtomicI32::new(1);

        let waiter_thread = process.create_thread(Box::new(|| {}));
        waiter_thread.start();
        let waiter = std::thread::spawn(move || {
            crate::task::install_current_for_host(waiter_thread);
            unsafe { futex_wait(VALUE.as_ptr(), 1).unwrap() };
            VALUE.load(Ordering::SeqCst)
        });

        // Wait until the waiter has parked itself.
        while process.futex_map.lock().is_empty() {
            std::thread::yield_now();
        }

        let waker_thread = process.create_thread(Box::new(|| {}));
        waker_thread.start();
        let waker = std::thread::spawn(move || {
            crate::task::install_current_for_host(waker_thread);
            VALUE.store(2, Ordering::SeqCst);
            // The waiter may have noticed the store and unwound on its own,
            // leaving nothing to wake.
            let _ = futex_wake(VALUE.as_ptr());
        });

        waker.join().unwrap();
        assert_eq!(waiter.join().unwrap(), 2);
        assert!(process.futex_map.lock().is_empty());
    }
}
