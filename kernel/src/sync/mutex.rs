// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::sync::wait::{block_current, ThreadList};
use crate::sync::MAX_WAIT;
use crate::task;

/// A blocking mutex with owner tracking and optional recursion.
///
/// Unlike a scoped lock this is an explicit lock/unlock object: ownership is
/// transferred directly to the head waiter on unlock.
pub struct Mutex {
    recursive: bool,
    inner: SpinLock<MutexInner>,
}

struct MutexInner {
    lock_count: u64,
    /// Id of the owning thread while locked.
    owner: Option<u64>,
    waiters: ThreadList,
}

impl Mutex {
    pub fn new(recursive: bool) -> Self {
        Self {
            recursive,
            inner: SpinLock::new(MutexInner {
                lock_count: 0,
                owner: None,
                waiters: ThreadList::new(),
            }),
        }
    }

    /// Locks, waiting for ever if necessary.
    pub fn lock(&self) {
        let locked = self.timed_lock(MAX_WAIT);
        assert!(locked);
    }

    /// Locks only if the mutex is uncontested.
    pub fn try_lock(&self) -> bool {
        self.timed_lock(0)
    }

    /// Attempts to lock within `wait_in_us` microseconds.
    pub fn timed_lock(&self, wait_in_us: u64) -> bool {
        let current = task::current_thread();

        let mut inner = self.inner.lock();
        if inner.lock_count > 0 && inner.owner == Some(current.id()) {
            assert!(self.recursive, "non-recursive mutex relocked by its owner");
            inner.lock_count += 1;
            return true;
        }
        if inner.lock_count == 0 {
            inner.lock_count = 1;
            inner.owner = Some(current.id());
            return true;
        }
        if wait_in_us == 0 {
            return false;
        }

        block_current(inner, wait_in_us, |inner, thread| {
            inner.waiters.push_back(thread.clone());
        });

        // Either ownership was handed to us by an unlock, or the wait timed
        // out and we must take ourselves off the list.
        let mut inner = self.inner.lock();
        if inner.owner == Some(current.id()) {
            return true;
        }
        assert!(wait_in_us != MAX_WAIT);
        inner.waiters.remove(&current);
        false
    }

    /// Unlocks; at count zero, ownership transfers to the head waiter.
    pub fn unlock(&self) {
        let current = task::current_thread();
        {
            let inner = self.inner.lock();
            assert_eq!(
                inner.owner,
                Some(current.id()),
                "mutex unlocked by a non-owner"
            );
        }
        self.unlock_ignore_owner();
    }

    /// Unlocks without the owner check. Use sparingly; semaphore-style
    /// patterns only.
    pub fn unlock_ignore_owner(&self) {
        let mut inner = self.inner.lock();
        assert!(inner.lock_count > 0, "unlock of an unlocked mutex");
        inner.lock_count -= 1;
        if inner.lock_count > 0 {
            return;
        }
        match inner.waiters.pop_front() {
            None => inner.owner = None,
            Some(next) => {
                inner.owner = Some(next.id());
                inner.lock_count = 1;
                next.start();
            }
        }
    }

    /// Whether the calling thread currently owns the mutex.
    pub fn am_owner(&self) -> bool {
        self.inner.lock().owner == Some(task::current_thread().id())
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().lock_count > 0
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        debug_assert_eq!(inner.lock_count, 0, "mutex dropped while locked");
        debug_assert!(inner.waiters.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn recursive_locking_counts() {
        let mutex = Mutex::new(true);
        mutex.lock();
        mutex.lock();
        mutex.lock();
        assert!(mutex.am_owner());
        mutex.unlock();
        mutex.unlock();
        assert!(mutex.is_locked());
        mutex.unlock();
        assert!(!mutex.is_locked());
        assert!(!mutex.am_owner());
    }

    #[test]
    fn try_lock_fails_when_held_elsewhere() {
        let mutex = Arc::new(Mutex::new(false));
        mutex.lock();

        let contender = {
            let mutex = mutex.clone();
            std::thread::spawn(move || mutex.try_lock())
        };
        assert!(!contender.join().unwrap());
        mutex.unlock();
    }

    #[test]
    fn ownership_transfers_to_waiter() {
        let mutex = Arc::new(Mutex::new(false));
        mutex.lock();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let mutex = mutex.clone();
            std::thread::spawn(move || {
                tx.send(()).unwrap();
                mutex.lock();
                let owned = mutex.am_owner();
                mutex.unlock();
                owned
            })
        };

        rx.recv().unwrap();
        // Give the waiter time to enqueue itself.
        std::thread::sleep(core::time::Duration::from_millis(20));
        mutex.unlock();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn timed_lock_respects_its_deadline() {
        let mutex = Arc::new(Mutex::new(false));
        mutex.lock();

        let blocked = {
            let mutex = mutex.clone();
            std::thread::spawn(move || {
                let started = crate::time::now_ns();
                let got = mutex.timed_lock(100_000); // 100 ms
                (got, crate::time::now_ns() - started)
            })
        };
        let (got, elapsed) = blocked.join().unwrap();
        assert!(!got);
        assert!(elapsed >= 100_000_000, "gave up after only {elapsed} ns");

        // After the holder lets go, an indefinite wait succeeds immediately.
        mutex.unlock();
        let retry = {
            let mutex = mutex.clone();
            std::thread::spawn(move || {
                let got = mutex.timed_lock(MAX_WAIT);
                mutex.unlock();
                got
            })
        };
        assert!(retry.join().unwrap());
    }

    #[test]
    #[should_panic(expected = "non-recursive mutex relocked")]
    fn non_recursive_reentry_asserts() {
        // Leaked so the unwinding drop does not also assert about the held
        // lock.
        let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new(false)));
        mutex.lock();
        let _ = mutex.timed_lock(0);
    }
}
