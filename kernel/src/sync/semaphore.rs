// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::sync::wait::{block_current, ThreadList};
use crate::sync::MAX_WAIT;
use crate::task;

/// A counted semaphore.
///
/// `wait` takes a slot (blocking while all slots are taken); `clear` releases
/// one, handing the slot directly to the head waiter if there is one.
/// Invariant: `0 <= cur_user_count <= max_users`.
pub struct Semaphore {
    max_users: u64,
    inner: SpinLock<SemaphoreInner>,
}

struct SemaphoreInner {
    cur_user_count: u64,
    waiters: ThreadList,
}

impl Semaphore {
    pub fn new(max_users: u64, start_users: u64) -> Self {
        assert!(max_users > 0);
        assert!(start_users <= max_users);
        Self {
            max_users,
            inner: SpinLock::new(SemaphoreInner {
                cur_user_count: start_users,
                waiters: ThreadList::new(),
            }),
        }
    }

    /// Acquires a slot, blocking for as long as it takes.
    pub fn wait(&self) {
        let acquired = self.timed_wait(MAX_WAIT);
        assert!(acquired);
    }

    /// Acquires a slot within `wait_in_us` microseconds; zero is a
    /// non-blocking try-acquire.
    pub fn timed_wait(&self, wait_in_us: u64) -> bool {
        let current = task::current_thread();

        let mut inner = self.inner.lock();
        if inner.cur_user_count < self.max_users {
            inner.cur_user_count += 1;
            return true;
        }
        if wait_in_us == 0 {
            return false;
        }

        block_current(inner, wait_in_us, |inner, thread| {
            inner.waiters.push_back(thread.clone());
        });

        // A releaser hands its slot straight to the head waiter, removing it
        // from the list; still being listed means the wait timed out.
        let mut inner = self.inner.lock();
        match inner.waiters.remove(&current) {
            Some(_) => false,
            None => true,
        }
    }

    /// Releases a slot, waking at most one waiter.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        match inner.waiters.pop_front() {
            None => {
                assert!(inner.cur_user_count > 0, "semaphore cleared below zero");
                inner.cur_user_count -= 1;
            }
            Some(next) => {
                // The slot transfers without the count ever dipping.
                assert_eq!(inner.cur_user_count, self.max_users);
                next.start();
            }
        }
    }

    pub fn current_count(&self) -> u64 {
        self.inner.lock().cur_user_count
    }

    pub fn max_users(&self) -> u64 {
        self.max_users
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        debug_assert!(self.inner.get_mut().waiters.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_up_to_max() {
        let sem = Semaphore::new(2, 0);
        assert!(sem.timed_wait(0));
        assert!(sem.timed_wait(0));
        assert!(!sem.timed_wait(0));
        assert_eq!(sem.current_count(), 2);

        sem.clear();
        assert_eq!(sem.current_count(), 1);
        assert!(sem.timed_wait(0));
    }

    #[test]
    fn blocked_waiter_is_released_by_clear() {
        let sem = Arc::new(Semaphore::new(1, 1));

        let waiter = {
            let sem = sem.clone();
            std::thread::spawn(move || sem.timed_wait(MAX_WAIT))
        };

        while sem.inner.lock().waiters.is_empty() {
            std::thread::yield_now();
        }
        sem.clear();
        assert!(waiter.join().unwrap());
        // The slot transferred; the count never dropped.
        assert_eq!(sem.current_count(), 1);
    }

    #[test]
    fn timed_wait_expires_when_full() {
        let sem = Semaphore::new(1, 1);
        let started = crate::time::now_ns();
        assert!(!sem.timed_wait(20_000)); // 20 ms
        assert!(crate::time::now_ns() - started >= 20_000_000);
        assert_eq!(sem.current_count(), 1);
    }
}
