// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::sync::wait::{block_current, ThreadList};
use crate::sync::MAX_WAIT;
use crate::task::{self, Thread};

/// A triggerable wait object.
///
/// A manual-reset event stays triggered until [`Event::reset`] and releases
/// every waiter on signal; an auto-reset event releases exactly one waiter
/// per signal and clears itself.
pub struct Event {
    auto_reset: bool,
    inner: SpinLock<EventInner>,
}

struct EventInner {
    triggered: bool,
    waiters: ThreadList,
}

impl Event {
    pub fn new(auto_reset: bool) -> Self {
        Self {
            auto_reset,
            inner: SpinLock::new(EventInner {
                triggered: false,
                waiters: ThreadList::new(),
            }),
        }
    }

    /// Blocks until the event is triggered.
    pub fn wait(&self) {
        self.timed_wait(MAX_WAIT);
    }

    /// Blocks until the event triggers or `wait_in_us` microseconds pass.
    /// Returns true when the event fired.
    pub fn timed_wait(&self, wait_in_us: u64) -> bool {
        let current = task::current_thread();

        let mut inner = self.inner.lock();
        if inner.triggered {
            if self.auto_reset {
                inner.triggered = false;
            }
            return true;
        }
        if wait_in_us == 0 {
            return false;
        }

        block_current(inner, wait_in_us, |inner, thread| {
            inner.waiters.push_back(thread.clone());
        });

        // Signalled waiters are removed by the signaller; a thread still on
        // the list after waking simply timed out.
        let timed_out = self.cancel_waiting_thread(&current);
        !timed_out
    }

    /// Signals the event.
    pub fn signal(&self) {
        let mut inner = self.inner.lock();
        if self.auto_reset {
            match inner.waiters.pop_front() {
                Some(waiter) => waiter.start(),
                None => inner.triggered = true,
            }
        } else {
            inner.triggered = true;
            while let Some(waiter) = inner.waiters.pop_front() {
                waiter.start();
            }
        }
    }

    /// Clears the triggered state.
    pub fn reset(&self) {
        self.inner.lock().triggered = false;
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.lock().triggered
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Resumes `thread` immediately if it is waiting here; idempotent.
    ///
    /// Returns true if the thread was found on the wait list.
    pub fn cancel_waiting_thread(&self, thread: &Arc<Thread>) -> bool {
        let mut inner = self.inner.lock();
        match inner.waiters.remove(thread) {
            Some(waiter) => {
                waiter.start();
                true
            }
            None => false,
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        debug_assert!(self.inner.get_mut().waiters.is_empty());
    }
}
