// SPDX-License-Identifier: MPL-2.0

//! The shared blocking discipline.
//!
//! To suspend on a wait object: take the object's lock, pin scheduling, stop
//! the current thread, enqueue it on the object's wait list, release the
//! lock, resume scheduling and yield. A wake that lands between unlock and
//! yield is harmless because the waker re-permits the thread, and the waiter
//! re-checks its predicate after the yield returns.

use intrusive_list::List;

use crate::prelude::*;
use crate::sync::{SpinLockGuard, MAX_WAIT};
use crate::task::{self, Thread, WaitAdapter};

/// A wait list of suspended threads. The threads' parent processes stay
/// pinned through the strong references held here.
pub(crate) type ThreadList = List<WaitAdapter>;

/// Suspends the current thread on a wait object whose state is behind
/// `guard`.
///
/// `enqueue` runs with the thread already stopped and must link it onto the
/// object's wait list. `wait_in_us` bounds the sleep; [`MAX_WAIT`] means
/// indefinite.
pub(crate) fn block_current<T>(
    mut guard: SpinLockGuard<'_, T>,
    wait_in_us: u64,
    enqueue: impl FnOnce(&mut T, &Arc<Thread>),
) {
    let current = task::current_thread();
    assert!(
        !current.is_worker_thread(),
        "worker threads may not block on wait objects"
    );

    task::continue_this_thread();
    current.stop();
    enqueue(&mut guard, &current);
    if wait_in_us != MAX_WAIT {
        let deadline = crate::time::now_ns().saturating_add(wait_in_us.saturating_mul(1000));
        current.set_wake_after(Some(deadline));
    }
    drop(guard);
    task::resume_scheduling();
    task::yield_now();
}
