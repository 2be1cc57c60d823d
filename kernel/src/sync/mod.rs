// SPDX-License-Identifier: MPL-2.0

//! Synchronization primitives.
//!
//! [`RawSpinLock`]/[`SpinLock`] are the busy-waiting building blocks; the
//! blocking primitives ([`Event`], [`Mutex`], [`Semaphore`] and the futex
//! operations) suspend the calling thread on a per-object wait list and
//! integrate with the scheduler for timed waits and cancellation.

mod event;
mod futex;
mod mutex;
mod semaphore;
mod spin;
pub(crate) mod wait;

pub use event::Event;
pub use futex::{futex_wait, futex_wake};
pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use spin::{RawSpinLock, SpinLock, SpinLockGuard};

/// Maximum possible wait, used to request an indefinite block.
pub const MAX_WAIT: u64 = u64::MAX;
