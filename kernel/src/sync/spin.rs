// SPDX-License-Identifier: MPL-2.0

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A raw spin lock: one machine word, no ownership tracking.
///
/// `lock` busy-waits on a compare-exchange of 0 to 1; `unlock` stores 0.
/// Must never be held across a suspension point.
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) {
        while !self.try_lock() {
            core::hint::spin_loop();
            // On the host the holder may be a descheduled OS thread; give it
            // a chance to run instead of burning the whole timeslice.
            #[cfg(not(target_os = "none"))]
            std::thread::yield_now();
        }
    }

    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A spin lock guarding a value, released on guard drop.
pub struct SpinLock<T: ?Sized> {
    lock: RawSpinLock,
    val: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(val: T) -> Self {
        Self {
            lock: RawSpinLock::new(),
            val: UnsafeCell::new(val),
        }
    }

    pub fn into_inner(self) -> T {
        self.val.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock.lock();
        SpinLockGuard { lock: self }
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.lock.try_lock() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Mutable access without locking; statically race-free.
    pub fn get_mut(&mut self) -> &mut T {
        self.val.get_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => fmt::Debug::fmt(&*guard, f),
            None => f.write_str("SpinLock { <locked> }"),
        }
    }
}

// Only the single lock holder may access the inner data.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.val.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.val.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}
