// SPDX-License-Identifier: MPL-2.0

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use intrusive_list::{intrusive_adapter, ListNode};

use crate::arch::x86_64::TaskContext;
use crate::arch::TlsRegister;
use crate::prelude::*;
use crate::task::process::Process;
use crate::task::scheduler;

/// Number of thread-local storage slots per thread.
pub const TLS_SLOT_COUNT: usize = 16;

/// Kernel stack size for each thread.
pub const KERNEL_STACK_SIZE: usize = 64 * 1024;

/// Sentinel wake-after value meaning "no deadline".
pub(crate) const NO_WAKE_DEADLINE: u64 = u64::MAX;

pub type ThreadEntry = Box<dyn Fn() + Send + Sync>;

/// A single thread of execution.
///
/// A thread is either on the scheduler's runnable cycle, suspended on exactly
/// one wait list, or destroyed. The cycle lock signals that the scheduler is
/// about to manipulate its run-cycle membership.
pub struct Thread {
    id: u64,
    process: Arc<Process>,
    entry: ThreadEntry,
    #[allow(dead_code)]
    kstack: KernelStack,
    context: UnsafeCell<TaskContext>,

    /// Whether the scheduler may pick this thread.
    permit_running: AtomicBool,
    /// Taken around run-cycle membership changes.
    pub(crate) cycle_lock: RawSpinLock,
    destroyed: AtomicBool,
    is_worker: AtomicBool,
    /// Absolute monotonic deadline after which the scheduler re-permits this
    /// thread; `NO_WAKE_DEADLINE` when not sleeping with a timeout.
    wake_after: AtomicU64,

    tls_slots: SpinLock<[u64; TLS_SLOT_COUNT]>,
    fs_base: AtomicU64,
    gs_base: AtomicU64,

    /// Membership in the wait list of at most one wait object.
    pub(crate) wait_node: ListNode,
    /// Membership in the scheduler's runnable cycle.
    pub(crate) run_node: ListNode,
    /// Membership in the parent process's child-thread list.
    pub(crate) child_node: ListNode,

    self_weak: Weak<Thread>,
}

// The unsafe-cell context is only touched by the scheduler with the cycle
// lock held; everything else is atomics or locked.
unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

crate::impl_handled_object!(Thread);

intrusive_adapter!(pub(crate) WaitAdapter = Thread { wait_node });
intrusive_adapter!(pub(crate) RunAdapter = Thread { run_node });
intrusive_adapter!(pub(crate) ChildAdapter = Thread { child_node });

impl Thread {
    pub(crate) fn new(process: Arc<Process>, entry: ThreadEntry) -> Arc<Thread> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let thread = Arc::new_cyclic(|weak| Thread {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            process,
            entry,
            kstack: KernelStack::new(),
            context: UnsafeCell::new(TaskContext::new()),
            permit_running: AtomicBool::new(false),
            cycle_lock: RawSpinLock::new(),
            destroyed: AtomicBool::new(false),
            is_worker: AtomicBool::new(false),
            wake_after: AtomicU64::new(NO_WAKE_DEADLINE),
            tls_slots: SpinLock::new([0; TLS_SLOT_COUNT]),
            fs_base: AtomicU64::new(0),
            gs_base: AtomicU64::new(0),
            wait_node: ListNode::new(),
            run_node: ListNode::new(),
            child_node: ListNode::new(),
            self_weak: weak.clone(),
        });

        #[cfg(target_os = "none")]
        unsafe {
            (*thread.context.get()).prepare(
                scheduler::kernel_thread_main as usize,
                thread.kstack.top(),
            );
        }

        thread
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub(crate) fn self_arc(&self) -> Arc<Thread> {
        self.self_weak.upgrade().expect("thread outlived its Arc")
    }

    /// Permits the thread to run and places it back on the runnable cycle.
    pub fn start(&self) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        self.wake_after.store(NO_WAKE_DEADLINE, Ordering::Relaxed);
        self.permit_running.store(true, Ordering::Release);
        scheduler::make_runnable(&self.self_arc());
    }

    /// Forbids scheduling of this thread and removes it from the runnable
    /// cycle. The thread keeps executing until it yields.
    pub fn stop(&self) {
        self.permit_running.store(false, Ordering::Release);
        scheduler::remove_runnable(&self.self_arc());
    }

    /// Marks the thread destroyed; it will never be scheduled again.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.permit_running.store(false, Ordering::Release);
        scheduler::remove_runnable(&self.self_arc());
    }

    pub fn is_permitted_to_run(&self) -> bool {
        self.permit_running.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Whether this thread belongs to the work queue's worker pool. Worker
    /// threads may never block on wait objects.
    pub fn is_worker_thread(&self) -> bool {
        self.is_worker.load(Ordering::Relaxed)
    }

    pub fn mark_worker_thread(&self) {
        self.is_worker.store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_wake_after(&self, deadline: Option<u64>) {
        match deadline {
            Some(d) => {
                self.wake_after.store(d, Ordering::Relaxed);
                scheduler::register_sleeper(self.self_arc());
            }
            None => self.wake_after.store(NO_WAKE_DEADLINE, Ordering::Relaxed),
        }
    }

    pub(crate) fn wake_deadline(&self) -> Option<u64> {
        match self.wake_after.load(Ordering::Relaxed) {
            NO_WAKE_DEADLINE => None,
            d => Some(d),
        }
    }

    pub fn tls_slot(&self, index: usize) -> Result<u64> {
        if index >= TLS_SLOT_COUNT {
            return Err(Error::OutOfRange);
        }
        Ok(self.tls_slots.lock()[index])
    }

    pub fn set_tls_slot(&self, index: usize, value: u64) -> Result {
        if index >= TLS_SLOT_COUNT {
            return Err(Error::OutOfRange);
        }
        self.tls_slots.lock()[index] = value;
        Ok(())
    }

    pub(crate) fn record_tls_base(&self, register: TlsRegister, base: u64) {
        match register {
            TlsRegister::Fs => self.fs_base.store(base, Ordering::Relaxed),
            TlsRegister::Gs => self.gs_base.store(base, Ordering::Relaxed),
        }
    }

    pub fn tls_base(&self, register: TlsRegister) -> u64 {
        match register {
            TlsRegister::Fs => self.fs_base.load(Ordering::Relaxed),
            TlsRegister::Gs => self.gs_base.load(Ordering::Relaxed),
        }
    }

    #[allow(dead_code)]
    pub(crate) fn invoke_entry(&self) {
        (self.entry)();
    }

    #[allow(dead_code)]
    pub(crate) fn context_ptr(&self) -> *mut TaskContext {
        self.context.get()
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("process", &self.process.id())
            .field("permit_running", &self.is_permitted_to_run())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

struct KernelStack {
    storage: Box<[u8]>,
}

impl KernelStack {
    fn new() -> Self {
        Self {
            storage: vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice(),
        }
    }

    #[allow(dead_code)]
    fn top(&self) -> usize {
        self.storage.as_ptr() as usize + self.storage.len()
    }
}
