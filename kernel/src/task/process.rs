// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hashbrown::HashMap;
use intrusive_list::List;

use crate::ipc::ProcessMailbox;
use crate::obj::HandleTable;
use crate::prelude::*;
use crate::task::thread::{ChildAdapter, Thread, ThreadEntry};

/// Address-space bookkeeping handed to [`Process::create`].
///
/// The kernel core records allocations and mappings; installing them into
/// page tables is the platform layer's job.
#[derive(Debug, Default, Clone)]
pub struct MemInfo {
    /// Base of the region the process may map at.
    pub map_base: u64,
}

#[derive(Debug, Default)]
pub struct AddressSpace {
    /// Backing-memory allocations keyed by their handle-visible base.
    pub allocations: BTreeMap<u64, u64>,
    /// Established mappings, virtual base to length.
    pub mappings: BTreeMap<u64, u64>,
    pub map_base: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Ok,
    Stopped,
    Failed,
}

/// A process: an address space plus child threads and per-process tables.
pub struct Process {
    id: u64,
    kernel_mode: bool,
    threads: SpinLock<List<ChildAdapter>>,
    status: SpinLock<ProcessStatus>,
    in_dead_list: AtomicBool,
    exit_code: AtomicU64,
    handles: HandleTable,
    address_space: SpinLock<AddressSpace>,
    /// User-address → waiting threads; see [`crate::sync::futex_wait`].
    pub(crate) futex_map: SpinLock<HashMap<u64, Vec<Arc<Thread>>>>,
    mailbox: spin::Once<Arc<ProcessMailbox>>,
    self_weak: Weak<Process>,
}

crate::impl_handled_object!(Process);

impl Process {
    /// Creates a process with its first thread at `entry`. The process is
    /// created stopped; call [`Process::start`] to begin scheduling.
    pub fn create(entry: ThreadEntry, kernel_mode: bool, mem_info: MemInfo) -> Arc<Process> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let process = Arc::new_cyclic(|weak| Process {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            kernel_mode,
            threads: SpinLock::new(List::new()),
            status: SpinLock::new(ProcessStatus::Stopped),
            in_dead_list: AtomicBool::new(false),
            exit_code: AtomicU64::new(0),
            handles: HandleTable::new(),
            address_space: SpinLock::new(AddressSpace {
                map_base: mem_info.map_base,
                ..AddressSpace::default()
            }),
            futex_map: SpinLock::new(HashMap::new()),
            mailbox: spin::Once::new(),
            self_weak: weak.clone(),
        });

        let first = Thread::new(process.clone(), entry);
        process.threads.lock().push_back(first);
        process
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kernel_mode(&self) -> bool {
        self.kernel_mode
    }

    pub fn status(&self) -> ProcessStatus {
        *self.status.lock()
    }

    pub fn exit_code(&self) -> u64 {
        self.exit_code.load(Ordering::Relaxed)
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn address_space(&self) -> &SpinLock<AddressSpace> {
        &self.address_space
    }

    pub fn is_in_dead_list(&self) -> bool {
        self.in_dead_list.load(Ordering::Acquire)
    }

    /// Adds a further thread at `entry`; the thread starts stopped.
    pub fn create_thread(&self, entry: ThreadEntry) -> Arc<Thread> {
        let thread = Thread::new(self.self_arc(), entry);
        self.threads.lock().push_back(thread.clone());
        thread
    }

    /// The first still-listed thread, if any.
    pub fn main_thread(&self) -> Option<Arc<Thread>> {
        let threads = self.threads.lock();
        threads.iter().next().map(|t| t.self_arc())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Enables scheduling for all child threads.
    pub fn start(&self) {
        *self.status.lock() = ProcessStatus::Ok;
        self.for_each_thread(|t| t.start());
    }

    /// Suspends scheduling for all child threads.
    pub fn stop(&self) {
        *self.status.lock() = ProcessStatus::Stopped;
        self.for_each_thread(|t| t.stop());
    }

    /// Synchronous teardown: all threads first, then the process tables.
    ///
    /// A process already queued on the defunct list is owned by the tidying
    /// thread and is immune to synchronous destruction.
    pub fn destroy(&self, exit_code: u64) {
        if self.is_in_dead_list() {
            return;
        }
        self.destroy_now(exit_code);
    }

    /// Atomically queues this process for asynchronous reaping.
    pub fn add_to_dead_list(&self) {
        if !self.in_dead_list.swap(true, Ordering::AcqRel) {
            defunct_list().lock().push(self.self_arc());
        }
    }

    pub(crate) fn destroy_now(&self, exit_code: u64) {
        self.exit_code.store(exit_code, Ordering::Relaxed);

        loop {
            let thread = self.threads.lock().pop_front();
            match thread {
                Some(t) => t.destroy(),
                None => break,
            }
        }

        self.handles.clear();
        self.futex_map.lock().clear();
        *self.status.lock() = ProcessStatus::Stopped;
    }

    /// Installs the process's message mailbox; a process registers at most
    /// once.
    pub fn register_mailbox(&self) -> Arc<ProcessMailbox> {
        self.mailbox.call_once(ProcessMailbox::create).clone()
    }

    pub fn mailbox(&self) -> Option<Arc<ProcessMailbox>> {
        self.mailbox.get().cloned()
    }

    fn self_arc(&self) -> Arc<Process> {
        self.self_weak.upgrade().expect("process outlived its Arc")
    }

    fn for_each_thread(&self, f: impl Fn(&Thread)) {
        let threads = self.threads.lock();
        for t in threads.iter() {
            f(t);
        }
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("kernel_mode", &self.kernel_mode)
            .field("status", &self.status())
            .finish()
    }
}

fn defunct_list() -> &'static SpinLock<Vec<Arc<Process>>> {
    static DEFUNCT: SpinLock<Vec<Arc<Process>>> = SpinLock::new(Vec::new());
    &DEFUNCT
}

/// Destroys every process queued on the defunct list; returns how many were
/// reaped. On metal this runs on the dedicated tidying thread.
pub fn reap_defunct_processes() -> usize {
    let drained: Vec<Arc<Process>> = core::mem::take(&mut *defunct_list().lock());
    let count = drained.len();
    for process in drained {
        process.destroy_now(process.exit_code());
    }
    count
}
