// SPDX-License-Identifier: MPL-2.0

//! The system work queue.
//!
//! Receivers own FIFO mailboxes. Senders push a message into the receiver's
//! mailbox and, if the receiver is not already scheduled for handling, onto
//! the global receiver queue. Worker threads pop receivers from the global
//! queue and drain their mailboxes one message at a time.
//!
//! Messages to a single receiver are handled strictly FIFO and never
//! concurrently, even across worker threads; distinct receivers are handled
//! in parallel and with no mutual ordering.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::ipc::{Mailbox, Message, MessageReceiver};
use crate::prelude::*;

fn receiver_queue() -> &'static SpinLock<VecDeque<Weak<dyn MessageReceiver>>> {
    static RECEIVER_QUEUE: SpinLock<VecDeque<Weak<dyn MessageReceiver>>> =
        SpinLock::new(VecDeque::new());
    &RECEIVER_QUEUE
}

/// Initializes the system-wide work queue.
pub fn init_queue() {
    // The queue storage is static; this exists as the explicit init point of
    // the subsystem and to keep boot ordering visible.
    log::debug!("work queue ready");
}

/// Queues `msg` for later handling by `receiver`.
pub fn queue_message(receiver: Arc<dyn MessageReceiver>, msg: Box<dyn Message>) {
    let mut state = receiver.mailbox().state.lock();
    state.queue.push_back(msg);
    if state.ready && !state.in_receiver_queue && !state.in_process_mode {
        state.in_receiver_queue = true;
        receiver_queue().lock().push_back(Arc::downgrade(&receiver));
    }
}

/// Pops one receiver from the global queue and drains its mailbox.
///
/// Returns false when the global queue was empty (callers should yield).
pub fn process_one_receiver() -> bool {
    let front = receiver_queue().lock().pop_front();
    let Some(weak) = front else {
        return false;
    };
    // A dropped receiver leaves a dangling entry; discard it.
    let Some(receiver) = weak.upgrade() else {
        return true;
    };

    let mailbox = receiver.mailbox();
    {
        let mut state = mailbox.state.lock();
        state.in_receiver_queue = false;
        state.in_process_mode = true;
    }

    loop {
        let next = {
            let mut state = mailbox.state.lock();
            if state.ready {
                state.queue.pop_front()
            } else {
                None
            }
        };
        let Some(mut msg) = next else { break };

        // Capture the completion signal before the handler consumes the
        // message.
        let completion = if msg.header().auto_signal {
            msg.header_mut().completion_semaphore.take()
        } else {
            None
        };

        receiver.handle_message(msg);

        if let Some(semaphore) = completion {
            semaphore.clear();
        }
    }

    let mut state = mailbox.state.lock();
    state.in_process_mode = false;
    // A message that arrived while we were draining must not strand the
    // receiver.
    if state.ready && !state.queue.is_empty() && !state.in_receiver_queue {
        state.in_receiver_queue = true;
        receiver_queue().lock().push_back(Arc::downgrade(&receiver));
    }
    true
}

/// Marks a receiver ready and schedules it if messages accumulated while it
/// was not.
pub fn mark_receiver_ready(receiver: Arc<dyn MessageReceiver>) {
    let mut state = receiver.mailbox().state.lock();
    state.ready = true;
    if !state.queue.is_empty() && !state.in_receiver_queue && !state.in_process_mode {
        state.in_receiver_queue = true;
        receiver_queue().lock().push_back(Arc::downgrade(&receiver));
    }
}

/// The worker-thread body: drain receivers, yield when idle.
pub fn worker_loop() -> ! {
    crate::task::current_thread().mark_worker_thread();
    loop {
        if !process_one_receiver() {
            idle_pause();
        }
    }
}

fn idle_pause() {
    crate::task::yield_now();
    #[cfg(not(target_os = "none"))]
    std::thread::sleep(core::time::Duration::from_micros(100));
}

static WORKERS_STARTED: AtomicUsize = AtomicUsize::new(0);

/// Starts the worker-thread pool; one thread per requested slot. Calling it
/// again only tops the pool up.
pub fn spawn_workers(count: usize) {
    loop {
        let started = WORKERS_STARTED.load(Ordering::Acquire);
        if started >= count {
            return;
        }
        if WORKERS_STARTED
            .compare_exchange(started, started + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            continue;
        }
        spawn_one_worker();
    }
}

#[cfg(not(target_os = "none"))]
fn spawn_one_worker() {
    use crate::task::{create_process, MemInfo};

    let process = create_process(|| {}, true, MemInfo::default());
    process.start();
    let thread = process.main_thread().expect("worker process has a thread");
    std::thread::spawn(move || {
        crate::task::install_current_for_host(thread);
        worker_loop();
    });
}

#[cfg(target_os = "none")]
fn spawn_one_worker() {
    use crate::task::{create_process, MemInfo};

    let process = create_process(|| worker_loop(), true, MemInfo::default());
    process.start();
}
