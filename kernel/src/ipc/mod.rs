// SPDX-License-Identifier: MPL-2.0

//! The asynchronous message-passing core.

mod message;
pub mod work_queue;

pub use message::{
    convert_message, return_io_message, shared_buffer, unknown_message, BasicMessage, IoMessage,
    IoRequest, Message, MessageHeader, SharedBuffer, SM_ATA_CMD, SM_FAT_CALC_NEXT_CLUSTER,
    SM_FAT_CHAIN_IO, SM_FAT_CHANGE_CHAIN_LEN, SM_IO_COMPLETE, SM_IO_MSG, SM_IRQ_SLOW,
    SM_USER_BASE,
};
pub use work_queue::{
    mark_receiver_ready, process_one_receiver, queue_message, spawn_workers, worker_loop,
};

use crate::prelude::*;

/// The FIFO mailbox owned by every message receiver.
pub struct Mailbox {
    pub(crate) state: SpinLock<MailboxState>,
}

pub(crate) struct MailboxState {
    pub(crate) queue: VecDeque<Box<dyn Message>>,
    /// Scheduled on the global receiver queue.
    pub(crate) in_receiver_queue: bool,
    /// A worker is currently draining this mailbox.
    pub(crate) in_process_mode: bool,
    /// Messages are only dispatched while the receiver is ready.
    pub(crate) ready: bool,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::with_readiness(true)
    }

    /// A mailbox that accumulates messages until [`Mailbox::set_ready`].
    pub fn new_not_ready() -> Self {
        Self::with_readiness(false)
    }

    fn with_readiness(ready: bool) -> Self {
        Self {
            state: SpinLock::new(MailboxState {
                queue: VecDeque::new(),
                in_receiver_queue: false,
                in_process_mode: false,
                ready,
            }),
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }
}

/// An object owning a mailbox of messages dispatched by the work queue.
pub trait MessageReceiver: Send + Sync {
    fn mailbox(&self) -> &Mailbox;

    /// Handles one message. Called on worker threads, one message at a time
    /// per receiver; must not block on wait objects.
    fn handle_message(&self, msg: Box<dyn Message>);
}

/// The mailbox a process registers to receive user-mode messages.
///
/// Messages delivered here are held until the process retrieves them through
/// the receive/complete system calls.
pub struct ProcessMailbox {
    mailbox: Mailbox,
    received: SpinLock<VecDeque<Box<BasicMessage>>>,
}

impl ProcessMailbox {
    pub fn create() -> Arc<Self> {
        Arc::new(Self {
            mailbox: Mailbox::new(),
            received: SpinLock::new(VecDeque::new()),
        })
    }

    /// Identifier and body length of the front message, if any.
    pub fn next_message_details(&self) -> Option<(u64, u64)> {
        self.received
            .lock()
            .front()
            .map(|m| (m.header.id, m.data.len() as u64))
    }

    /// Copies the front message's body into `buf`.
    pub fn receive_body(&self, buf: &mut [u8]) -> Result<u64> {
        let received = self.received.lock();
        let msg = received.front().ok_or(Error::NotFound)?;
        if buf.len() < msg.data.len() {
            return Err(Error::OutOfRange);
        }
        buf[..msg.data.len()].copy_from_slice(&msg.data);
        Ok(msg.data.len() as u64)
    }

    /// Finishes with the front message and removes it.
    pub fn complete_message(&self) -> Result {
        self.received
            .lock()
            .pop_front()
            .map(|_| ())
            .ok_or(Error::NotFound)
    }
}

impl MessageReceiver for ProcessMailbox {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn handle_message(&self, msg: Box<dyn Message>) {
        if let Some(basic) = convert_message::<BasicMessage>(msg) {
            self.received.lock().push_back(basic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_mailbox_receive_flow() {
        crate::init();

        let mailbox = ProcessMailbox::create();
        queue_message(mailbox.clone(), BasicMessage::new(SM_USER_BASE + 1, vec![9, 8, 7]));
        while mailbox.next_message_details().is_none() {
            process_one_receiver();
            std::thread::yield_now();
        }

        assert_eq!(mailbox.next_message_details(), Some((SM_USER_BASE + 1, 3)));
        let mut buf = [0u8; 8];
        assert_eq!(mailbox.receive_body(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[9, 8, 7]);
        mailbox.complete_message().unwrap();
        assert!(mailbox.next_message_details().is_none());
        assert_eq!(mailbox.complete_message().unwrap_err(), Error::NotFound);
    }

    #[test]
    fn not_ready_mailboxes_hold_messages() {
        crate::init();

        struct Sink {
            mailbox: Mailbox,
        }
        impl MessageReceiver for Sink {
            fn mailbox(&self) -> &Mailbox {
                &self.mailbox
            }
            fn handle_message(&self, _msg: Box<dyn Message>) {
                panic!("must not dispatch while not ready");
            }
        }

        let sink = Arc::new(Sink {
            mailbox: Mailbox::new_not_ready(),
        });
        queue_message(sink.clone(), BasicMessage::new(SM_USER_BASE, Vec::new()));
        for _ in 0..16 {
            process_one_receiver();
        }
        assert_eq!(sink.mailbox.pending(), 1);
    }
}
