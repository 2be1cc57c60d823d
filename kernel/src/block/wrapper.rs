// SPDX-License-Identifier: MPL-2.0

//! Synchronous adapters over the asynchronous I/O objects.
//!
//! A wrapper issues the message, sleeps on its private completion semaphore
//! and copies the result back, turning the message round-trip into a plain
//! blocking call. Only legitimate on non-worker threads.

use super::{queue_block_io, BlockDevice};
use crate::fs::{BasicFile, IoObject};
use crate::ipc::{
    self, convert_message, shared_buffer, IoMessage, IoRequest, Mailbox, Message, MessageReceiver,
    SM_IO_COMPLETE,
};
use crate::prelude::*;
use crate::sync::Semaphore;

/// Adapts an asynchronous block device into synchronous block calls.
pub struct BlockWrapper {
    mailbox: Mailbox,
    wrapped: Arc<dyn BlockDevice>,
    /// Serializes whole operations through this wrapper.
    core_lock: RawSpinLock,
    wait_semaphore: Semaphore,
    result: SpinLock<Result>,
    self_weak: Weak<BlockWrapper>,
}

crate::impl_handled_object!(BlockWrapper);

impl BlockWrapper {
    pub fn create(wrapped: Arc<dyn BlockDevice>) -> Arc<BlockWrapper> {
        Arc::new_cyclic(|weak| BlockWrapper {
            mailbox: Mailbox::new(),
            wrapped,
            core_lock: RawSpinLock::new(),
            wait_semaphore: Semaphore::new(1, 0),
            result: SpinLock::new(Err(Error::Unknown)),
            self_weak: weak.clone(),
        })
    }

    pub fn num_blocks(&self) -> u64 {
        self.wrapped.num_blocks()
    }

    pub fn block_size(&self) -> u64 {
        self.wrapped.block_size()
    }

    pub fn read_blocks(&self, start_block: u64, num_blocks: u64, buffer: &mut [u8]) -> Result {
        assert!(num_blocks > 0);
        self.core_lock.lock();

        let shared = shared_buffer(buffer.len());
        let msg = IoMessage::new(
            IoRequest::Read,
            start_block,
            num_blocks,
            shared.clone(),
            Some(self.self_weak.clone() as Weak<dyn MessageReceiver>),
        );

        let result = self.send_and_wait(msg);
        if result.is_ok() {
            buffer.copy_from_slice(&shared.lock()[..buffer.len()]);
        }

        self.core_lock.unlock();
        result
    }

    pub fn write_blocks(&self, start_block: u64, num_blocks: u64, buffer: &[u8]) -> Result {
        assert!(num_blocks > 0);
        self.core_lock.lock();

        let shared = shared_buffer(buffer.len());
        shared.lock().copy_from_slice(buffer);
        let msg = IoMessage::new(
            IoRequest::Write,
            start_block,
            num_blocks,
            shared,
            Some(self.self_weak.clone() as Weak<dyn MessageReceiver>),
        );

        let result = self.send_and_wait(msg);

        self.core_lock.unlock();
        result
    }

    fn send_and_wait(&self, msg: Box<IoMessage>) -> Result {
        // The semaphore being taken already would mean a locking bug.
        let acquired = self.wait_semaphore.timed_wait(0);
        assert!(acquired);
        *self.result.lock() = Err(Error::Unknown);

        queue_block_io(&*self.wrapped, msg);

        self.wait_semaphore.wait();
        self.wait_semaphore.clear();
        *self.result.lock()
    }
}

impl MessageReceiver for BlockWrapper {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn handle_message(&self, msg: Box<dyn Message>) {
        match msg.header().id {
            SM_IO_COMPLETE => {
                if let Some(io) = convert_message::<IoMessage>(msg) {
                    *self.result.lock() = io.response;
                    self.wait_semaphore.clear();
                }
            }
            other => ipc::unknown_message(other),
        }
    }
}

/// The analogous synchronous adapter for basic-file objects.
pub struct FileWrapper {
    mailbox: Mailbox,
    wrapped: Arc<dyn BasicFile>,
    core_lock: RawSpinLock,
    wait_semaphore: Semaphore,
    result: SpinLock<Result>,
    transferred: SpinLock<u64>,
    self_weak: Weak<FileWrapper>,
}

crate::impl_handled_object!(FileWrapper);

impl FileWrapper {
    pub fn create(wrapped: Arc<dyn BasicFile>) -> Arc<FileWrapper> {
        Arc::new_cyclic(|weak| FileWrapper {
            mailbox: Mailbox::new(),
            wrapped,
            core_lock: RawSpinLock::new(),
            wait_semaphore: Semaphore::new(1, 0),
            result: SpinLock::new(Err(Error::Unknown)),
            transferred: SpinLock::new(0),
            self_weak: weak.clone(),
        })
    }

    /// Reads `length` bytes from byte offset `start`; returns the number of
    /// bytes actually read.
    pub fn read_bytes(&self, start: u64, length: u64, buffer: &mut [u8]) -> Result<u64> {
        if (buffer.len() as u64) < length {
            return Err(Error::InvalidParam);
        }
        self.core_lock.lock();

        let shared = shared_buffer(length as usize);
        let msg = IoMessage::new(
            IoRequest::Read,
            start,
            length,
            shared.clone(),
            Some(self.self_weak.clone() as Weak<dyn MessageReceiver>),
        );

        let result = self.send_and_wait(msg, true);
        let outcome = match result {
            Ok(()) => {
                let transferred = *self.transferred.lock();
                buffer[..transferred as usize].copy_from_slice(&shared.lock()[..transferred as usize]);
                Ok(transferred)
            }
            Err(e) => Err(e),
        };

        self.core_lock.unlock();
        outcome
    }

    /// Writes `length` bytes at byte offset `start`; returns the number of
    /// bytes actually written.
    pub fn write_bytes(&self, start: u64, length: u64, buffer: &[u8]) -> Result<u64> {
        if (buffer.len() as u64) < length {
            return Err(Error::InvalidParam);
        }
        self.core_lock.lock();

        let shared = shared_buffer(length as usize);
        shared.lock().copy_from_slice(&buffer[..length as usize]);
        let msg = IoMessage::new(
            IoRequest::Write,
            start,
            length,
            shared,
            Some(self.self_weak.clone() as Weak<dyn MessageReceiver>),
        );

        let result = self.send_and_wait(msg, false);
        let outcome = result.map(|()| *self.transferred.lock());

        self.core_lock.unlock();
        outcome
    }

    pub fn file_size(&self) -> Result<u64> {
        self.wrapped.file_size()
    }

    pub fn set_file_size(&self, size: u64) -> Result {
        self.wrapped.set_file_size(size)
    }

    fn send_and_wait(&self, msg: Box<IoMessage>, is_read: bool) -> Result {
        let acquired = self.wait_semaphore.timed_wait(0);
        assert!(acquired);
        *self.result.lock() = Err(Error::Unknown);
        *self.transferred.lock() = 0;

        if is_read {
            self.wrapped.read(msg);
        } else {
            self.wrapped.write(msg);
        }

        self.wait_semaphore.wait();
        self.wait_semaphore.clear();
        *self.result.lock()
    }
}

impl MessageReceiver for FileWrapper {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn handle_message(&self, msg: Box<dyn Message>) {
        match msg.header().id {
            SM_IO_COMPLETE => {
                if let Some(io) = convert_message::<IoMessage>(msg) {
                    *self.result.lock() = io.response;
                    *self.transferred.lock() = io.count;
                    self.wait_semaphore.clear();
                }
            }
            other => ipc::unknown_message(other),
        }
    }
}
