// SPDX-License-Identifier: MPL-2.0

use super::{BasicFile, IoObject};
use crate::ipc::{return_io_message, IoMessage};
use crate::prelude::*;
use crate::tree::Leaf;

/// Capacity of a pipe's ring buffer.
pub const PIPE_CAPACITY: usize = 1024;

/// A byte pipe with non-blocking flow control.
///
/// Writes into a full pipe and reads from an empty one simply transfer zero
/// bytes; callers poll or coordinate through other primitives.
pub struct Pipe {
    ring: SpinLock<PipeRing>,
}

struct PipeRing {
    data: [u8; PIPE_CAPACITY],
    read_pos: usize,
    used: usize,
}

crate::impl_handled_object!(Pipe);

impl Pipe {
    pub fn create() -> Arc<Pipe> {
        Arc::new(Pipe {
            ring: SpinLock::new(PipeRing {
                data: [0; PIPE_CAPACITY],
                read_pos: 0,
                used: 0,
            }),
        })
    }

    /// Reads up to `buffer.len()` bytes; returns how many were transferred.
    pub fn read_bytes(&self, buffer: &mut [u8]) -> u64 {
        let mut ring = self.ring.lock();
        let count = buffer.len().min(ring.used);
        for slot in buffer[..count].iter_mut() {
            *slot = ring.data[ring.read_pos];
            ring.read_pos = (ring.read_pos + 1) % PIPE_CAPACITY;
            ring.used -= 1;
        }
        count as u64
    }

    /// Writes up to the free space; returns how many bytes fit.
    pub fn write_bytes(&self, buffer: &[u8]) -> u64 {
        let mut ring = self.ring.lock();
        let count = buffer.len().min(PIPE_CAPACITY - ring.used);
        for &byte in &buffer[..count] {
            let write_pos = (ring.read_pos + ring.used) % PIPE_CAPACITY;
            ring.data[write_pos] = byte;
            ring.used += 1;
        }
        count as u64
    }

    pub fn bytes_buffered(&self) -> usize {
        self.ring.lock().used
    }
}

impl IoObject for Pipe {
    fn read(&self, mut msg: Box<IoMessage>) {
        let transferred = {
            let mut buffer = msg.buffer.lock();
            let want = (msg.count as usize).min(buffer.len());
            self.read_bytes(&mut buffer[..want])
        };
        msg.count = transferred;
        msg.response = Ok(());
        return_io_message(msg);
    }

    fn write(&self, mut msg: Box<IoMessage>) {
        let transferred = {
            let buffer = msg.buffer.lock();
            let want = (msg.count as usize).min(buffer.len());
            self.write_bytes(&buffer[..want])
        };
        msg.count = transferred;
        msg.response = Ok(());
        return_io_message(msg);
    }
}

impl BasicFile for Pipe {
    fn file_size(&self) -> Result<u64> {
        Ok(self.bytes_buffered() as u64)
    }

    fn set_file_size(&self, _size: u64) -> Result {
        Err(Error::InvalidOp)
    }
}

impl Leaf for Pipe {
    fn as_file(self: Arc<Self>) -> Option<Arc<dyn BasicFile>> {
        Some(self)
    }
}
