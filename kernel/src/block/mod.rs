// SPDX-License-Identifier: MPL-2.0

//! Block devices: the message-oriented device abstraction, the RAM disk and
//! partition proxy implementations, the MBR parser and the synchronous
//! wrappers.

pub mod mbr;
mod proxy;
mod ramdisk;
mod wrapper;

pub use proxy::BlockProxy;
pub use ramdisk::RamDisk;
pub use wrapper::{BlockWrapper, FileWrapper};

use crate::ipc::{self, IoMessage, MessageReceiver};
use crate::obj::HandledObject;
use crate::prelude::*;

/// A device addressed in fixed-size blocks.
///
/// Reads and writes arrive as [`IoMessage`]s on the device's mailbox, with
/// `start`/`count` in blocks; completion flows back to the message's sender.
pub trait BlockDevice: MessageReceiver + HandledObject {
    fn num_blocks(&self) -> u64;

    fn block_size(&self) -> u64;

    /// A strong receiver reference for queueing messages to this device.
    fn receiver_arc(&self) -> Arc<dyn MessageReceiver>;
}

/// Queues a block I/O message to `device`.
pub fn queue_block_io(device: &dyn BlockDevice, msg: Box<IoMessage>) {
    ipc::queue_message(device.receiver_arc(), msg);
}

/// Validates a block-range request against a device's geometry and the
/// supplied buffer.
pub(crate) fn check_block_range(
    device_blocks: u64,
    block_size: u64,
    start: u64,
    count: u64,
    buffer_len: usize,
) -> Result {
    if count == 0 {
        return Err(Error::InvalidParam);
    }
    let end = start.checked_add(count).ok_or(Error::OutOfRange)?;
    if start >= device_blocks || count > device_blocks || end > device_blocks {
        return Err(Error::OutOfRange);
    }
    if (buffer_len as u64) < count * block_size {
        return Err(Error::InvalidParam);
    }
    Ok(())
}
