// SPDX-License-Identifier: MPL-2.0

use super::{check_block_range, BlockDevice};
use crate::ipc::{
    self, convert_message, return_io_message, IoMessage, IoRequest, Mailbox, Message,
    MessageReceiver, SM_IO_MSG,
};
use crate::prelude::*;
use crate::tree::Leaf;

/// A block device backed by kernel memory.
pub struct RamDisk {
    mailbox: Mailbox,
    storage: SpinLock<Box<[u8]>>,
    num_blocks: u64,
    block_size: u64,
    self_weak: Weak<RamDisk>,
}

crate::impl_handled_object!(RamDisk);

impl RamDisk {
    pub fn create(num_blocks: u64, block_size: u64) -> Result<Arc<RamDisk>> {
        if num_blocks == 0 || block_size == 0 {
            return Err(Error::InvalidParam);
        }
        Ok(Arc::new_cyclic(|weak| RamDisk {
            mailbox: Mailbox::new(),
            storage: SpinLock::new(vec![0u8; (num_blocks * block_size) as usize].into_boxed_slice()),
            num_blocks,
            block_size,
            self_weak: weak.clone(),
        }))
    }

    /// A RAM disk pre-loaded with `image`, rounded up to whole blocks.
    pub fn create_from_image(image: &[u8], block_size: u64) -> Result<Arc<RamDisk>> {
        let num_blocks = (image.len() as u64).div_ceil(block_size);
        let disk = Self::create(num_blocks, block_size)?;
        disk.storage.lock()[..image.len()].copy_from_slice(image);
        Ok(disk)
    }

    fn handle_io(&self, mut msg: Box<IoMessage>) {
        let buffer_len = msg.buffer.lock().len();
        msg.response = check_block_range(
            self.num_blocks,
            self.block_size,
            msg.start,
            msg.count,
            buffer_len,
        )
        .and_then(|()| {
            let offset = (msg.start * self.block_size) as usize;
            let length = (msg.count * self.block_size) as usize;
            let mut storage = self.storage.lock();
            match msg.request {
                IoRequest::Read => {
                    msg.buffer.lock()[..length]
                        .copy_from_slice(&storage[offset..offset + length]);
                    Ok(())
                }
                IoRequest::Write => {
                    storage[offset..offset + length].copy_from_slice(&msg.buffer.lock()[..length]);
                    Ok(())
                }
                IoRequest::Invalid => Err(Error::InvalidParam),
            }
        });
        return_io_message(msg);
    }
}

impl MessageReceiver for RamDisk {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn handle_message(&self, msg: Box<dyn Message>) {
        match msg.header().id {
            SM_IO_MSG => {
                if let Some(io) = convert_message::<IoMessage>(msg) {
                    self.handle_io(io);
                }
            }
            other => ipc::unknown_message(other),
        }
    }
}

impl BlockDevice for RamDisk {
    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }

    fn receiver_arc(&self) -> Arc<dyn MessageReceiver> {
        self.self_weak.upgrade().expect("ramdisk outlived its Arc")
    }
}

impl Leaf for RamDisk {
    fn as_block_device(self: Arc<Self>) -> Option<Arc<dyn BlockDevice>> {
        Some(self)
    }

    fn as_receiver(self: Arc<Self>) -> Option<Arc<dyn MessageReceiver>> {
        Some(self)
    }
}
