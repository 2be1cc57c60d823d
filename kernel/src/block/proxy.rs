// SPDX-License-Identifier: MPL-2.0

use super::{queue_block_io, BlockDevice};
use crate::ipc::{
    self, convert_message, return_io_message, IoMessage, Mailbox, Message, MessageReceiver,
    SM_IO_MSG,
};
use crate::prelude::*;
use crate::tree::Leaf;

/// A window onto a subrange of a parent block device.
///
/// Partitions found in the MBR are exposed as proxies over the whole-disk
/// device.
pub struct BlockProxy {
    mailbox: Mailbox,
    parent: Arc<dyn BlockDevice>,
    start_block: u64,
    num_blocks: u64,
    self_weak: Weak<BlockProxy>,
}

crate::impl_handled_object!(BlockProxy);

impl BlockProxy {
    pub fn create(
        parent: Arc<dyn BlockDevice>,
        start_block: u64,
        num_blocks: u64,
    ) -> Result<Arc<BlockProxy>> {
        if num_blocks == 0
            || start_block > parent.num_blocks()
            || start_block + num_blocks > parent.num_blocks()
        {
            return Err(Error::InvalidParam);
        }
        Ok(Arc::new_cyclic(|weak| BlockProxy {
            mailbox: Mailbox::new(),
            parent,
            start_block,
            num_blocks,
            self_weak: weak.clone(),
        }))
    }

    fn forward(&self, mut msg: Box<IoMessage>) {
        let end = msg.start.saturating_add(msg.count);
        if msg.start >= self.num_blocks || msg.count > self.num_blocks || end > self.num_blocks {
            msg.response = Err(Error::InvalidParam);
            return_io_message(msg);
            return;
        }
        // The sender is left untouched so the completion goes straight back
        // to the original requester.
        msg.start += self.start_block;
        queue_block_io(&*self.parent, msg);
    }
}

impl MessageReceiver for BlockProxy {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn handle_message(&self, msg: Box<dyn Message>) {
        match msg.header().id {
            SM_IO_MSG => {
                if let Some(io) = convert_message::<IoMessage>(msg) {
                    self.forward(io);
                }
            }
            other => ipc::unknown_message(other),
        }
    }
}

impl BlockDevice for BlockProxy {
    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn block_size(&self) -> u64 {
        self.parent.block_size()
    }

    fn receiver_arc(&self) -> Arc<dyn MessageReceiver> {
        self.self_weak.upgrade().expect("proxy outlived its Arc")
    }
}

impl Leaf for BlockProxy {
    fn as_block_device(self: Arc<Self>) -> Option<Arc<dyn BlockDevice>> {
        Some(self)
    }

    fn as_receiver(self: Arc<Self>) -> Option<Arc<dyn MessageReceiver>> {
        Some(self)
    }
}
