// SPDX-License-Identifier: MPL-2.0

use super::{BasicFile, IoObject};
use crate::block::{queue_block_io, BlockDevice};
use crate::ipc::{
    self, convert_message, return_io_message, shared_buffer, IoMessage, IoRequest, Mailbox,
    Message, MessageReceiver, SM_IO_COMPLETE,
};
use crate::prelude::*;
use crate::tree::Leaf;

/// A fixed run of contiguous sectors on a block device, exposed as a file.
///
/// FAT12/16 root directories live in exactly such a run, outside any cluster
/// chain.
pub struct SectorFile {
    mailbox: Mailbox,
    parent: Arc<dyn BlockDevice>,
    start_sector: u64,
    num_sectors: u64,
    self_weak: Weak<SectorFile>,
}

crate::impl_handled_object!(SectorFile);

impl SectorFile {
    pub fn create(
        parent: Arc<dyn BlockDevice>,
        start_sector: u64,
        num_sectors: u64,
    ) -> Arc<SectorFile> {
        Arc::new_cyclic(|weak| SectorFile {
            mailbox: Mailbox::new(),
            parent,
            start_sector,
            num_sectors,
            self_weak: weak.clone(),
        })
    }

    fn size(&self) -> u64 {
        self.num_sectors * self.parent.block_size()
    }

    /// The second leg: the device finished; copy the aligned sectors back
    /// into the byte-ranged parent request and complete it.
    fn handle_io_complete(&self, mut msg: Box<IoMessage>) {
        let parent_msg = msg.parent.take().expect("sector completion without parent");
        let Some(mut parent_msg) = convert_message::<IoMessage>(parent_msg) else {
            return;
        };

        parent_msg.response = msg.response;
        if msg.response.is_ok() && parent_msg.request == IoRequest::Read {
            let block_size = self.parent.block_size();
            let offset = (parent_msg.start % block_size) as usize;
            let length = parent_msg.count as usize;
            let sectors = msg.buffer.lock();
            parent_msg.buffer.lock()[..length].copy_from_slice(&sectors[offset..offset + length]);
        }
        return_io_message(parent_msg);
    }

    fn start_io(&self, mut msg: Box<IoMessage>, request: IoRequest) {
        let block_size = self.parent.block_size();
        let end = msg.start.saturating_add(msg.count);
        if end > self.size() {
            msg.response = Err(Error::OutOfRange);
            return_io_message(msg);
            return;
        }

        let first_block = self.start_sector + msg.start / block_size;
        let block_count = (msg.start % block_size + msg.count).div_ceil(block_size);
        let sector_buffer = shared_buffer((block_count * block_size) as usize);

        if request == IoRequest::Write {
            // Writes below sector granularity would need a read-modify-write
            // cycle; the root directory region is written sector-aligned.
            if msg.start % block_size != 0 || msg.count % block_size != 0 {
                msg.response = Err(Error::InvalidParam);
                return_io_message(msg);
                return;
            }
            sector_buffer.lock().copy_from_slice(&msg.buffer.lock());
        }

        let mut inner = IoMessage::new(
            request,
            first_block,
            block_count,
            sector_buffer,
            Some(self.self_weak.clone() as Weak<dyn MessageReceiver>),
        );
        inner.parent = Some(msg);
        queue_block_io(&*self.parent, inner);
    }
}

impl IoObject for SectorFile {
    fn read(&self, msg: Box<IoMessage>) {
        self.start_io(msg, IoRequest::Read);
    }

    fn write(&self, msg: Box<IoMessage>) {
        self.start_io(msg, IoRequest::Write);
    }
}

impl BasicFile for SectorFile {
    fn file_size(&self) -> Result<u64> {
        Ok(self.size())
    }

    fn set_file_size(&self, _size: u64) -> Result {
        Err(Error::InvalidOp)
    }
}

impl MessageReceiver for SectorFile {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn handle_message(&self, msg: Box<dyn Message>) {
        match msg.header().id {
            SM_IO_COMPLETE => {
                if let Some(io) = convert_message::<IoMessage>(msg) {
                    self.handle_io_complete(io);
                }
            }
            other => ipc::unknown_message(other),
        }
    }
}

impl Leaf for SectorFile {
    fn as_file(self: Arc<Self>) -> Option<Arc<dyn BasicFile>> {
        Some(self)
    }

    fn as_receiver(self: Arc<Self>) -> Option<Arc<dyn MessageReceiver>> {
        Some(self)
    }
}
