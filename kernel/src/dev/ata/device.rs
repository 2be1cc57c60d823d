// SPDX-License-Identifier: MPL-2.0

use super::controller::AtaController;
use super::structs::{AtaCommand, IdentifyData, MAX_PRD_ENTRIES, PRD_REGION_STRIDE, SECTOR_LENGTH};
use crate::block::{check_block_range, BlockDevice};
use crate::ipc::{
    self, convert_message, return_io_message, IoMessage, IoRequest, Mailbox, Message,
    MessageHeader, MessageReceiver, SM_ATA_CMD, SM_IO_MSG,
};
use crate::prelude::*;
use crate::tree::Leaf;

/// Largest transfer the PRD table can carry in one command.
const MAX_DMA_SECTORS: u64 = (MAX_PRD_ENTRIES * PRD_REGION_STRIDE / SECTOR_LENGTH) as u64;
/// Highest LBA addressable with a 28-bit command.
const LBA28_LIMIT: u64 = 0x0FFF_FFFF;

/// An ATA command bound for the controller's mailbox.
pub struct AtaQueuedCommand {
    pub header: MessageHeader,
    pub drive_index: usize,
    pub command: AtaCommand,
    pub features: u16,
    pub io: Box<IoMessage>,
}

crate::impl_message!(AtaQueuedCommand);

impl AtaQueuedCommand {
    pub fn new(
        drive_index: usize,
        command: AtaCommand,
        features: u16,
        io: Box<IoMessage>,
    ) -> Box<AtaQueuedCommand> {
        Box::new(AtaQueuedCommand {
            header: MessageHeader::new(SM_ATA_CMD),
            drive_index,
            command,
            features,
            io,
        })
    }
}

/// One drive behind an ATA controller, exposed as a block device.
pub struct AtaDrive {
    mailbox: Mailbox,
    controller: Arc<AtaController>,
    drive_index: usize,
    identify: IdentifyData,
    supports_dma: bool,
    supports_lba48: bool,
    num_blocks: u64,
    self_weak: Weak<AtaDrive>,
}

crate::impl_handled_object!(AtaDrive);

impl AtaDrive {
    pub fn create(
        controller: Arc<AtaController>,
        drive_index: usize,
        identify: IdentifyData,
    ) -> Arc<AtaDrive> {
        let supports_dma = identify.supports_dma() && controller.dma_possible();
        Arc::new_cyclic(|weak| AtaDrive {
            mailbox: Mailbox::new(),
            controller,
            drive_index,
            supports_dma,
            supports_lba48: identify.supports_lba48(),
            num_blocks: identify.addressable_sectors(),
            identify,
            self_weak: weak.clone(),
        })
    }

    /// Identifies every drive position on `controller` and returns a device
    /// for each one that answered.
    pub fn probe_all(controller: &Arc<AtaController>) -> Vec<Arc<AtaDrive>> {
        let mut drives = Vec::new();
        for drive_index in 0..4 {
            if let Some(identify) = controller.cmd_identify(drive_index) {
                log::info!(
                    "ATA drive {}: {} ({} sectors)",
                    drive_index,
                    identify.model_name(),
                    identify.addressable_sectors()
                );
                drives.push(AtaDrive::create(controller.clone(), drive_index, identify));
            }
        }
        drives
    }

    pub fn identify_data(&self) -> &IdentifyData {
        &self.identify
    }

    pub fn dma_supported(&self) -> bool {
        self.supports_dma
    }

    /// Translates one block I/O message into a queued ATA command.
    fn handle_io(&self, mut msg: Box<IoMessage>) {
        let buffer_len = msg.buffer.lock().len();
        if let Err(e) = check_block_range(
            self.num_blocks,
            SECTOR_LENGTH as u64,
            msg.start,
            msg.count,
            buffer_len,
        ) {
            msg.response = Err(e);
            return_io_message(msg);
            return;
        }

        let is_read = match msg.request {
            IoRequest::Read => true,
            IoRequest::Write => false,
            IoRequest::Invalid => {
                msg.response = Err(Error::InvalidParam);
                return_io_message(msg);
                return;
            }
        };

        let needs_lba48 =
            msg.start + msg.count > LBA28_LIMIT || msg.count > 256 || self.num_blocks > LBA28_LIMIT;
        if needs_lba48 && !self.supports_lba48 {
            msg.response = Err(Error::OutOfRange);
            return_io_message(msg);
            return;
        }

        // Too-many-sectors requests are rejected at queue time.
        let transfer_limit = if self.supports_dma {
            MAX_DMA_SECTORS
        } else if needs_lba48 {
            65536
        } else {
            256
        };
        if msg.count > transfer_limit {
            msg.response = Err(Error::OutOfRange);
            return_io_message(msg);
            return;
        }

        let command = match (is_read, self.supports_dma, needs_lba48) {
            (true, true, false) => AtaCommand::ReadDma,
            (true, true, true) => AtaCommand::ReadDmaExt,
            (true, false, false) => AtaCommand::ReadSectors,
            (true, false, true) => AtaCommand::ReadSectorsExt,
            (false, true, false) => AtaCommand::WriteDma,
            (false, true, true) => AtaCommand::WriteDmaExt,
            (false, false, false) => AtaCommand::WriteSectors,
            (false, false, true) => AtaCommand::WriteSectorsExt,
        };

        self.controller
            .queue_command(AtaQueuedCommand::new(self.drive_index, command, 0, msg));
    }
}

impl MessageReceiver for AtaDrive {
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

impl BlockDevice for AtaDrive {
    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn block_size(&self) -> u64 {
        SECTOR_LENGTH as u64
    }

    fn receiver_arc(&self) -> Arc<dyn MessageReceiver> {
        self.self_weak.upgrade().expect("drive outlived its Arc")
    }
}

impl Leaf for AtaDrive {
    fn as_block_device(self: Arc<Self>) -> Option<Arc<dyn BlockDevice>> {
        Some(self)
    }

    fn as_receiver(self: Arc<Self>) -> Option<Arc<dyn MessageReceiver>> {
        Some(self)
    }
}
