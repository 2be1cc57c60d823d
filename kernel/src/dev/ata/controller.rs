// SPDX-License-Identifier: MPL-2.0

//! The PCI ATA/IDE host controller state machine.
//!
//! Per command: IDLE, register setup, PIO transfer or bus-master start,
//! interrupt wait, completion. One command executes at a time per controller
//! (command spinlock); one DMA transfer at a time (DMA mutex, held from
//! transfer preparation until the command finishes).

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use super::structs::{
    AtaCommand, AtaPort, AtaStatus, BusMasterCommand, BusMasterPort, BusMasterStatus,
    IdentifyData, PrdEntry, MAX_PRD_ENTRIES, PRD_END_OF_TABLE, PRD_REGION_STRIDE, SECTOR_LENGTH,
};
use crate::arch::PortIo;
use crate::ipc::{
    self, convert_message, return_io_message, Mailbox, Message, MessageReceiver, SharedBuffer,
    SM_ATA_CMD,
};
use crate::mm::{page_allocator, virt_to_phys, KERNEL_PAGE_SIZE};
use crate::prelude::*;
use crate::sync::Mutex;
use crate::task::irq::{IrqFastResult, IrqReceiver};
use zerocopy::FromBytes;

use super::device::AtaQueuedCommand;

/// I/O resources of one IDE channel.
#[derive(Debug, Clone, Copy)]
pub struct AtaChannelConfig {
    pub command_base: u16,
    pub control_base: u16,
    pub irq: u8,
}

/// The standard legacy-mode channel resources.
pub const LEGACY_CHANNELS: [AtaChannelConfig; 2] = [
    AtaChannelConfig {
        command_base: 0x1F0,
        control_base: 0x3F6,
        irq: 14,
    },
    AtaChannelConfig {
        command_base: 0x170,
        control_base: 0x376,
        irq: 15,
    },
];

struct Channel {
    config: AtaChannelConfig,
    /// Set by the slow interrupt path, consumed by the polling wait.
    interrupt_pending: AtomicBool,
}

/// Caller buffer and length backing one queued PRD entry.
#[derive(Clone)]
struct TransferBlock {
    buffer: Option<SharedBuffer>,
    buffer_offset: usize,
    bytes: u32,
}

impl TransferBlock {
    const fn empty() -> Self {
        Self {
            buffer: None,
            buffer_offset: 0,
            bytes: 0,
        }
    }
}

/// The PRD table page: 64 KiB for the table itself, then one 64 KiB bounce
/// buffer per possible entry. The page must be 32-bit addressable for the
/// bus master.
struct DmaRegion {
    base: NonNull<u8>,
    phys: u64,
}

// The raw page is only touched under the DMA mutex.
unsafe impl Send for DmaRegion {}

impl DmaRegion {
    fn allocate() -> Result<Self> {
        static_assertions::const_assert_eq!(
            (MAX_PRD_ENTRIES + 1) * PRD_REGION_STRIDE,
            KERNEL_PAGE_SIZE
        );
        let base = page_allocator().allocate_page().ok_or(Error::DeviceFailed)?;
        let phys = virt_to_phys(base.as_ptr() as usize);
        Ok(Self { base, phys })
    }

    fn bounce_ptr(&self, index: usize) -> *mut u8 {
        unsafe { self.base.as_ptr().add(PRD_REGION_STRIDE * (index + 1)) }
    }

    fn bounce_phys(&self, index: usize) -> u64 {
        self.phys + (PRD_REGION_STRIDE * (index + 1)) as u64
    }

    fn write_prd(&self, index: usize, entry: PrdEntry) {
        unsafe {
            let slot = self.base.as_ptr().add(index * core::mem::size_of::<PrdEntry>())
                as *mut PrdEntry;
            slot.write_unaligned(entry);
        }
    }

    fn read_prd(&self, index: usize) -> PrdEntry {
        unsafe {
            let slot = self.base.as_ptr().add(index * core::mem::size_of::<PrdEntry>())
                as *const PrdEntry;
            slot.read_unaligned()
        }
    }
}

struct DmaState {
    region: Option<DmaRegion>,
    entries: usize,
    is_read: bool,
    drive_index: usize,
    blocks: [TransferBlock; MAX_PRD_ENTRIES],
}

/// The host controller: two channels, shared command serialization, one DMA
/// engine.
pub struct AtaController {
    mailbox: Mailbox,
    ports: Arc<dyn PortIo>,
    channels: [Channel; 2],
    bus_master_base: u16,
    /// Serializes command execution across both channels.
    cmd_lock: RawSpinLock,
    /// Serializes DMA transfers; held from prepare until execution ends.
    dma_mutex: Mutex,
    dma: SpinLock<DmaState>,
    self_weak: Weak<AtaController>,
}

crate::impl_handled_object!(AtaController);

const WAIT_SPIN_LIMIT: u32 = 50_000_000;

impl AtaController {
    pub fn create(
        ports: Arc<dyn PortIo>,
        channels: [AtaChannelConfig; 2],
        bus_master_base: u16,
    ) -> Arc<AtaController> {
        Arc::new_cyclic(|weak| AtaController {
            mailbox: Mailbox::new(),
            ports,
            channels: channels.map(|config| Channel {
                config,
                interrupt_pending: AtomicBool::new(false),
            }),
            bus_master_base,
            cmd_lock: RawSpinLock::new(),
            dma_mutex: Mutex::new(false),
            dma: SpinLock::new(DmaState {
                region: None,
                entries: 0,
                is_read: false,
                drive_index: 0,
                blocks: [const { TransferBlock::empty() }; MAX_PRD_ENTRIES],
            }),
            self_weak: weak.clone(),
        })
    }

    /// A controller on the legacy channel resources.
    pub fn create_legacy(ports: Arc<dyn PortIo>, bus_master_base: u16) -> Arc<AtaController> {
        Self::create(ports, LEGACY_CHANNELS, bus_master_base)
    }

    pub fn receiver_arc(&self) -> Arc<dyn MessageReceiver> {
        self.self_weak.upgrade().expect("controller vanished")
    }

    /// Registers the controller for its channels' interrupt lines.
    pub fn register_interrupts(&self) {
        let me: Arc<dyn IrqReceiver> =
            self.self_weak.upgrade().expect("controller vanished");
        crate::task::irq::register_irq_handler(self.channels[0].config.irq, me.clone());
        if self.channels[1].config.irq != self.channels[0].config.irq {
            crate::task::irq::register_irq_handler(self.channels[1].config.irq, me);
        }
    }

    pub fn dma_possible(&self) -> bool {
        self.bus_master_base != 0
    }

    // ---- Port access helpers. ----

    fn write_cmd_port(&self, drive_index: usize, port: AtaPort, value: u8) {
        let base = self.channels[drive_index / 2].config.command_base;
        self.ports.write8(base + port as u16, value);
    }

    fn read_cmd_port(&self, drive_index: usize, port: AtaPort) -> u8 {
        let base = self.channels[drive_index / 2].config.command_base;
        self.ports.read8(base + port as u16)
    }

    fn bus_master_port(&self, channel: usize, port: BusMasterPort) -> u16 {
        self.bus_master_base + port as u16 + (channel as u16) * 8
    }

    fn read_bus_master(&self, channel: usize, port: BusMasterPort) -> u8 {
        self.ports.read8(self.bus_master_port(channel, port))
    }

    fn write_bus_master(&self, channel: usize, port: BusMasterPort, value: u8) {
        self.ports.write8(self.bus_master_port(channel, port), value);
    }

    // ---- Public command interface. ----

    /// IDENTIFY: probes for a drive and returns its identify data, or `None`
    /// when nothing is attached.
    pub fn cmd_identify(&self, drive_index: usize) -> Option<IdentifyData> {
        let mut sector = [0u8; SECTOR_LENGTH];
        match self.issue_command(drive_index, AtaCommand::Identify, 0, 0, 0, &mut sector) {
            Ok(()) => IdentifyData::read_from_bytes(&sector).ok(),
            Err(_) => None,
        }
    }

    /// Queues an ATA command message onto the controller's own receiver.
    pub fn queue_command(&self, cmd: Box<AtaQueuedCommand>) {
        ipc::queue_message(self.receiver_arc(), cmd);
    }

    /// Acquires the DMA engine and resets transfer bookkeeping. The DMA
    /// mutex stays held until the command executes.
    pub fn start_prepare_dma_transfer(&self, is_read: bool, drive_index: usize) -> Result {
        if !self.dma_possible() {
            return Err(Error::InvalidOp);
        }
        self.acquire_dma_mutex();

        // Discard any stale interrupt state before programming the engine.
        self.write_bus_master(
            drive_index / 2,
            BusMasterPort::Status,
            (BusMasterStatus::INTERRUPT | BusMasterStatus::DMA_ERROR).bits(),
        );

        let mut dma = self.dma.lock();
        if dma.region.is_none() {
            dma.region = Some(DmaRegion::allocate()?);
        }
        dma.entries = 0;
        dma.is_read = is_read;
        dma.drive_index = drive_index;
        let region = dma.region.as_ref().unwrap();
        region.write_prd(
            0,
            PrdEntry {
                region_phys_base: 0,
                byte_count: 0,
                flags: PRD_END_OF_TABLE,
            },
        );
        Ok(())
    }

    /// Appends one PRD entry (with its bounce buffer) to the transfer, up to
    /// [`MAX_PRD_ENTRIES`]. `bytes` of zero means a full 64 KiB region.
    pub fn queue_dma_transfer_block(
        &self,
        buffer: &SharedBuffer,
        buffer_offset: usize,
        bytes: u32,
    ) -> Result {
        if !self.dma_mutex.am_owner() {
            return Err(Error::InvalidOp);
        }
        let mut dma = self.dma.lock();
        if dma.entries >= MAX_PRD_ENTRIES {
            return Err(Error::OutOfRange);
        }
        let actual_bytes = if bytes == 0 {
            PRD_REGION_STRIDE as u32
        } else {
            bytes
        };
        if actual_bytes as usize > PRD_REGION_STRIDE {
            return Err(Error::InvalidParam);
        }

        let index = dma.entries;
        let is_read = dma.is_read;
        let region = dma.region.as_ref().unwrap();
        region.write_prd(
            index,
            PrdEntry {
                region_phys_base: region.bounce_phys(index) as u32,
                byte_count: bytes as u16,
                flags: PRD_END_OF_TABLE,
            },
        );
        // Only the final entry keeps the end-of-table flag.
        if index > 0 {
            let mut prev = region.read_prd(index - 1);
            prev.flags &= !PRD_END_OF_TABLE;
            region.write_prd(index - 1, prev);
        }

        if !is_read {
            // Write to disk: stage the data into the bounce buffer now.
            let data = buffer.lock();
            unsafe {
                core::ptr::copy_nonoverlapping(
                    data.as_ptr().add(buffer_offset),
                    region.bounce_ptr(index),
                    actual_bytes as usize,
                );
            }
        }

        dma.blocks[index] = TransferBlock {
            buffer: Some(buffer.clone()),
            buffer_offset,
            bytes: actual_bytes,
        };
        dma.entries += 1;
        Ok(())
    }

    /// Programs the channel's bus master with the PRD table and direction.
    pub fn dma_transfer_blocks_queued(&self, drive_index: usize) -> Result {
        if !self.dma_mutex.am_owner() {
            return Err(Error::InvalidOp);
        }
        let channel = drive_index / 2;
        let phys = {
            let dma = self.dma.lock();
            if dma.drive_index != drive_index {
                return Err(Error::InvalidParam);
            }
            let region = dma.region.as_ref().ok_or(Error::InvalidOp)?;
            region.phys
        };
        self.ports.write32(
            self.bus_master_port(channel, BusMasterPort::PrdTableAddr),
            phys as u32,
        );

        let is_read = self.dma.lock().is_read;
        let mut command =
            BusMasterCommand::from_bits_truncate(self.read_bus_master(channel, BusMasterPort::Command));
        command.set(BusMasterCommand::WRITE_TO_MEMORY, is_read);
        self.write_bus_master(channel, BusMasterPort::Command, command.bits());
        Ok(())
    }

    /// Executes one command on the selected drive, under the controller
    /// command lock.
    pub fn issue_command(
        &self,
        drive_index: usize,
        command: AtaCommand,
        features: u16,
        count: u32,
        lba: u64,
        buffer: &mut [u8],
    ) -> Result {
        let props = command.properties();

        if drive_index >= 4 {
            return Err(Error::InvalidParam);
        }
        if props.max_sectors == 0 && count != 0 {
            return Err(Error::InvalidParam);
        }
        if count > props.max_sectors && props.max_sectors != 0 {
            return Err(Error::InvalidParam);
        }
        if props.dma && !self.dma_mutex.am_owner() {
            return Err(Error::InvalidOp);
        }

        self.cmd_lock.lock();
        let result = self.issue_command_locked(drive_index, command, features, count, lba, buffer);
        self.cmd_lock.unlock();

        if props.dma {
            self.dma_mutex.unlock();
        }
        result
    }

    fn issue_command_locked(
        &self,
        drive_index: usize,
        command: AtaCommand,
        features: u16,
        count: u32,
        lba: u64,
        buffer: &mut [u8],
    ) -> Result {
        let props = command.properties();
        let channel = drive_index / 2;

        self.channels[channel]
            .interrupt_pending
            .store(false, Ordering::SeqCst);

        // Select the drive; LBA commands also set the LBA-mode bit.
        let mut drive_select = 0xA0u8 | (((drive_index % 2) as u8) << 4);
        if props.lba_command {
            drive_select |= 0x40;
        }
        self.write_cmd_port(drive_index, AtaPort::DriveSelect, drive_select);

        self.write_cmd_port(drive_index, AtaPort::Features, features as u8);

        // 48-bit commands send the high halves first.
        if props.lba48 {
            self.write_cmd_port(drive_index, AtaPort::SectorCount, (count >> 8) as u8);
            self.write_cmd_port(drive_index, AtaPort::LbaLow, (lba >> 24) as u8);
            self.write_cmd_port(drive_index, AtaPort::LbaMid, (lba >> 32) as u8);
            self.write_cmd_port(drive_index, AtaPort::LbaHigh, (lba >> 40) as u8);
        }
        self.write_cmd_port(drive_index, AtaPort::SectorCount, count as u8);
        self.write_cmd_port(drive_index, AtaPort::LbaLow, lba as u8);
        self.write_cmd_port(drive_index, AtaPort::LbaMid, (lba >> 8) as u8);
        self.write_cmd_port(drive_index, AtaPort::LbaHigh, (lba >> 16) as u8);

        self.write_cmd_port(drive_index, AtaPort::CommandStatus, props.code);

        if command == AtaCommand::Identify {
            // A missing drive answers the IDENTIFY probe with a zero status
            // byte immediately.
            let probe = self.read_cmd_port(drive_index, AtaPort::CommandStatus);
            if probe == 0 {
                return Err(Error::NotFound);
            }
            // IDENTIFY completion raises no interrupt; satisfy the wait.
            self.channels[channel]
                .interrupt_pending
                .store(true, Ordering::SeqCst);
        }

        if props.dma {
            let mut bm = BusMasterCommand::from_bits_truncate(
                self.read_bus_master(channel, BusMasterPort::Command),
            );
            bm.insert(BusMasterCommand::START);
            self.write_bus_master(channel, BusMasterPort::Command, bm.bits());
        }

        self.wait_for_cmd_completion(drive_index)?;

        if props.dma {
            let mut bm = BusMasterCommand::from_bits_truncate(
                self.read_bus_master(channel, BusMasterPort::Command),
            );
            bm.remove(BusMasterCommand::START);
            self.write_bus_master(channel, BusMasterPort::Command, bm.bits());
        }

        if props.reads_sectors {
            if props.dma {
                self.dma_read_to_buffers();
            } else {
                let sectors = if command == AtaCommand::Identify { 1 } else { count };
                self.pio_read_sectors(drive_index, sectors, buffer)?;
            }
        } else if props.writes_sectors && !props.dma {
            self.pio_write_sectors(drive_index, count, buffer)?;
        }
        // DMA writes already copied their data at queue time.

        Ok(())
    }

    /// Waits for the channel interrupt, then polls status until not busy.
    fn wait_for_cmd_completion(&self, drive_index: usize) -> Result {
        let channel = drive_index / 2;

        let mut spins = 0u32;
        loop {
            if self.channels[channel]
                .interrupt_pending
                .swap(false, Ordering::SeqCst)
            {
                break;
            }
            // The bus-master status mirrors the INTRQ line; polling it also
            // covers configurations where both channels share one IRQ.
            if self.dma_possible() && self.poll_channel_interrupt(channel) {
                break;
            }
            spins += 1;
            if spins > WAIT_SPIN_LIMIT {
                return Err(Error::DeviceFailed);
            }
            core::hint::spin_loop();
        }

        self.poll_wait_not_busy(drive_index)
    }

    fn poll_channel_interrupt(&self, channel: usize) -> bool {
        let status =
            BusMasterStatus::from_bits_truncate(self.read_bus_master(channel, BusMasterPort::Status));
        if status.contains(BusMasterStatus::INTERRUPT) {
            self.write_bus_master(
                channel,
                BusMasterPort::Status,
                BusMasterStatus::INTERRUPT.bits(),
            );
            if status.contains(BusMasterStatus::DMA_ERROR) {
                log::warn!("bus master reports a DMA error");
            }
            true
        } else {
            false
        }
    }

    fn poll_wait_not_busy(&self, drive_index: usize) -> Result {
        // Four dummy reads flush the status latch.
        for _ in 0..4 {
            self.read_cmd_port(drive_index, AtaPort::CommandStatus);
        }

        let mut spins = 0u32;
        let status = loop {
            let status = AtaStatus::from_bits_truncate(
                self.read_cmd_port(drive_index, AtaPort::CommandStatus),
            );
            if !status.contains(AtaStatus::BUSY) {
                break status;
            }
            spins += 1;
            if spins > WAIT_SPIN_LIMIT {
                return Err(Error::DeviceFailed);
            }
            core::hint::spin_loop();
        };

        if status.intersects(AtaStatus::ERROR | AtaStatus::DRIVE_FAULT) {
            return Err(Error::DeviceFailed);
        }
        Ok(())
    }

    /// PIO data-in: pulls `sectors` * 512 bytes through the data register,
    /// pausing 400 ns at every sector boundary to let the drive settle.
    fn pio_read_sectors(&self, drive_index: usize, sectors: u32, buffer: &mut [u8]) -> Result {
        let total_bytes = sectors as usize * SECTOR_LENGTH;
        if buffer.len() < total_bytes {
            return Err(Error::InvalidParam);
        }
        let data_port = self.channels[drive_index / 2].config.command_base;

        for i in (0..total_bytes).step_by(2) {
            if i != 0 && i % SECTOR_LENGTH == 0 {
                stall_ns(400);
                self.poll_wait_not_busy(drive_index)?;
            }
            let word = self.ports.read16(data_port);
            buffer[i] = word as u8;
            buffer[i + 1] = (word >> 8) as u8;
        }
        Ok(())
    }

    /// PIO data-out: pushes `sectors` * 512 bytes through the data register.
    fn pio_write_sectors(&self, drive_index: usize, sectors: u32, buffer: &[u8]) -> Result {
        let total_bytes = sectors as usize * SECTOR_LENGTH;
        if buffer.len() < total_bytes {
            return Err(Error::InvalidParam);
        }
        let data_port = self.channels[drive_index / 2].config.command_base;

        for i in (0..total_bytes).step_by(2) {
            if i != 0 && i % SECTOR_LENGTH == 0 {
                stall_ns(400);
                self.poll_wait_not_busy(drive_index)?;
            }
            let word = buffer[i] as u16 | ((buffer[i + 1] as u16) << 8);
            self.ports.write16(data_port, word);
        }
        Ok(())
    }

    /// After a DMA read, copies each bounce region back to its caller
    /// buffer.
    fn dma_read_to_buffers(&self) {
        let dma = self.dma.lock();
        let region = match dma.region.as_ref() {
            Some(r) => r,
            None => return,
        };
        for index in 0..dma.entries {
            let block = &dma.blocks[index];
            let Some(buffer) = block.buffer.as_ref() else {
                continue;
            };
            let mut data = buffer.lock();
            unsafe {
                core::ptr::copy_nonoverlapping(
                    region.bounce_ptr(index),
                    data.as_mut_ptr().add(block.buffer_offset),
                    block.bytes as usize,
                );
            }
        }
    }

    /// Takes the DMA mutex without ever scheduler-blocking a worker thread.
    fn acquire_dma_mutex(&self) {
        if crate::task::current_thread().is_worker_thread() {
            while !self.dma_mutex.try_lock() {
                core::hint::spin_loop();
                #[cfg(not(target_os = "none"))]
                std::thread::yield_now();
            }
        } else {
            self.dma_mutex.lock();
        }
    }

    pub(crate) fn release_dma_if_held(&self) {
        if self.dma_mutex.am_owner() {
            self.dma_mutex.unlock();
        }
    }
}

impl MessageReceiver for AtaController {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn handle_message(&self, msg: Box<dyn Message>) {
        match msg.header().id {
            SM_ATA_CMD => {
                if let Some(cmd) = convert_message::<AtaQueuedCommand>(msg) {
                    self.execute_queued_command(*cmd);
                }
            }
            other => ipc::unknown_message(other),
        }
    }
}

impl AtaController {
    fn execute_queued_command(&self, cmd: AtaQueuedCommand) {
        let AtaQueuedCommand {
            header: _,
            drive_index,
            command,
            features,
            io: mut io_msg,
        } = cmd;

        let props = command.properties();
        let result = if props.dma {
            self.execute_dma(drive_index, command, features, &io_msg)
        } else {
            let mut data = io_msg.buffer.lock();
            self.issue_command(
                drive_index,
                command,
                features,
                io_msg.count as u32,
                io_msg.start,
                &mut data,
            )
        };

        io_msg.response = result;
        return_io_message(io_msg);
    }

    fn execute_dma(
        &self,
        drive_index: usize,
        command: AtaCommand,
        features: u16,
        io_msg: &crate::ipc::IoMessage,
    ) -> Result {
        let is_read = command.properties().reads_sectors;
        self.start_prepare_dma_transfer(is_read, drive_index)?;

        let run = (|| {
            let total_bytes = io_msg.count as usize * SECTOR_LENGTH;
            let mut offset = 0usize;
            while offset < total_bytes {
                let chunk = (total_bytes - offset).min(PRD_REGION_STRIDE);
                self.queue_dma_transfer_block(&io_msg.buffer, offset, chunk as u32)?;
                offset += chunk;
            }
            self.dma_transfer_blocks_queued(drive_index)?;
            self.issue_command(
                drive_index,
                command,
                features,
                io_msg.count as u32,
                io_msg.start,
                &mut [],
            )
        })();

        // A failure between prepare and execution leaves the mutex with us.
        if run.is_err() {
            self.release_dma_if_held();
        }
        run
    }
}

impl IrqReceiver for AtaController {
    /// Fast path: claim the interrupt by the write-1-to-clear status bit.
    fn handle_irq_fast(&self, irq: u8) -> IrqFastResult {
        if !self.dma_possible() {
            // Without a visible bus-master status the line cannot be probed;
            // hand everything to the slow path.
            for channel in &self.channels {
                if channel.config.irq == irq {
                    return IrqFastResult::NeedsSlowPath;
                }
            }
            return IrqFastResult::NotForMe;
        }

        for (index, channel) in self.channels.iter().enumerate() {
            if channel.config.irq != irq {
                continue;
            }
            if self.poll_channel_interrupt(index) {
                return IrqFastResult::NeedsSlowPath;
            }
        }
        IrqFastResult::NotForMe
    }

    /// Slow path: flag the channel so the polling wait completes.
    fn handle_irq_slow(&self, irq: u8) {
        for channel in &self.channels {
            if channel.config.irq == irq {
                channel.interrupt_pending.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn stall_ns(nanoseconds: u64) {
    let until = crate::time::now_ns() + nanoseconds;
    while crate::time::now_ns() < until {
        core::hint::spin_loop();
    }
}
