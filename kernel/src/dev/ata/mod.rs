// SPDX-License-Identifier: MPL-2.0

//! The PCI ATA/IDE driver: host-controller state machine plus the per-drive
//! block devices feeding the message core.

mod controller;
mod device;
pub mod structs;

pub use controller::{AtaChannelConfig, AtaController, LEGACY_CHANNELS};
pub use device::{AtaDrive, AtaQueuedCommand};
pub use structs::{AtaCommand, AtaStatus, IdentifyData};

#[cfg(test)]
mod tests {
    use super::structs::*;
    use super::*;
    use crate::arch::PortIo;
    use crate::block::{BlockDevice, BlockWrapper};
    use crate::prelude::*;

    const CMD_BASE: u16 = 0x1F0;
    const BM_BASE: u16 = 0xC000;
    const DISK_SECTORS: usize = 64;

    struct MockState {
        sector_count: u8,
        lba: [u8; 3],
        drive_select: u8,
        status: u8,
        data_out: VecDeque<u8>,
        data_in: Vec<u8>,
        expected_write_bytes: usize,
        pending_write_lba: u64,
        bm_cmd: u8,
        bm_status: u8,
        prd_addr: u32,
        pending_dma: Option<(bool, u64, u32)>,
        identify_raised_interrupt: bool,
        disk: Vec<u8>,
    }

    /// A simulated single-drive IDE bus (master on the primary channel).
    struct MockAtaBus {
        with_dma: bool,
        state: SpinLock<MockState>,
    }

    impl MockAtaBus {
        fn new(with_dma: bool) -> Arc<MockAtaBus> {
            let mut disk = vec![0u8; DISK_SECTORS * SECTOR_LENGTH];
            for (i, byte) in disk.iter_mut().enumerate() {
                *byte = (i / SECTOR_LENGTH) as u8 ^ (i % 251) as u8;
            }
            Arc::new(MockAtaBus {
                with_dma,
                state: SpinLock::new(MockState {
                    sector_count: 0,
                    lba: [0; 3],
                    drive_select: 0,
                    status: 0,
                    data_out: VecDeque::new(),
                    data_in: Vec::new(),
                    expected_write_bytes: 0,
                    pending_write_lba: 0,
                    bm_cmd: 0,
                    bm_status: 0,
                    prd_addr: 0,
                    pending_dma: None,
                    identify_raised_interrupt: false,
                    disk,
                }),
            })
        }

        fn identify_words(&self) -> [u16; 256] {
            let mut words = [0u16; 256];
            if self.with_dma {
                words[49] = 1 << 8;
            }
            words[60] = DISK_SECTORS as u16;
            words[61] = 0;
            // Model: "MOCK DRIVE", byte-swapped per ATA8-ACS.
            let model = b"MOCK DRIVE                              ";
            for i in 0..20 {
                words[27 + i] = ((model[i * 2] as u16) << 8) | model[i * 2 + 1] as u16;
            }
            words
        }

        fn dispatch_command(&self, state: &mut MockState, code: u8) {
            let ready = (AtaStatus::DRIVE_READY | AtaStatus::DATA_READY).bits();
            if state.drive_select & 0x10 != 0 {
                // No slave attached: IDENTIFY reads back a zero status.
                state.status = 0;
                return;
            }
            let count = if state.sector_count == 0 {
                256u32
            } else {
                state.sector_count as u32
            };
            let lba = state.lba[0] as u64
                | ((state.lba[1] as u64) << 8)
                | ((state.lba[2] as u64) << 16);

            match code {
                0xEC => {
                    let words = self.identify_words();
                    state.data_out.clear();
                    for w in words {
                        state.data_out.extend(w.to_le_bytes());
                    }
                    state.status = ready;
                    state.identify_raised_interrupt = true;
                }
                0x20 => {
                    let from = lba as usize * SECTOR_LENGTH;
                    let len = count as usize * SECTOR_LENGTH;
                    state.data_out.clear();
                    for &b in &state.disk[from..from + len] {
                        state.data_out.push_back(b);
                    }
                    state.status = ready;
                    state.bm_status |= BusMasterStatus::INTERRUPT.bits();
                }
                0x30 => {
                    state.expected_write_bytes = count as usize * SECTOR_LENGTH;
                    state.pending_write_lba = lba;
                    state.data_in.clear();
                    state.status = ready;
                    state.bm_status |= BusMasterStatus::INTERRUPT.bits();
                }
                0xC8 | 0xCA => {
                    state.pending_dma = Some((code == 0xC8, lba, count));
                    state.status = AtaStatus::DRIVE_READY.bits();
                }
                _ => {
                    state.status = (AtaStatus::ERROR | AtaStatus::DRIVE_READY).bits();
                }
            }
        }

        /// The bus-master engine: resolves the 32-bit "physical" pointers
        /// through the simulated physical map, like real hardware resolving
        /// bus addresses.
        fn run_dma(&self, state: &mut MockState) {
            let Some((is_read, lba, count)) = state.pending_dma.take() else {
                return;
            };
            let mut disk_pos = lba as usize * SECTOR_LENGTH;
            let mut remaining = count as usize * SECTOR_LENGTH;
            let mut prd_phys = state.prd_addr as u64;

            loop {
                let prd_virt = crate::mm::phys_to_virt(prd_phys)
                    .expect("PRD table outside the simulated physical space");
                let entry = unsafe { (prd_virt as *const PrdEntry).read_unaligned() };
                let bytes = if entry.byte_count == 0 {
                    PRD_REGION_STRIDE
                } else {
                    entry.byte_count as usize
                }
                .min(remaining);
                let region = crate::mm::phys_to_virt(entry.region_phys_base as u64)
                    .expect("bounce region outside the simulated physical space")
                    as *mut u8;
                unsafe {
                    if is_read {
                        core::ptr::copy_nonoverlapping(
                            state.disk.as_ptr().add(disk_pos),
                            region,
                            bytes,
                        );
                    } else {
                        core::ptr::copy_nonoverlapping(
                            region as *const u8,
                            state.disk.as_mut_ptr().add(disk_pos),
                            bytes,
                        );
                    }
                }
                disk_pos += bytes;
                remaining -= bytes;
                if entry.flags & PRD_END_OF_TABLE != 0 || remaining == 0 {
                    break;
                }
                prd_phys += core::mem::size_of::<PrdEntry>() as u64;
            }

            state.status = AtaStatus::DRIVE_READY.bits();
            state.bm_status |= BusMasterStatus::INTERRUPT.bits();
            state.bm_status &= !BusMasterStatus::ACTIVE.bits();
        }
    }

    impl PortIo for MockAtaBus {
        fn read8(&self, port: u16) -> u8 {
            let state = self.state.lock();
            match port {
                p if p == CMD_BASE + 7 => state.status,
                p if p == BM_BASE => state.bm_cmd,
                p if p == BM_BASE + 2 => state.bm_status,
                _ => 0,
            }
        }

        fn write8(&self, port: u16, value: u8) {
            let mut state = self.state.lock();
            match port {
                p if p == CMD_BASE + 1 => (), // features ignored
                p if p == CMD_BASE + 2 => state.sector_count = value,
                p if p == CMD_BASE + 3 => state.lba[0] = value,
                p if p == CMD_BASE + 4 => state.lba[1] = value,
                p if p == CMD_BASE + 5 => state.lba[2] = value,
                p if p == CMD_BASE + 6 => state.drive_select = value,
                p if p == CMD_BASE + 7 => self.dispatch_command(&mut state, value),
                p if p == BM_BASE => {
                    state.bm_cmd = value;
                    if value & BusMasterCommand::START.bits() != 0 {
                        self.run_dma(&mut state);
                    }
                }
                p if p == BM_BASE + 2 => {
                    // Write-1-to-clear.
                    state.bm_status &= !(value & BusMasterStatus::INTERRUPT.bits());
                }
                _ => (),
            }
        }

        fn read16(&self, port: u16) -> u16 {
            let mut state = self.state.lock();
            if port == CMD_BASE {
                let lo = state.data_out.pop_front().unwrap_or(0);
                let hi = state.data_out.pop_front().unwrap_or(0);
                u16::from_le_bytes([lo, hi])
            } else {
                0
            }
        }

        fn write16(&self, port: u16, value: u16) {
            let mut state = self.state.lock();
            if port == CMD_BASE {
                state.data_in.extend(value.to_le_bytes());
                if state.expected_write_bytes > 0
                    && state.data_in.len() == state.expected_write_bytes
                {
                    let at = state.pending_write_lba as usize * SECTOR_LENGTH;
                    let bytes = core::mem::take(&mut state.data_in);
                    state.disk[at..at + bytes.len()].copy_from_slice(&bytes);
                    state.expected_write_bytes = 0;
                }
            }
        }

        fn read32(&self, _port: u16) -> u32 {
            0
        }

        fn write32(&self, port: u16, value: u32) {
            let mut state = self.state.lock();
            if port == BM_BASE + 4 {
                state.prd_addr = value;
            }
        }
    }

    fn controller_with(bus: &Arc<MockAtaBus>) -> Arc<AtaController> {
        AtaController::create(bus.clone() as Arc<dyn PortIo>, LEGACY_CHANNELS, BM_BASE)
    }

    #[test]
    fn identify_finds_only_the_master() {
        crate::init();
        let bus = MockAtaBus::new(true);
        let controller = controller_with(&bus);

        let identify = controller.cmd_identify(0).expect("master present");
        assert_eq!(identify.model_name(), "MOCK DRIVE");
        assert_eq!(identify.addressable_sectors(), DISK_SECTORS as u64);
        assert!(identify.supports_dma());

        // The probe of an absent drive sees a zero status byte and raises no
        // interrupt.
        bus.state.lock().identify_raised_interrupt = false;
        assert!(controller.cmd_identify(1).is_none());
        assert!(!bus.state.lock().identify_raised_interrupt);
    }

    #[test]
    fn pio_read_reproduces_disk_contents() {
        crate::init();
        let bus = MockAtaBus::new(false);
        let controller = controller_with(&bus);

        let mut buffer = vec![0u8; 2 * SECTOR_LENGTH];
        controller
            .issue_command(0, AtaCommand::ReadSectors, 0, 2, 3, &mut buffer)
            .unwrap();
        let expected = &bus.state.lock().disk[3 * SECTOR_LENGTH..5 * SECTOR_LENGTH];
        assert_eq!(&buffer[..], expected);
    }

    #[test]
    fn block_device_round_trip_pio() {
        crate::init();
        crate::ipc::spawn_workers(2);

        let bus = MockAtaBus::new(false);
        let controller = controller_with(&bus);
        let drives = AtaDrive::probe_all(&controller);
        assert_eq!(drives.len(), 1);
        let drive = drives[0].clone();
        assert!(!drive.dma_supported());
        assert_eq!(drive.num_blocks(), DISK_SECTORS as u64);

        let wrapper = BlockWrapper::create(drive as Arc<dyn BlockDevice>);
        let payload: Vec<u8> = (0..SECTOR_LENGTH * 2).map(|i| (i % 255) as u8).collect();
        wrapper.write_blocks(10, 2, &payload).unwrap();

        let mut readback = vec![0u8; SECTOR_LENGTH * 2];
        wrapper.read_blocks(10, 2, &mut readback).unwrap();
        assert_eq!(readback, payload);
    }

    #[test]
    fn block_device_round_trip_dma() {
        crate::init();
        crate::ipc::spawn_workers(2);

        let bus = MockAtaBus::new(true);
        let controller = controller_with(&bus);
        let drives = AtaDrive::probe_all(&controller);
        let drive = drives[0].clone();
        assert!(drive.dma_supported());

        let wrapper = BlockWrapper::create(drive as Arc<dyn BlockDevice>);
        let payload: Vec<u8> = (0..SECTOR_LENGTH * 3).map(|i| (i * 7 % 253) as u8).collect();
        wrapper.write_blocks(5, 3, &payload).unwrap();

        // The bounce-buffer DMA path reproduces the sectors.
        let mut readback = vec![0u8; SECTOR_LENGTH * 3];
        wrapper.read_blocks(5, 3, &mut readback).unwrap();
        assert_eq!(readback, payload);

        let disk = bus.state.lock();
        assert_eq!(
            &disk.disk[5 * SECTOR_LENGTH..8 * SECTOR_LENGTH],
            &payload[..]
        );
    }

    #[test]
    fn out_of_range_requests_fail_at_queue_time() {
        crate::init();
        crate::ipc::spawn_workers(2);

        let bus = MockAtaBus::new(true);
        let controller = controller_with(&bus);
        let drive = AtaDrive::probe_all(&controller)[0].clone();
        let wrapper = BlockWrapper::create(drive as Arc<dyn BlockDevice>);

        let mut buffer = vec![0u8; SECTOR_LENGTH];
        assert_eq!(
            wrapper
                .read_blocks(DISK_SECTORS as u64 + 5, 1, &mut buffer)
                .unwrap_err(),
            Error::OutOfRange
        );
    }
}
