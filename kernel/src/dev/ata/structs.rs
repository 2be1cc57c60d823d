// SPDX-License-Identifier: MPL-2.0

//! ATA register layout, command table and identify data, per ATA8-ACS.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const SECTOR_LENGTH: usize = 512;

/// Task-file register offsets from a channel's command block base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AtaPort {
    Data = 0,
    Features = 1,
    SectorCount = 2,
    LbaLow = 3,
    LbaMid = 4,
    LbaHigh = 5,
    DriveSelect = 6,
    CommandStatus = 7,
}

bitflags::bitflags! {
    /// The ATA status byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtaStatus: u8 {
        const ERROR = 1 << 0;
        const DATA_READY = 1 << 3;
        const DRIVE_FAULT = 1 << 5;
        const DRIVE_READY = 1 << 6;
        const BUSY = 1 << 7;
    }
}

/// Bus-master register offsets (primary channel; secondary at +8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BusMasterPort {
    Command = 0,
    Status = 2,
    PrdTableAddr = 4,
}

bitflags::bitflags! {
    /// The bus-master command byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BusMasterCommand: u8 {
        const START = 1 << 0;
        /// Set for transfers from disk to memory.
        const WRITE_TO_MEMORY = 1 << 3;
    }

    /// The bus-master status byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BusMasterStatus: u8 {
        const ACTIVE = 1 << 0;
        const DMA_ERROR = 1 << 1;
        /// Write 1 to clear.
        const INTERRUPT = 1 << 2;
    }
}

/// The commands the driver issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaCommand {
    Identify,
    ReadSectors,
    ReadSectorsExt,
    WriteSectors,
    WriteSectorsExt,
    ReadDma,
    ReadDmaExt,
    WriteDma,
    WriteDmaExt,
    FlushCache,
}

/// Per-command execution properties.
#[derive(Debug, Clone, Copy)]
pub struct CommandProperties {
    pub code: u8,
    pub lba_command: bool,
    pub lba48: bool,
    pub dma: bool,
    pub reads_sectors: bool,
    pub writes_sectors: bool,
    /// Maximum sector count; zero means the count register must be zero.
    pub max_sectors: u32,
}

impl AtaCommand {
    pub fn properties(self) -> CommandProperties {
        match self {
            AtaCommand::Identify => CommandProperties {
                code: 0xEC,
                lba_command: false,
                lba48: false,
                dma: false,
                reads_sectors: true,
                writes_sectors: false,
                max_sectors: 0,
            },
            AtaCommand::ReadSectors => CommandProperties {
                code: 0x20,
                lba_command: true,
                lba48: false,
                dma: false,
                reads_sectors: true,
                writes_sectors: false,
                max_sectors: 256,
            },
            AtaCommand::ReadSectorsExt => CommandProperties {
                code: 0x24,
                lba_command: true,
                lba48: true,
                dma: false,
                reads_sectors: true,
                writes_sectors: false,
                max_sectors: 65536,
            },
            AtaCommand::WriteSectors => CommandProperties {
                code: 0x30,
                lba_command: true,
                lba48: false,
                dma: false,
                reads_sectors: false,
                writes_sectors: true,
                max_sectors: 256,
            },
            AtaCommand::WriteSectorsExt => CommandProperties {
                code: 0x34,
                lba_command: true,
                lba48: true,
                dma: false,
                reads_sectors: false,
                writes_sectors: true,
                max_sectors: 65536,
            },
            AtaCommand::ReadDma => CommandProperties {
                code: 0xC8,
                lba_command: true,
                lba48: false,
                dma: true,
                reads_sectors: true,
                writes_sectors: false,
                max_sectors: 256,
            },
            AtaCommand::ReadDmaExt => CommandProperties {
                code: 0x25,
                lba_command: true,
                lba48: true,
                dma: true,
                reads_sectors: true,
                writes_sectors: false,
                max_sectors: 65536,
            },
            AtaCommand::WriteDma => CommandProperties {
                code: 0xCA,
                lba_command: true,
                lba48: false,
                dma: true,
                reads_sectors: false,
                writes_sectors: true,
                max_sectors: 256,
            },
            AtaCommand::WriteDmaExt => CommandProperties {
                code: 0x35,
                lba_command: true,
                lba48: true,
                dma: true,
                reads_sectors: false,
                writes_sectors: true,
                max_sectors: 65536,
            },
            AtaCommand::FlushCache => CommandProperties {
                code: 0xE7,
                lba_command: false,
                lba48: false,
                dma: false,
                reads_sectors: false,
                writes_sectors: false,
                max_sectors: 0,
            },
        }
    }
}

/// The 512-byte IDENTIFY DEVICE response, viewed as its 256 little-endian
/// words.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
#[repr(C)]
pub struct IdentifyData {
    pub words: [u16; 256],
}

static_assertions::const_assert_eq!(core::mem::size_of::<IdentifyData>(), SECTOR_LENGTH);

impl IdentifyData {
    /// Word 49 bit 8: DMA supported.
    pub fn supports_dma(&self) -> bool {
        self.words[49] & (1 << 8) != 0
    }

    /// Word 83 bit 10: 48-bit addressing supported.
    pub fn supports_lba48(&self) -> bool {
        self.words[83] & (1 << 10) != 0
    }

    /// Words 60-61: addressable sectors in 28-bit mode.
    pub fn lba28_sectors(&self) -> u32 {
        (self.words[60] as u32) | ((self.words[61] as u32) << 16)
    }

    /// Words 100-103: addressable sectors in 48-bit mode.
    pub fn lba48_sectors(&self) -> u64 {
        (self.words[100] as u64)
            | ((self.words[101] as u64) << 16)
            | ((self.words[102] as u64) << 32)
            | ((self.words[103] as u64) << 48)
    }

    /// The sector count to use for block addressing.
    pub fn addressable_sectors(&self) -> u64 {
        if self.supports_lba48() {
            self.lba48_sectors()
        } else {
            self.lba28_sectors() as u64
        }
    }

    /// Words 27-46: the model string, bytes swapped per ATA8-ACS.
    pub fn model_name(&self) -> alloc::string::String {
        let mut name = alloc::string::String::new();
        for word in &self.words[27..47] {
            name.push((word >> 8) as u8 as char);
            name.push((word & 0xFF) as u8 as char);
        }
        name.trim_end().into()
    }
}

/// One bus-master physical region descriptor.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct PrdEntry {
    pub region_phys_base: u32,
    /// Zero means a full 64 KiB.
    pub byte_count: u16,
    /// Bit 15: end of table.
    pub flags: u16,
}

static_assertions::const_assert_eq!(core::mem::size_of::<PrdEntry>(), 8);

pub const PRD_END_OF_TABLE: u16 = 0x8000;
/// At most 31 PRD entries per transfer.
pub const MAX_PRD_ENTRIES: usize = 31;
/// Each PRD entry's bounce buffer is a 64 KiB region after the table's own.
pub const PRD_REGION_STRIDE: usize = 65536;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_field_decoding() {
        let mut data = IdentifyData { words: [0; 256] };
        data.words[49] = 1 << 8;
        data.words[60] = 0x5678;
        data.words[61] = 0x1234;
        assert!(data.supports_dma());
        assert!(!data.supports_lba48());
        assert_eq!(data.lba28_sectors(), 0x1234_5678);
        assert_eq!(data.addressable_sectors(), 0x1234_5678);

        data.words[83] = 1 << 10;
        data.words[100] = 0x0001;
        data.words[103] = 0x0002;
        assert!(data.supports_lba48());
        assert_eq!(data.lba48_sectors(), 0x0002_0000_0000_0001);
        assert_eq!(data.addressable_sectors(), 0x0002_0000_0000_0001);
    }

    #[test]
    fn command_codes_match_the_spec() {
        assert_eq!(AtaCommand::Identify.properties().code, 0xEC);
        assert_eq!(AtaCommand::ReadSectors.properties().code, 0x20);
        assert_eq!(AtaCommand::WriteSectors.properties().code, 0x30);
        assert_eq!(AtaCommand::ReadDma.properties().code, 0xC8);
        assert_eq!(AtaCommand::WriteDma.properties().code, 0xCA);
        assert!(AtaCommand::ReadDmaExt.properties().lba48);
        assert!(!AtaCommand::Identify.properties().lba_command);
    }
}
