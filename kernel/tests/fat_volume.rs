// SPDX-License-Identifier: MPL-2.0

//! FAT filesystem scenarios over a RAM disk: reading prebuilt volumes,
//! writing, renaming and deleting, and remounting to check persistence.

use std::sync::Arc;

use azalea_kernel::block::{BlockDevice, FileWrapper, RamDisk};
use azalea_kernel::error::Error;
use azalea_kernel::fs::fat::structs::FatType;
use azalea_kernel::fs::fat::table::{FatEntry, FatTable};
use azalea_kernel::fs::fat::{self, FatVolume};
use azalea_kernel::fs::BasicFile;
use azalea_kernel::tree::{Branch, Leaf};

const SECTOR: usize = 512;

fn setup() {
    azalea_kernel::init();
    azalea_kernel::ipc::spawn_workers(3);
}

fn short_entry(name: [u8; 11], attributes: u8, first_cluster: u16, size: u32) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[..11].copy_from_slice(&name);
    entry[11] = attributes;
    entry[26..28].copy_from_slice(&first_cluster.to_le_bytes());
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    entry
}

const ATTR_ARCHIVE: u8 = 0x20;
const ATTR_DIRECTORY: u8 = 0x10;

/// Builds a FAT16 volume image: 1 reserved sector, two 17-sector FATs, a
/// 32-sector root directory (512 entries) and 4200 data sectors of one
/// sector per cluster.
struct Fat16Builder {
    image: Vec<u8>,
    table: FatTable,
    next_cluster: u32,
    root_entries_used: usize,
}

impl Fat16Builder {
    const RESERVED: usize = 1;
    const FAT_SECTORS: usize = 17;
    const ROOT_ENTRIES: usize = 512;
    const ROOT_SECTORS: usize = Self::ROOT_ENTRIES * 32 / SECTOR;
    const DATA_SECTORS: usize = 4200;
    const ROOT_START: usize = Self::RESERVED + 2 * Self::FAT_SECTORS;
    const FIRST_DATA: usize = Self::ROOT_START + Self::ROOT_SECTORS;
    const TOTAL: usize = Self::FIRST_DATA + Self::DATA_SECTORS;

    fn new() -> Fat16Builder {
        let mut image = vec![0u8; Self::TOTAL * SECTOR];

        // The BPB.
        image[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        image[3..11].copy_from_slice(b"AZALEA  ");
        image[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        image[13] = 1; // sectors per cluster
        image[14..16].copy_from_slice(&(Self::RESERVED as u16).to_le_bytes());
        image[16] = 2; // FAT copies
        image[17..19].copy_from_slice(&(Self::ROOT_ENTRIES as u16).to_le_bytes());
        image[19..21].copy_from_slice(&(Self::TOTAL as u16).to_le_bytes());
        image[21] = 0xF8;
        image[22..24].copy_from_slice(&(Self::FAT_SECTORS as u16).to_le_bytes());
        image[24..26].copy_from_slice(&63u16.to_le_bytes());
        image[26..28].copy_from_slice(&16u16.to_le_bytes());
        image[38] = 0x29;
        image[43..54].copy_from_slice(b"AZALEA TEST");
        image[54..62].copy_from_slice(b"FAT16   ");
        image[510] = 0x55;
        image[511] = 0xAA;

        Fat16Builder {
            image,
            table: FatTable::new(
                FatType::Fat16,
                vec![0u8; Self::FAT_SECTORS * SECTOR],
                Self::DATA_SECTORS as u32,
            ),
            next_cluster: 2,
            root_entries_used: 0,
        }
    }

    fn allocate_chain(&mut self, content: &[u8]) -> u16 {
        if content.is_empty() {
            return 0;
        }
        let clusters = content.len().div_ceil(SECTOR) as u32;
        let first = self.next_cluster;
        for i in 0..clusters {
            let cluster = self.next_cluster;
            self.next_cluster += 1;
            let sector = Self::FIRST_DATA + (cluster as usize - 2);
            let from = i as usize * SECTOR;
            let len = (content.len() - from).min(SECTOR);
            self.image[sector * SECTOR..sector * SECTOR + len]
                .copy_from_slice(&content[from..from + len]);
            let entry = if i == clusters - 1 {
                FatEntry::EndOfChain
            } else {
                FatEntry::Next(cluster + 1)
            };
            self.table.set_entry(cluster, entry).unwrap();
        }
        first as u16
    }

    fn add_root_entry(&mut self, entry: [u8; 32]) {
        let offset = Self::ROOT_START * SECTOR + self.root_entries_used * 32;
        self.image[offset..offset + 32].copy_from_slice(&entry);
        self.root_entries_used += 1;
    }

    fn add_file(&mut self, name: [u8; 11], content: &[u8]) {
        let first = self.allocate_chain(content);
        self.add_root_entry(short_entry(name, ATTR_ARCHIVE, first, content.len() as u32));
    }

    fn add_directory(&mut self, name: [u8; 11], files: &[([u8; 11], &[u8])]) {
        let mut dir_content = vec![0u8; SECTOR];
        for (i, (child_name, child_content)) in files.iter().enumerate() {
            let first = self.allocate_chain(child_content);
            let entry = short_entry(*child_name, ATTR_ARCHIVE, first, child_content.len() as u32);
            dir_content[i * 32..(i + 1) * 32].copy_from_slice(&entry);
        }
        let dir_first = self.allocate_chain(&dir_content);
        self.add_root_entry(short_entry(name, ATTR_DIRECTORY, dir_first, 0));
    }

    fn build(mut self) -> Arc<RamDisk> {
        for copy in 0..2usize {
            let at = (Self::RESERVED + copy * Self::FAT_SECTORS) * SECTOR;
            self.image[at..at + self.table.raw().len()].copy_from_slice(self.table.raw());
        }
        RamDisk::create_from_image(&self.image, SECTOR as u64).unwrap()
    }
}

fn mount_basic_volume() -> (Arc<RamDisk>, Arc<FatVolume>) {
    let mut builder = Fat16Builder::new();
    builder.add_file(*b"TESTREADTXT", b"This is a test.");

    let big: Vec<u8> = (0..1792u32).map(|i| (i % 247) as u8).collect();
    builder.add_file(*b"BIGFILE BIN", &big);

    builder.add_directory(*b"SUBDIR     ", &[(*b"INNER   TXT", b"inner file data")]);

    let disk = builder.build();
    let volume = fat::mount(disk.clone() as Arc<dyn BlockDevice>).unwrap();
    (disk, volume)
}

fn open_file(volume: &Arc<FatVolume>, name: &str) -> Arc<FileWrapper> {
    let leaf = volume.get_child(name).unwrap();
    let file = leaf.as_file().expect("leaf is a file");
    FileWrapper::create(file)
}

#[test]
fn reads_a_known_file() {
    setup();
    let (_disk, volume) = mount_basic_volume();
    assert_eq!(volume.fat_type(), FatType::Fat16);

    let file = open_file(&volume, "TESTREAD.TXT");
    assert_eq!(file.file_size().unwrap(), 15);

    let mut buffer = [0u8; 15];
    let read = file.read_bytes(0, 15, &mut buffer).unwrap();
    assert_eq!(read, 15);
    assert_eq!(&buffer, b"This is a test.");
}

#[test]
fn reads_across_cluster_boundaries() {
    setup();
    let (_disk, volume) = mount_basic_volume();
    let file = open_file(&volume, "BIGFILE.BIN");
    assert_eq!(file.file_size().unwrap(), 1792);

    let expected: Vec<u8> = (0..1792u32).map(|i| (i % 247) as u8).collect();

    let mut all = vec![0u8; 1792];
    file.read_bytes(0, 1792, &mut all).unwrap();
    assert_eq!(all, expected);

    // A window straddling two cluster boundaries.
    let mut window = vec![0u8; 600];
    file.read_bytes(500, 600, &mut window).unwrap();
    assert_eq!(window, expected[500..1100]);

    // Reads past the end are refused.
    let mut beyond = vec![0u8; 16];
    assert_eq!(
        file.read_bytes(1790, 16, &mut beyond).unwrap_err(),
        Error::OutOfRange
    );
}

#[test]
fn resolves_subdirectories() {
    setup();
    let (_disk, volume) = mount_basic_volume();

    let file = open_file(&volume, "SUBDIR\\INNER.TXT");
    let mut buffer = vec![0u8; 15];
    file.read_bytes(0, 15, &mut buffer).unwrap();
    assert_eq!(&buffer, b"inner file data");

    assert_eq!(
        volume.get_child("SUBDIR\\MISSING.TXT").unwrap_err(),
        Error::NotFound
    );
}

#[test]
fn enumerates_the_root() {
    setup();
    let (_disk, volume) = mount_basic_volume();

    assert_eq!(volume.num_children().unwrap(), 3);
    let names = volume.enum_children("", 0).unwrap();
    assert_eq!(names, ["BIGFILE.BIN", "SUBDIR", "TESTREAD.TXT"]);
    assert_eq!(volume.enum_children("S", 1).unwrap(), ["SUBDIR"]);
}

#[test]
fn writes_survive_a_remount() {
    setup();
    let (disk, volume) = mount_basic_volume();

    // A lowercase name forces a long-name chain in front of the 8.3 alias.
    let created = volume.create_child("written-data.txt").unwrap();
    let file = created.as_file().unwrap();
    let payload: Vec<u8> = (0..1300u32).map(|i| (i * 3 % 241) as u8).collect();
    file.set_file_size(payload.len() as u64).unwrap();

    let wrapper = FileWrapper::create(file);
    let written = wrapper
        .write_bytes(0, payload.len() as u64, &payload)
        .unwrap();
    assert_eq!(written, payload.len() as u64);

    let mut readback = vec![0u8; payload.len()];
    wrapper.read_bytes(0, payload.len() as u64, &mut readback).unwrap();
    assert_eq!(readback, payload);

    volume.flush_fat().unwrap();

    // A second mount sees the same bytes from disk.
    let remounted = fat::mount(disk as Arc<dyn BlockDevice>).unwrap();
    let file = open_file(&remounted, "written-data.txt");
    assert_eq!(file.file_size().unwrap(), payload.len() as u64);
    let mut persisted = vec![0u8; payload.len()];
    file.read_bytes(0, payload.len() as u64, &mut persisted).unwrap();
    assert_eq!(persisted, payload);
}

#[test]
fn rename_round_trip() {
    setup();
    let (disk, volume) = mount_basic_volume();

    volume.rename_child("TESTREAD.TXT", "RENAMED.TXT").unwrap();
    assert_eq!(
        volume.get_child("TESTREAD.TXT").unwrap_err(),
        Error::NotFound
    );
    let file = open_file(&volume, "RENAMED.TXT");
    let mut buffer = [0u8; 15];
    file.read_bytes(0, 15, &mut buffer).unwrap();
    assert_eq!(&buffer, b"This is a test.");

    volume.flush_fat().unwrap();
    let remounted = fat::mount(disk as Arc<dyn BlockDevice>).unwrap();
    assert!(remounted.get_child("RENAMED.TXT").is_ok());
    assert_eq!(
        remounted.get_child("TESTREAD.TXT").unwrap_err(),
        Error::NotFound
    );
}

#[test]
fn deleted_children_disappear() {
    setup();
    let (disk, volume) = mount_basic_volume();

    volume.delete_child("BIGFILE.BIN").unwrap();
    assert_eq!(
        volume.get_child("BIGFILE.BIN").unwrap_err(),
        Error::NotFound
    );
    assert!(!volume
        .enum_children("", 0)
        .unwrap()
        .contains(&"BIGFILE.BIN".to_string()));

    volume.flush_fat().unwrap();
    let remounted = fat::mount(disk as Arc<dyn BlockDevice>).unwrap();
    assert_eq!(
        remounted.get_child("BIGFILE.BIN").unwrap_err(),
        Error::NotFound
    );
}

/// A minimal FAT12 floppy-style volume: 1 reserved sector, two 2-sector
/// FATs, a 4-sector root (64 entries), 512 data sectors.
#[test]
fn fat12_volumes_mount_and_read() {
    setup();

    const RESERVED: usize = 1;
    const FAT_SECTORS: usize = 2;
    const ROOT_ENTRIES: usize = 64;
    const ROOT_SECTORS: usize = ROOT_ENTRIES * 32 / SECTOR;
    const DATA_SECTORS: usize = 512;
    const ROOT_START: usize = RESERVED + 2 * FAT_SECTORS;
    const FIRST_DATA: usize = ROOT_START + ROOT_SECTORS;
    const TOTAL: usize = FIRST_DATA + DATA_SECTORS;

    let mut image = vec![0u8; TOTAL * SECTOR];
    image[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    image[3..11].copy_from_slice(b"AZALEA  ");
    image[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    image[13] = 1;
    image[14..16].copy_from_slice(&(RESERVED as u16).to_le_bytes());
    image[16] = 2;
    image[17..19].copy_from_slice(&(ROOT_ENTRIES as u16).to_le_bytes());
    image[19..21].copy_from_slice(&(TOTAL as u16).to_le_bytes());
    image[21] = 0xF0;
    image[22..24].copy_from_slice(&(FAT_SECTORS as u16).to_le_bytes());
    image[38] = 0x29;
    image[43..54].copy_from_slice(b"AZALEA FLP ");
    image[54..62].copy_from_slice(b"FAT12   ");
    image[510] = 0x55;
    image[511] = 0xAA;

    // A three-cluster file to exercise the 12-bit chain packing.
    let content: Vec<u8> = (0..1400u32).map(|i| (i % 239) as u8).collect();
    let mut table = FatTable::new(
        FatType::Fat12,
        vec![0u8; FAT_SECTORS * SECTOR],
        DATA_SECTORS as u32,
    );
    for cluster in 2..5u32 {
        let sector = FIRST_DATA + cluster as usize - 2;
        let from = (cluster as usize - 2) * SECTOR;
        let len = (content.len() - from).min(SECTOR);
        image[sector * SECTOR..sector * SECTOR + len]
            .copy_from_slice(&content[from..from + len]);
        let entry = if cluster == 4 {
            FatEntry::EndOfChain
        } else {
            FatEntry::Next(cluster + 1)
        };
        table.set_entry(cluster, entry).unwrap();
    }
    for copy in 0..2usize {
        let at = (RESERVED + copy * FAT_SECTORS) * SECTOR;
        image[at..at + table.raw().len()].copy_from_slice(table.raw());
    }
    let entry = short_entry(*b"FLOPPY  DAT", ATTR_ARCHIVE, 2, content.len() as u32);
    image[ROOT_START * SECTOR..ROOT_START * SECTOR + 32].copy_from_slice(&entry);

    let disk = RamDisk::create_from_image(&image, SECTOR as u64).unwrap();
    let volume = fat::mount(disk as Arc<dyn BlockDevice>).unwrap();
    assert_eq!(volume.fat_type(), FatType::Fat12);

    let file = open_file(&volume, "FLOPPY.DAT");
    let mut buffer = vec![0u8; content.len()];
    file.read_bytes(0, content.len() as u64, &mut buffer).unwrap();
    assert_eq!(buffer, content);
}
