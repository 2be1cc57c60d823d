// SPDX-License-Identifier: MPL-2.0

//! The FAT volume object.
//!
//! The volume owns the cached BPB geometry and the in-memory FAT, acts as
//! the message receiver for chain I/O, and is a System Tree branch that
//! delegates to the root folder.

use super::file::FatFile;
use super::folder::Folder;
use super::structs::{
    determine_fat_type, Fat32Tail, FatType, GenericBpb, SECTOR_SIZE,
};
use super::table::{FatEntry, FatTable};
use crate::block::{queue_block_io, BlockDevice, BlockWrapper};
use crate::ipc::{
    self, convert_message, return_io_message, shared_buffer, IoMessage, IoRequest, Mailbox,
    Message, MessageHeader, MessageReceiver, SharedBuffer, SM_FAT_CALC_NEXT_CLUSTER,
    SM_FAT_CHAIN_IO, SM_FAT_CHANGE_CHAIN_LEN, SM_IO_COMPLETE,
};
use crate::prelude::*;
use crate::tree::{Branch, Leaf};
use zerocopy::FromBytes;

/// Volume geometry distilled from the BPB.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub num_fats: u32,
    pub fat_size_sectors: u32,
    pub root_dir_start_sector: u32,
    pub root_dir_sector_count: u32,
    pub first_data_sector: u32,
    pub root_cluster: u32,
    pub cluster_count: u32,
}

impl Geometry {
    pub fn cluster_bytes(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// First disk sector of a data cluster.
    pub fn cluster_to_sector(&self, cluster: u32) -> u64 {
        self.first_data_sector as u64
            + (cluster as u64 - super::table::FIRST_DATA_CLUSTER as u64)
                * self.sectors_per_cluster as u64
    }
}

/// A byte-range request against a cluster chain.
///
/// Carries the original I/O message it was built from; the volume completes
/// that message back to the original sender once the whole range has been
/// transferred.
pub struct ChainIoRequest {
    pub header: MessageHeader,
    pub request: IoRequest,
    /// Byte offset within the chain.
    pub start: u64,
    /// Byte count.
    pub count: u64,
    pub buffer: SharedBuffer,
    pub start_cluster: u32,
    /// Progress: the cluster currently being transferred.
    pub current_cluster: u32,
    pub bytes_done: u64,
    /// Set while a partial-cluster write is waiting for its merge read.
    pub merging: bool,
    pub original: Option<Box<IoMessage>>,
}

crate::impl_message!(ChainIoRequest);

impl ChainIoRequest {
    pub fn from_io(msg: Box<IoMessage>, start_cluster: u32) -> Box<ChainIoRequest> {
        Box::new(ChainIoRequest {
            header: MessageHeader::new(SM_FAT_CHAIN_IO),
            request: msg.request,
            start: msg.start,
            count: msg.count,
            buffer: msg.buffer.clone(),
            start_cluster,
            current_cluster: 0,
            bytes_done: 0,
            merging: false,
            original: Some(msg),
        })
    }
}

/// Asks the volume to grow or shrink a cluster chain.
pub struct ChainLengthRequest {
    pub header: MessageHeader,
    /// Zero means "no chain yet".
    pub start_cluster: u32,
    pub new_length_clusters: u32,
    /// Receives the (possibly new) first cluster of the chain.
    pub result: Arc<SpinLock<Result<u32>>>,
}

crate::impl_message!(ChainLengthRequest);

impl ChainLengthRequest {
    pub fn new(start_cluster: u32, new_length_clusters: u32) -> Box<ChainLengthRequest> {
        Box::new(ChainLengthRequest {
            header: MessageHeader::new(SM_FAT_CHANGE_CHAIN_LEN),
            start_cluster,
            new_length_clusters,
            result: Arc::new(SpinLock::new(Err(Error::Unknown))),
        })
    }
}

/// Asks the volume for the FAT entry following a cluster.
pub struct NextClusterRequest {
    pub header: MessageHeader,
    pub cluster: u32,
    pub result: Arc<SpinLock<Result<FatEntry>>>,
}

crate::impl_message!(NextClusterRequest);

impl NextClusterRequest {
    pub fn new(cluster: u32) -> Box<NextClusterRequest> {
        Box::new(NextClusterRequest {
            header: MessageHeader::new(SM_FAT_CALC_NEXT_CLUSTER),
            cluster,
            result: Arc::new(SpinLock::new(Err(Error::Unknown))),
        })
    }
}

/// A mounted FAT12/16/32 volume.
pub struct FatVolume {
    mailbox: Mailbox,
    storage: Arc<dyn BlockDevice>,
    /// Synchronous path, used at mount time and for FAT flushes.
    wrapper: Arc<BlockWrapper>,
    fat_type: FatType,
    pub(crate) geometry: Geometry,
    /// The filesystem general lock: all FAT-table reads and mutations
    /// serialize here.
    table: SpinLock<FatTable>,
    root: spin::Once<Arc<Folder>>,
    pub(crate) self_weak: Weak<FatVolume>,
}

crate::impl_handled_object!(FatVolume);

impl FatVolume {
    /// Mounts the filesystem found on `storage`.
    ///
    /// Reads the BPB, loads the FAT and scans the root directory; the work
    /// queue must be running.
    pub fn mount(storage: Arc<dyn BlockDevice>) -> Result<Arc<FatVolume>> {
        if storage.block_size() != SECTOR_SIZE as u64 || storage.num_blocks() == 0 {
            return Err(Error::DeviceFailed);
        }
        let wrapper = BlockWrapper::create(storage.clone());

        let mut boot_sector = [0u8; SECTOR_SIZE];
        wrapper.read_blocks(0, 1, &mut boot_sector)?;

        let bpb = GenericBpb::read_from_bytes(&boot_sector[..36])
            .map_err(|_| Error::StorageError)?;
        let fat32_tail = Fat32Tail::read_from_bytes(&boot_sector[36..90])
            .map_err(|_| Error::StorageError)?;

        if bpb.bytes_per_sec as usize != SECTOR_SIZE || bpb.secs_per_cluster == 0 {
            return Err(Error::StorageError);
        }

        let (fat_type, cluster_count) = determine_fat_type(&bpb, fat32_tail.fat_size_32);

        let fat_size_sectors = if bpb.fat_size_16 != 0 {
            bpb.fat_size_16 as u32
        } else {
            fat32_tail.fat_size_32
        };
        let root_dir_sector_count = ((bpb.root_entry_cnt as u32 * 32)
            + (bpb.bytes_per_sec as u32 - 1))
            / bpb.bytes_per_sec as u32;
        let root_dir_start_sector =
            bpb.rsvd_sec_cnt as u32 + bpb.num_fats as u32 * fat_size_sectors;
        let first_data_sector = root_dir_start_sector + root_dir_sector_count;

        let geometry = Geometry {
            bytes_per_sector: bpb.bytes_per_sec as u32,
            sectors_per_cluster: bpb.secs_per_cluster as u32,
            reserved_sectors: bpb.rsvd_sec_cnt as u32,
            num_fats: bpb.num_fats as u32,
            fat_size_sectors,
            root_dir_start_sector,
            root_dir_sector_count,
            first_data_sector,
            root_cluster: match fat_type {
                FatType::Fat32 => fat32_tail.root_cluster,
                _ => 0,
            },
            cluster_count: cluster_count as u32,
        };

        // The whole FAT is kept in memory for chain walking.
        let fat_bytes = fat_size_sectors as usize * SECTOR_SIZE;
        let mut raw_fat = vec![0u8; fat_bytes];
        wrapper.read_blocks(
            bpb.rsvd_sec_cnt as u64,
            fat_size_sectors as u64,
            &mut raw_fat,
        )?;

        let volume = Arc::new_cyclic(|weak| FatVolume {
            mailbox: Mailbox::new(),
            storage,
            wrapper,
            fat_type,
            geometry,
            table: SpinLock::new(FatTable::new(fat_type, raw_fat, cluster_count as u32)),
            root: spin::Once::new(),
            self_weak: weak.clone(),
        });

        volume.init_root_folder()?;
        log::info!(
            "mounted {:?} volume: {} clusters of {} bytes",
            fat_type,
            geometry.cluster_count,
            geometry.cluster_bytes()
        );
        Ok(volume)
    }

    fn init_root_folder(&self) -> Result {
        let me = self.self_weak.upgrade().expect("volume vanished");
        let underlying: Arc<dyn crate::fs::BasicFile> = match self.fat_type {
            FatType::Fat12 | FatType::Fat16 => crate::fs::SectorFile::create(
                self.storage.clone(),
                self.geometry.root_dir_start_sector as u64,
                self.geometry.root_dir_sector_count as u64,
            ),
            FatType::Fat32 => {
                let clusters = self.chain_length(self.geometry.root_cluster)?;
                FatFile::create(
                    me.clone(),
                    None,
                    self.geometry.root_cluster,
                    clusters as u64 * self.geometry.cluster_bytes(),
                    true,
                )
            }
        };
        let folder = Folder::create(underlying, me)?;
        self.root.call_once(|| folder);
        Ok(())
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub(crate) fn root_folder(&self) -> &Arc<Folder> {
        self.root.get().expect("volume mounted without a root")
    }

    pub fn receiver_arc(&self) -> Arc<dyn MessageReceiver> {
        self.self_weak.upgrade().expect("volume vanished")
    }

    // ---- Synchronous FAT helpers; all take the general lock. ----

    pub(crate) fn next_cluster(&self, cluster: u32) -> Result<FatEntry> {
        self.table.lock().entry(cluster)
    }

    /// Follows the chain `steps` links from `start`.
    pub(crate) fn walk_chain(&self, start: u32, steps: u32) -> Result<u32> {
        let table = self.table.lock();
        let mut cluster = start;
        for _ in 0..steps {
            match table.entry(cluster)? {
                FatEntry::Next(next) => cluster = next,
                _ => return Err(Error::StorageError),
            }
        }
        Ok(cluster)
    }

    /// Number of clusters in the chain starting at `start` (zero for no
    /// chain).
    pub(crate) fn chain_length(&self, start: u32) -> Result<u32> {
        if start == 0 {
            return Ok(0);
        }
        let table = self.table.lock();
        let mut cluster = start;
        let mut count = 1u32;
        loop {
            match table.entry(cluster)? {
                FatEntry::Next(next) => {
                    cluster = next;
                    count += 1;
                    if count > table.cluster_count() {
                        return Err(Error::StorageError);
                    }
                }
                FatEntry::EndOfChain => return Ok(count),
                _ => return Err(Error::StorageError),
            }
        }
    }

    /// Grows or shrinks a chain to `new_length` clusters; free clusters are
    /// chosen first-fit from the start of the FAT. Returns the chain's
    /// (possibly changed) first cluster; zero when shrunk away entirely.
    pub(crate) fn resize_chain(&self, start: u32, new_length: u32) -> Result<u32> {
        let mut table = self.table.lock();

        let mut chain = Vec::new();
        if start != 0 {
            let mut cluster = start;
            loop {
                chain.push(cluster);
                match table.entry(cluster)? {
                    FatEntry::Next(next) => cluster = next,
                    FatEntry::EndOfChain => break,
                    _ => return Err(Error::StorageError),
                }
                if chain.len() > table.cluster_count() as usize {
                    return Err(Error::StorageError);
                }
            }
        }

        let current = chain.len() as u32;
        if new_length > current {
            for _ in current..new_length {
                let fresh = table.find_free(0).ok_or(Error::StorageError)?;
                table.set_entry(fresh, FatEntry::EndOfChain)?;
                if let Some(&tail) = chain.last() {
                    table.set_entry(tail, FatEntry::Next(fresh))?;
                }
                chain.push(fresh);
            }
        } else if new_length < current {
            for &cluster in &chain[new_length as usize..] {
                table.set_entry(cluster, FatEntry::Free)?;
            }
            chain.truncate(new_length as usize);
            if let Some(&tail) = chain.last() {
                table.set_entry(tail, FatEntry::EndOfChain)?;
            }
        }

        Ok(chain.first().copied().unwrap_or(0))
    }

    /// Writes the dirty FAT back to every FAT copy on disk.
    pub fn flush_fat(&self) -> Result {
        let raw = {
            let mut table = self.table.lock();
            if !table.is_dirty() {
                return Ok(());
            }
            let copy = table.raw().to_vec();
            table.clear_dirty();
            copy
        };

        for fat_index in 0..self.geometry.num_fats {
            let first_sector = self.geometry.reserved_sectors
                + fat_index * self.geometry.fat_size_sectors;
            self.wrapper.write_blocks(
                first_sector as u64,
                self.geometry.fat_size_sectors as u64,
                &raw,
            )?;
        }
        Ok(())
    }

    // ---- Chain I/O handling (runs on worker threads). ----

    fn handle_chain_io(&self, mut req: Box<ChainIoRequest>) {
        if req.count == 0 {
            self.finish_chain_io(req, Ok(()));
            return;
        }

        let cluster_bytes = self.geometry.cluster_bytes();
        let skip = (req.start / cluster_bytes) as u32;
        match self.walk_chain(req.start_cluster, skip) {
            Ok(cluster) => {
                req.current_cluster = cluster;
                self.issue_cluster_io(req);
            }
            Err(e) => self.finish_chain_io(req, Err(e)),
        }
    }

    /// The byte window of the in-progress cluster: offset inside the cluster
    /// and length to transfer.
    fn window(&self, req: &ChainIoRequest) -> (u64, u64) {
        let cluster_bytes = self.geometry.cluster_bytes();
        let pos = req.start + req.bytes_done;
        let in_off = pos % cluster_bytes;
        let len = (cluster_bytes - in_off).min(req.count - req.bytes_done);
        (in_off, len)
    }

    fn issue_cluster_io(&self, mut req: Box<ChainIoRequest>) {
        let cluster_bytes = self.geometry.cluster_bytes();
        let (in_off, len) = self.window(&req);
        let sector = self.geometry.cluster_to_sector(req.current_cluster);
        let temp = shared_buffer(cluster_bytes as usize);

        let nested_request = match req.request {
            IoRequest::Read => IoRequest::Read,
            IoRequest::Write => {
                if in_off == 0 && len == cluster_bytes {
                    // Whole cluster: copy straight from the caller's buffer.
                    let done = req.bytes_done as usize;
                    temp.lock()
                        .copy_from_slice(&req.buffer.lock()[done..done + len as usize]);
                    IoRequest::Write
                } else {
                    // Partial cluster: fetch it first, merge, then write.
                    req.merging = true;
                    IoRequest::Read
                }
            }
            IoRequest::Invalid => {
                self.finish_chain_io(req, Err(Error::InvalidParam));
                return;
            }
        };

        let mut nested = IoMessage::new(
            nested_request,
            sector,
            self.geometry.sectors_per_cluster as u64,
            temp,
            Some(self.self_weak.clone() as Weak<dyn MessageReceiver>),
        );
        nested.parent = Some(req);
        queue_block_io(&*self.storage, nested);
    }

    fn handle_io_complete(&self, mut msg: Box<IoMessage>) {
        let parent = msg.parent.take().expect("completion without parent request");
        let Some(mut req) = convert_message::<ChainIoRequest>(parent) else {
            return;
        };

        if let Err(e) = msg.response {
            self.finish_chain_io(req, Err(e));
            return;
        }

        let (in_off, len) = self.window(&req);
        match req.request {
            IoRequest::Read => {
                let done = req.bytes_done as usize;
                req.buffer.lock()[done..done + len as usize].copy_from_slice(
                    &msg.buffer.lock()[in_off as usize..(in_off + len) as usize],
                );
                self.advance_chain_io(req);
            }
            IoRequest::Write if req.merging => {
                // The merge read came back; lay our bytes over it and write
                // the cluster out.
                req.merging = false;
                {
                    let done = req.bytes_done as usize;
                    let mut cluster_img = msg.buffer.lock();
                    cluster_img[in_off as usize..(in_off + len) as usize]
                        .copy_from_slice(&req.buffer.lock()[done..done + len as usize]);
                }
                let sector = self.geometry.cluster_to_sector(req.current_cluster);
                let mut nested = IoMessage::new(
                    IoRequest::Write,
                    sector,
                    self.geometry.sectors_per_cluster as u64,
                    msg.buffer.clone(),
                    Some(self.self_weak.clone() as Weak<dyn MessageReceiver>),
                );
                nested.parent = Some(req);
                queue_block_io(&*self.storage, nested);
            }
            IoRequest::Write => self.advance_chain_io(req),
            IoRequest::Invalid => self.finish_chain_io(req, Err(Error::InvalidParam)),
        }
    }

    fn advance_chain_io(&self, mut req: Box<ChainIoRequest>) {
        let (_, len) = self.window(&req);
        req.bytes_done += len;
        if req.bytes_done == req.count {
            self.finish_chain_io(req, Ok(()));
            return;
        }

        match self.next_cluster(req.current_cluster) {
            Ok(FatEntry::Next(next)) => {
                req.current_cluster = next;
                self.issue_cluster_io(req);
            }
            Ok(_) => self.finish_chain_io(req, Err(Error::StorageError)),
            Err(e) => self.finish_chain_io(req, Err(e)),
        }
    }

    fn finish_chain_io(&self, mut req: Box<ChainIoRequest>, result: Result) {
        if let Some(mut original) = req.original.take() {
            original.response = result;
            return_io_message(original);
        }
    }
}

impl MessageReceiver for FatVolume {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn handle_message(&self, msg: Box<dyn Message>) {
        match msg.header().id {
            SM_FAT_CHAIN_IO => {
                if let Some(req) = convert_message::<ChainIoRequest>(msg) {
                    self.handle_chain_io(req);
                }
            }
            SM_IO_COMPLETE => {
                if let Some(io) = convert_message::<IoMessage>(msg) {
                    self.handle_io_complete(io);
                }
            }
            SM_FAT_CHANGE_CHAIN_LEN => {
                if let Some(req) = convert_message::<ChainLengthRequest>(msg) {
                    *req.result.lock() =
                        self.resize_chain(req.start_cluster, req.new_length_clusters);
                }
            }
            SM_FAT_CALC_NEXT_CLUSTER => {
                if let Some(req) = convert_message::<NextClusterRequest>(msg) {
                    *req.result.lock() = self.next_cluster(req.cluster);
                }
            }
            other => ipc::unknown_message(other),
        }
    }
}

impl Leaf for FatVolume {
    fn as_branch(self: Arc<Self>) -> Option<Arc<dyn Branch>> {
        Some(self)
    }

    fn as_receiver(self: Arc<Self>) -> Option<Arc<dyn MessageReceiver>> {
        Some(self)
    }
}

impl Branch for FatVolume {
    fn get_child(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        self.root_folder().get_child(name)
    }

    fn add_child(&self, name: &str, child: Arc<dyn Leaf>) -> Result {
        self.root_folder().add_child(name, child)
    }

    fn create_child(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        self.root_folder().create_child(name)
    }

    fn rename_child(&self, old_name: &str, new_name: &str) -> Result {
        self.root_folder().rename_child(old_name, new_name)
    }

    fn delete_child(&self, name: &str) -> Result {
        self.root_folder().delete_child(name)
    }

    fn num_children(&self) -> Result<u64> {
        self.root_folder().num_children()
    }

    fn enum_children(&self, start_from: &str, max_count: u64) -> Result<Vec<String>> {
        self.root_folder().enum_children(start_from, max_count)
    }
}
