// SPDX-License-Identifier: MPL-2.0

use super::folder::Folder;
use super::volume::{ChainIoRequest, ChainLengthRequest, FatVolume};
use crate::fs::{BasicFile, IoObject};
use crate::ipc::{self, return_io_message, IoMessage};
use crate::prelude::*;
use crate::sync::Semaphore;
use crate::tree::Leaf;

/// A file (or directory contents) on a FAT volume.
///
/// The object caches its starting cluster and current size; byte-range I/O
/// is packaged into chain requests handled by the volume.
pub struct FatFile {
    volume: Arc<FatVolume>,
    /// Weak back-reference; the root directory has no parent folder.
    parent: SpinLock<Option<Weak<Folder>>>,
    start_cluster: SpinLock<u32>,
    size: SpinLock<u64>,
    is_directory: bool,
    pub(crate) self_weak: Weak<FatFile>,
}

crate::impl_handled_object!(FatFile);

impl FatFile {
    pub(crate) fn create(
        volume: Arc<FatVolume>,
        parent: Option<Weak<Folder>>,
        start_cluster: u32,
        size: u64,
        is_directory: bool,
    ) -> Arc<FatFile> {
        Arc::new_cyclic(|weak| FatFile {
            volume,
            parent: SpinLock::new(parent),
            start_cluster: SpinLock::new(start_cluster),
            size: SpinLock::new(size),
            is_directory,
            self_weak: weak.clone(),
        })
    }

    pub fn start_cluster(&self) -> u32 {
        *self.start_cluster.lock()
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub(crate) fn volume(&self) -> &Arc<FatVolume> {
        &self.volume
    }

    fn check_range(&self, msg: &IoMessage) -> Result {
        let size = *self.size.lock();
        let end = msg.start.checked_add(msg.count).ok_or(Error::OutOfRange)?;
        if msg.start > size || msg.count > size || end > size {
            return Err(Error::OutOfRange);
        }
        Ok(())
    }

    fn start_chain_io(&self, mut msg: Box<IoMessage>) {
        if let Err(e) = self.check_range(&msg) {
            msg.response = Err(e);
            return_io_message(msg);
            return;
        }
        if msg.count == 0 {
            msg.response = Ok(());
            return_io_message(msg);
            return;
        }

        let start_cluster = *self.start_cluster.lock();
        let req = ChainIoRequest::from_io(msg, start_cluster);
        ipc::queue_message(self.volume.receiver_arc(), req);
    }
}

impl IoObject for FatFile {
    fn read(&self, msg: Box<IoMessage>) {
        self.start_chain_io(msg);
    }

    fn write(&self, msg: Box<IoMessage>) {
        // Size extension happens before data is written, via set_file_size.
        self.start_chain_io(msg);
    }
}

impl BasicFile for FatFile {
    fn file_size(&self) -> Result<u64> {
        Ok(*self.size.lock())
    }

    /// Resizes the file by asking the volume to change the chain length,
    /// then updates the directory entry through the parent folder.
    ///
    /// The FAT is left dirty; flushing to disk is an explicit volume
    /// operation.
    fn set_file_size(&self, new_size: u64) -> Result {
        let cluster_bytes = self.volume.geometry.cluster_bytes();
        let clusters_needed = if new_size == 0 {
            0
        } else {
            new_size.div_ceil(cluster_bytes) as u32
        };

        let request = {
            let start = *self.start_cluster.lock();
            ChainLengthRequest::new(start, clusters_needed)
        };
        let result_slot = request.result.clone();

        // Round-trip through the volume's mailbox, waiting on a private
        // completion semaphore.
        let semaphore = Arc::new(Semaphore::new(1, 0));
        let acquired = semaphore.timed_wait(0);
        assert!(acquired);
        let mut request = request;
        request.header.completion_semaphore = Some(semaphore.clone());
        ipc::queue_message(self.volume.receiver_arc(), request);
        semaphore.wait();
        semaphore.clear();

        let new_start = (*result_slot.lock())?;
        *self.start_cluster.lock() = new_start;
        *self.size.lock() = new_size;

        let parent = self.parent.lock().clone();
        if let Some(folder) = parent.and_then(|weak| weak.upgrade()) {
            let me = self.self_weak.upgrade().expect("file vanished");
            folder.update_child_entry(&me, new_start, new_size)?;
        }
        Ok(())
    }
}

impl Leaf for FatFile {
    fn as_file(self: Arc<Self>) -> Option<Arc<dyn BasicFile>> {
        Some(self)
    }
}
