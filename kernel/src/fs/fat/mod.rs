// SPDX-License-Identifier: MPL-2.0

//! The FAT12/16/32 filesystem, layered over the message core and the block
//! wrappers.

mod file;
mod folder;
pub mod structs;
pub mod table;
mod volume;

pub use file::FatFile;
pub use folder::Folder;
pub use structs::FatType;
pub use table::FatEntry;
pub use volume::{ChainIoRequest, ChainLengthRequest, FatVolume, NextClusterRequest};

use crate::block::BlockDevice;
use crate::prelude::*;

/// Mounts the FAT filesystem on `storage`; the returned volume is a System
/// Tree branch rooted at the volume's root directory.
pub fn mount(storage: Arc<dyn BlockDevice>) -> Result<Arc<FatVolume>> {
    FatVolume::mount(storage)
}
