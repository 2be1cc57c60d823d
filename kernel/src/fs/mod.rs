// SPDX-License-Identifier: MPL-2.0

//! Filesystem-side capability traits and the generic file-like objects.

pub mod fat;
pub mod pipe;
mod sector_file;

pub use pipe::Pipe;
pub use sector_file::SectorFile;

use crate::ipc::IoMessage;
use crate::prelude::*;

/// An object that accepts asynchronous byte-range I/O messages.
///
/// `start`/`count` in the message are byte offsets and lengths; the object
/// responds by completing the message back to its sender.
pub trait IoObject: Send + Sync {
    fn read(&self, msg: Box<IoMessage>);
    fn write(&self, msg: Box<IoMessage>);
}

/// A basic file: byte-range I/O plus a size.
pub trait BasicFile: IoObject {
    fn file_size(&self) -> Result<u64>;
    fn set_file_size(&self, size: u64) -> Result;
}
