// SPDX-License-Identifier: MPL-2.0

//! The per-handle object state behind the object system calls.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::block::FileWrapper;
use crate::prelude::*;
use crate::tree::{self, Branch, Leaf};

/// What a handle opened through the object system calls refers to: the tree
/// object plus the handle-local seek position.
pub struct ObjectHandle {
    leaf: Arc<dyn Leaf>,
    position: AtomicU64,
    wrapper: spin::Once<Arc<FileWrapper>>,
}

crate::impl_handled_object!(ObjectHandle);

/// Properties reported by the get-properties system call.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct ObjectProperties {
    pub is_branch: u64,
    pub is_file: u64,
    pub size: u64,
}

impl ObjectHandle {
    pub fn open(path: &str) -> Result<Arc<ObjectHandle>> {
        let leaf = tree::root().get_child(path)?;
        Ok(Self::wrap(leaf))
    }

    pub fn create(path: &str) -> Result<Arc<ObjectHandle>> {
        let leaf = tree::root().create_child(path)?;
        Ok(Self::wrap(leaf))
    }

    fn wrap(leaf: Arc<dyn Leaf>) -> Arc<ObjectHandle> {
        Arc::new(ObjectHandle {
            leaf,
            position: AtomicU64::new(0),
            wrapper: spin::Once::new(),
        })
    }

    pub fn leaf(&self) -> &Arc<dyn Leaf> {
        &self.leaf
    }

    fn as_branch(&self) -> Result<Arc<dyn Branch>> {
        self.leaf.clone().as_branch().ok_or(Error::InvalidOp)
    }

    fn file_wrapper(&self) -> Result<&Arc<FileWrapper>> {
        let file = self.leaf.clone().as_file().ok_or(Error::InvalidOp)?;
        Ok(self.wrapper.call_once(|| FileWrapper::create(file)))
    }

    pub fn seek(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Reads from the current position, clamped to the data length, and
    /// advances it. Returns the bytes transferred.
    pub fn read(&self, buffer: &mut [u8]) -> Result<u64> {
        let wrapper = self.file_wrapper()?;
        let size = wrapper.file_size()?;
        let position = self.position();
        if position >= size {
            return Ok(0);
        }
        let length = (buffer.len() as u64).min(size - position);
        let read = wrapper.read_bytes(position, length, buffer)?;
        self.position.fetch_add(read, Ordering::Relaxed);
        Ok(read)
    }

    /// Writes at the current position, extending the data length first when
    /// needed, and advances the position.
    pub fn write(&self, buffer: &[u8]) -> Result<u64> {
        let wrapper = self.file_wrapper()?;
        let position = self.position();
        let end = position
            .checked_add(buffer.len() as u64)
            .ok_or(Error::OutOfRange)?;
        if end > wrapper.file_size()? {
            wrapper.set_file_size(end)?;
        }
        let written = wrapper.write_bytes(position, buffer.len() as u64, buffer)?;
        self.position.fetch_add(written, Ordering::Relaxed);
        Ok(written)
    }

    pub fn size(&self) -> Result<u64> {
        self.file_wrapper()?.file_size()
    }

    pub fn set_size(&self, size: u64) -> Result {
        self.file_wrapper()?.set_file_size(size)
    }

    pub fn properties(&self) -> ObjectProperties {
        let is_branch = self.leaf.clone().as_branch().is_some();
        let is_file = self.leaf.clone().as_file().is_some();
        let size = self.size().unwrap_or(0);
        ObjectProperties {
            is_branch: is_branch as u64,
            is_file: is_file as u64,
            size,
        }
    }

    pub fn enum_children(&self, start_from: &str, max_count: u64) -> Result<Vec<String>> {
        self.as_branch()?.enum_children(start_from, max_count)
    }
}
