// SPDX-License-Identifier: MPL-2.0

//! The System Tree: the kernel's hierarchical name-to-object namespace.
//!
//! Branches are directories, leaves are files/devices/objects; everything is
//! reference-counted. Paths are separated by backslashes and a leading
//! backslash addresses the root.

mod root;
mod simple_branch;

pub use root::{init, root, SystemTreeRoot};
pub use simple_branch::SimpleBranch;

use crate::block::BlockDevice;
use crate::fs::BasicFile;
use crate::ipc::MessageReceiver;
use crate::obj::HandledObject;
use crate::prelude::*;

/// The path separator.
pub const PATH_SEPARATOR: char = '\\';

/// An object storable at a System Tree name.
///
/// The `as_*` methods are the capability casts: an object advertises the
/// interfaces it implements by overriding them.
pub trait Leaf: HandledObject {
    fn as_branch(self: Arc<Self>) -> Option<Arc<dyn Branch>> {
        None
    }

    fn as_file(self: Arc<Self>) -> Option<Arc<dyn BasicFile>> {
        None
    }

    fn as_block_device(self: Arc<Self>) -> Option<Arc<dyn BlockDevice>> {
        None
    }

    fn as_receiver(self: Arc<Self>) -> Option<Arc<dyn MessageReceiver>> {
        None
    }
}

/// A branch: a polymorphic directory of named children.
pub trait Branch: Leaf {
    /// Looks up `name`, resolving separators left to right.
    fn get_child(&self, name: &str) -> Result<Arc<dyn Leaf>>;

    /// Stores `child` at `name`.
    fn add_child(&self, name: &str, child: Arc<dyn Leaf>) -> Result;

    /// Creates a new child object at `name`; what gets created is up to the
    /// branch type.
    fn create_child(&self, name: &str) -> Result<Arc<dyn Leaf>>;

    fn rename_child(&self, old_name: &str, new_name: &str) -> Result;

    fn delete_child(&self, name: &str) -> Result;

    fn num_children(&self) -> Result<u64>;

    /// Up to `max_count` child names in lexicographic order starting at the
    /// first name `>= start_from`; zero means unlimited.
    fn enum_children(&self, start_from: &str, max_count: u64) -> Result<Vec<String>>;
}

/// Splits off the leftmost path component.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once(PATH_SEPARATOR) {
        Some((first, rest)) => (first, Some(rest)),
        None => (name, None),
    }
}

/// A valid component: non-empty, no separator.
pub fn validate_component(name: &str) -> Result {
    if name.is_empty() || name.contains(PATH_SEPARATOR) {
        return Err(Error::InvalidName);
    }
    Ok(())
}
