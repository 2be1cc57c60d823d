// SPDX-License-Identifier: MPL-2.0

use super::{Branch, Leaf, SimpleBranch, PATH_SEPARATOR};
use crate::prelude::*;

/// The singleton at the very top of the System Tree.
///
/// Requests must be rooted (leading backslash); everything else is delegated
/// to a plain [`SimpleBranch`] hosted as the root's one distinguished child.
pub struct SystemTreeRoot {
    base: Arc<SimpleBranch>,
}

crate::impl_handled_object!(SystemTreeRoot);

impl SystemTreeRoot {
    fn new() -> Arc<SystemTreeRoot> {
        Arc::new(SystemTreeRoot {
            base: SimpleBranch::create(),
        })
    }

    fn strip_root<'a>(&self, name: &'a str) -> Result<&'a str> {
        name.strip_prefix(PATH_SEPARATOR).ok_or(Error::NotFound)
    }
}

impl Leaf for SystemTreeRoot {
    fn as_branch(self: Arc<Self>) -> Option<Arc<dyn Branch>> {
        Some(self)
    }
}

impl Branch for SystemTreeRoot {
    fn get_child(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        let rest = self.strip_root(name)?;
        if rest.is_empty() {
            return Ok(self.base.clone());
        }
        self.base.get_child(rest)
    }

    fn add_child(&self, name: &str, child: Arc<dyn Leaf>) -> Result {
        let rest = self.strip_root(name).map_err(|_| Error::InvalidOp)?;
        self.base.add_child(rest, child)
    }

    fn create_child(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        let rest = self.strip_root(name)?;
        self.base.create_child(rest)
    }

    fn rename_child(&self, old_name: &str, new_name: &str) -> Result {
        let old_rest = self.strip_root(old_name)?;
        let new_rest = self.strip_root(new_name)?;
        self.base.rename_child(old_rest, new_rest)
    }

    fn delete_child(&self, name: &str) -> Result {
        let rest = self.strip_root(name)?;
        if rest.is_empty() {
            return Err(Error::InvalidOp);
        }
        self.base.delete_child(rest)
    }

    fn num_children(&self) -> Result<u64> {
        self.base.num_children()
    }

    fn enum_children(&self, start_from: &str, max_count: u64) -> Result<Vec<String>> {
        self.base.enum_children(start_from, max_count)
    }
}

static ROOT: spin::Once<Arc<SystemTreeRoot>> = spin::Once::new();

/// Creates the System Tree root. Idempotent.
pub fn init() {
    ROOT.call_once(SystemTreeRoot::new);
}

/// The System Tree root.
///
/// # Panics
///
/// Panics before [`init`].
pub fn root() -> &'static Arc<SystemTreeRoot> {
    ROOT.get().expect("system tree not initialized")
}
