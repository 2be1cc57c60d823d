// SPDX-License-Identifier: MPL-2.0

use super::{split_name, validate_component, Branch, Leaf};
use crate::prelude::*;

/// The default branch: an ordered in-memory map of named children.
pub struct SimpleBranch {
    children: SpinLock<BTreeMap<String, Arc<dyn Leaf>>>,
}

crate::impl_handled_object!(SimpleBranch);

impl SimpleBranch {
    pub fn create() -> Arc<SimpleBranch> {
        Arc::new(SimpleBranch {
            children: SpinLock::new(BTreeMap::new()),
        })
    }

    /// Resolves the branch one level down, for multi-component paths.
    fn descend(&self, first: &str) -> Result<Arc<dyn Branch>> {
        let child = self
            .children
            .lock()
            .get(first)
            .cloned()
            .ok_or(Error::NotFound)?;
        child.as_branch().ok_or(Error::NotFound)
    }
}

impl Leaf for SimpleBranch {
    fn as_branch(self: Arc<Self>) -> Option<Arc<dyn Branch>> {
        Some(self)
    }
}

impl Branch for SimpleBranch {
    fn get_child(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        let (first, rest) = split_name(name);
        validate_component(first)?;
        match rest {
            None => self
                .children
                .lock()
                .get(first)
                .cloned()
                .ok_or(Error::NotFound),
            Some(rest) => self.descend(first)?.get_child(rest),
        }
    }

    fn add_child(&self, name: &str, child: Arc<dyn Leaf>) -> Result {
        let (first, rest) = split_name(name);
        validate_component(first)?;
        match rest {
            None => {
                let mut children = self.children.lock();
                if children.contains_key(first) {
                    return Err(Error::AlreadyExists);
                }
                children.insert(first.to_string(), child);
                Ok(())
            }
            Some(rest) => self.descend(first)?.add_child(rest, child),
        }
    }

    fn create_child(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        let (first, rest) = split_name(name);
        validate_component(first)?;
        match rest {
            None => {
                let branch = SimpleBranch::create();
                self.add_child(first, branch.clone())?;
                Ok(branch)
            }
            Some(rest) => self.descend(first)?.create_child(rest),
        }
    }

    fn rename_child(&self, old_name: &str, new_name: &str) -> Result {
        let (old_first, old_rest) = split_name(old_name);
        let (new_first, new_rest) = split_name(new_name);
        validate_component(old_first)?;
        validate_component(new_first)?;

        match (old_rest, new_rest) {
            (None, None) => {
                let mut children = self.children.lock();
                if children.contains_key(new_first) {
                    return Err(Error::AlreadyExists);
                }
                let child = children.remove(old_first).ok_or(Error::NotFound)?;
                children.insert(new_first.to_string(), child);
                Ok(())
            }
            // Deeper renames must stay within one sub-branch.
            (Some(old_rest), Some(new_rest)) if old_first == new_first => {
                self.descend(old_first)?.rename_child(old_rest, new_rest)
            }
            _ => Err(Error::InvalidOp),
        }
    }

    fn delete_child(&self, name: &str) -> Result {
        let (first, rest) = split_name(name);
        validate_component(first)?;
        match rest {
            None => self
                .children
                .lock()
                .remove(first)
                .map(|_| ())
                .ok_or(Error::NotFound),
            Some(rest) => self.descend(first)?.delete_child(rest),
        }
    }

    fn num_children(&self) -> Result<u64> {
        Ok(self.children.lock().len() as u64)
    }

    fn enum_children(&self, start_from: &str, max_count: u64) -> Result<Vec<String>> {
        let children = self.children.lock();
        let iter = children.range(start_from.to_string()..).map(|(k, _)| k.clone());
        Ok(match max_count {
            0 => iter.collect(),
            n => iter.take(n as usize).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;
    crate::impl_handled_object!(Marker);
    impl Leaf for Marker {}

    #[test]
    fn add_get_delete_round_trip() {
        let branch = SimpleBranch::create();
        branch.add_child("leaf", Arc::new(Marker)).unwrap();
        assert_eq!(
            branch.add_child("leaf", Arc::new(Marker)).unwrap_err(),
            Error::AlreadyExists
        );
        branch.get_child("leaf").unwrap();
        branch.delete_child("leaf").unwrap();
        assert_eq!(branch.get_child("leaf").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn nested_paths_resolve_left_to_right() {
        let branch = SimpleBranch::create();
        branch.create_child("a").unwrap();
        branch.add_child("a\\b", Arc::new(Marker)).unwrap();
        branch.get_child("a\\b").unwrap();

        // A leaf in the middle of the path is a dead end.
        assert_eq!(branch.get_child("a\\b\\c").unwrap_err(), Error::NotFound);
        assert_eq!(branch.get_child("missing\\x").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn enumeration_is_ordered_and_bounded() {
        let branch = SimpleBranch::create();
        for name in ["delta", "alpha", "charlie", "bravo"] {
            branch.add_child(name, Arc::new(Marker)).unwrap();
        }

        assert_eq!(branch.num_children().unwrap(), 4);
        assert_eq!(
            branch.enum_children("", 0).unwrap(),
            ["alpha", "bravo", "charlie", "delta"]
        );
        assert_eq!(branch.enum_children("b", 2).unwrap(), ["bravo", "charlie"]);
        assert_eq!(branch.enum_children("delta", 0).unwrap(), ["delta"]);
        assert!(branch.enum_children("zzz", 0).unwrap().is_empty());
    }

    #[test]
    fn rename_moves_entries() {
        let branch = SimpleBranch::create();
        branch.add_child("old", Arc::new(Marker)).unwrap();
        branch.rename_child("old", "new").unwrap();
        assert!(branch.get_child("new").is_ok());
        assert_eq!(branch.get_child("old").unwrap_err(), Error::NotFound);

        branch.add_child("other", Arc::new(Marker)).unwrap();
        assert_eq!(
            branch.rename_child("new", "other").unwrap_err(),
            Error::AlreadyExists
        );
    }

    #[test]
    fn invalid_names_are_rejected() {
        let branch = SimpleBranch::create();
        assert_eq!(
            branch.add_child("", Arc::new(Marker)).unwrap_err(),
            Error::InvalidName
        );
    }
}
