// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;

use super::HandledObject;
use crate::prelude::*;

/// The lowest handle value ever issued; low values are kept clear so that
/// accidental zero/small integers from user mode never alias a real handle.
const FIRST_HANDLE: u64 = 16;

/// A process-local map from opaque 64-bit handles to kernel objects.
///
/// Allocation is monotonic; releasing a handle removes the entry (so the
/// object's reference is dropped) but handle values are never reused.
pub struct HandleTable {
    objects: SpinLock<HashMap<u64, Arc<dyn HandledObject>>>,
    next: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            objects: SpinLock::new(HashMap::new()),
            next: AtomicU64::new(FIRST_HANDLE),
        }
    }

    /// Stores an object and returns its new handle.
    pub fn store(&self, obj: Arc<dyn HandledObject>) -> Result<u64> {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        if handle == u64::MAX {
            // The space is effectively inexhaustible; treat wrap-around as a
            // hard failure rather than aliasing live handles.
            return Err(Error::OutOfRange);
        }
        self.objects.lock().insert(handle, obj);
        Ok(handle)
    }

    pub fn get(&self, handle: u64) -> Result<Arc<dyn HandledObject>> {
        self.objects
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(Error::NotFound)
    }

    /// Releases a handle, dropping the table's reference to the object.
    pub fn release(&self, handle: u64) -> Result {
        self.objects
            .lock()
            .remove(&handle)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry; used during process teardown.
    pub fn clear(&self) {
        self.objects.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(u32);
    crate::impl_handled_object!(Dummy);

    #[test]
    fn store_get_release() {
        let table = HandleTable::new();
        let h = table.store(Arc::new(Dummy(7))).unwrap();
        assert!(h >= FIRST_HANDLE);

        let obj = table.get(h).unwrap();
        let dummy = crate::obj::downcast_object::<Dummy>(obj).unwrap();
        assert_eq!(dummy.0, 7);

        table.release(h).unwrap();
        assert_eq!(table.get(h).unwrap_err(), Error::NotFound);
        assert_eq!(table.release(h).unwrap_err(), Error::NotFound);
    }

    #[test]
    fn handles_are_not_reused() {
        let table = HandleTable::new();
        let a = table.store(Arc::new(Dummy(1))).unwrap();
        table.release(a).unwrap();
        let b = table.store(Arc::new(Dummy(2))).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn downcast_to_wrong_type_is_rejected() {
        struct Other;
        crate::impl_handled_object!(Other);

        let table = HandleTable::new();
        let h = table.store(Arc::new(Dummy(1))).unwrap();
        let obj = table.get(h).unwrap();
        assert!(crate::obj::downcast_object::<Other>(obj).is_err());
    }
}
