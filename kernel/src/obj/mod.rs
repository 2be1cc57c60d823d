// SPDX-License-Identifier: MPL-2.0

//! The common root of handle- and name-addressable kernel objects.

mod handles;

pub use handles::HandleTable;

use crate::prelude::*;

/// Anything that can be stored in a handle table or at a System Tree name.
///
/// Lifetime is shared ownership (`Arc`); back-references between objects are
/// weak and promoted before use.
pub trait HandledObject: Any + Send + Sync {
    /// The object as `Any`, for the downcasting shim.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Recovers a concrete type from a shared [`HandledObject`].
pub fn downcast_object<T: Any + Send + Sync>(obj: Arc<dyn HandledObject>) -> Result<Arc<T>> {
    obj.as_any_arc().downcast().map_err(|_| Error::WrongType)
}

/// Implements the [`HandledObject`] boilerplate for a concrete type.
#[macro_export]
macro_rules! impl_handled_object {
    ($ty:ty) => {
        impl $crate::obj::HandledObject for $ty {
            fn as_any_arc(
                self: alloc::sync::Arc<Self>,
            ) -> alloc::sync::Arc<dyn core::any::Any + Send + Sync> {
                self
            }
        }
    };
}
