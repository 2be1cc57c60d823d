// SPDX-License-Identifier: MPL-2.0

//! The prelude shared by kernel modules.

pub use alloc::borrow::ToOwned;
pub use alloc::boxed::Box;
pub use alloc::collections::{BTreeMap, VecDeque};
pub use alloc::format;
pub use alloc::string::{String, ToString};
pub use alloc::sync::{Arc, Weak};
pub use alloc::vec;
pub use alloc::vec::Vec;
pub use core::any::Any;

pub use crate::error::{Error, Result};
pub use crate::sync::{RawSpinLock, SpinLock};
