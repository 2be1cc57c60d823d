// SPDX-License-Identifier: MPL-2.0

//! Memory management: the page source and the slab allocator that serves
//! every kernel heap allocation.

mod page;
mod slab;

pub use page::{
    install_page_allocator, page_allocator, phys_to_virt, virt_to_phys, PageAllocator,
    KERNEL_PAGE_SIZE,
};
pub use slab::{kfree, kmalloc, SlabAllocator, MAX_EMPTY_SLABS, SIZE_CLASSES};

/// Prepares the global allocator: one empty slab per size class must exist
/// before the first allocation, otherwise that allocation would recurse into
/// an empty universe looking for slab bookkeeping.
pub fn init() {
    slab::init_global();
}
