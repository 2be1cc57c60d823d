// SPDX-License-Identifier: MPL-2.0

use core::ptr::NonNull;

/// Size of the pages the kernel allocates internally (2 MiB).
pub const KERNEL_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Supplies whole kernel pages, aligned to their size.
pub trait PageAllocator: Send + Sync {
    /// One page of [`KERNEL_PAGE_SIZE`] bytes, or `None` when physical
    /// memory is exhausted.
    fn allocate_page(&self) -> Option<NonNull<u8>>;

    /// Returns contiguous pages starting at `page`.
    ///
    /// # Safety
    ///
    /// `page` must have come from `allocate_page`/`allocate_pages` of this
    /// allocator and no live references into it may remain.
    unsafe fn free_pages(&self, page: NonNull<u8>, count: usize);

    /// `count` virtually contiguous pages.
    fn allocate_pages(&self, count: usize) -> Option<NonNull<u8>>;
}

static PAGE_ALLOCATOR: spin::Once<&'static dyn PageAllocator> = spin::Once::new();

/// Installs the platform page source. The boot path does this before the
/// first heap allocation.
pub fn install_page_allocator(allocator: &'static dyn PageAllocator) {
    PAGE_ALLOCATOR.call_once(|| allocator);
}

/// The installed page source. Hosted builds fall back to a `std`-backed
/// provider automatically.
pub fn page_allocator() -> &'static dyn PageAllocator {
    #[cfg(not(target_os = "none"))]
    {
        *PAGE_ALLOCATOR.call_once(|| &HOST_PAGES)
    }

    #[cfg(target_os = "none")]
    {
        *PAGE_ALLOCATOR
            .get()
            .expect("no page allocator installed before first allocation")
    }
}

/// Base of the higher-half direct map on bare metal.
#[cfg(target_os = "none")]
const DIRECT_MAP_BASE: u64 = 0xFFFF_8000_0000_0000;

/// Translates a kernel virtual address to physical, for handing buffers to
/// bus-mastering hardware.
///
/// Hosted builds simulate a small physical address space: each kernel page
/// is assigned a stable 32-bit-addressable alias, so device models can
/// resolve "physical" pointers with [`phys_to_virt`] exactly the way a bus
/// master would.
pub fn virt_to_phys(addr: usize) -> u64 {
    #[cfg(target_os = "none")]
    {
        // The kernel heap lives in the higher-half direct map.
        addr as u64 - DIRECT_MAP_BASE
    }

    #[cfg(not(target_os = "none"))]
    {
        let page = addr & !(KERNEL_PAGE_SIZE - 1);
        let offset = (addr & (KERNEL_PAGE_SIZE - 1)) as u64;
        let mut aliases = host_phys::aliases().lock();
        let base = *aliases.entry(page).or_insert_with(host_phys::next_alias);
        base + offset
    }
}

/// The reverse translation, used on metal for the direct map and on hosted
/// builds by simulated bus masters.
pub fn phys_to_virt(phys: u64) -> Option<usize> {
    #[cfg(target_os = "none")]
    {
        Some((phys + DIRECT_MAP_BASE) as usize)
    }

    #[cfg(not(target_os = "none"))]
    {
        let base = phys & !(KERNEL_PAGE_SIZE as u64 - 1);
        let offset = (phys & (KERNEL_PAGE_SIZE as u64 - 1)) as usize;
        let aliases = host_phys::aliases().lock();
        aliases
            .iter()
            .find(|(_, &alias)| alias == base)
            .map(|(&page, _)| page + offset)
    }
}

#[cfg(not(target_os = "none"))]
mod host_phys {
    use core::sync::atomic::{AtomicU64, Ordering};

    use super::KERNEL_PAGE_SIZE;
    use crate::prelude::*;

    pub(super) fn aliases() -> &'static SpinLock<BTreeMap<usize, u64>> {
        static ALIASES: SpinLock<BTreeMap<usize, u64>> = SpinLock::new(BTreeMap::new());
        &ALIASES
    }

    pub(super) fn next_alias() -> u64 {
        // Aliases stay below 4 GiB, matching what the hardware's 32-bit
        // descriptor registers can carry.
        static NEXT: AtomicU64 = AtomicU64::new(0x0100_0000);
        NEXT.fetch_add(KERNEL_PAGE_SIZE as u64, Ordering::Relaxed)
    }
}

#[cfg(not(target_os = "none"))]
static HOST_PAGES: HostPages = HostPages;

#[cfg(not(target_os = "none"))]
struct HostPages;

#[cfg(not(target_os = "none"))]
impl PageAllocator for HostPages {
    fn allocate_page(&self) -> Option<NonNull<u8>> {
        self.allocate_pages(1)
    }

    fn allocate_pages(&self, count: usize) -> Option<NonNull<u8>> {
        let layout =
            core::alloc::Layout::from_size_align(KERNEL_PAGE_SIZE * count, KERNEL_PAGE_SIZE)
                .ok()?;
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    unsafe fn free_pages(&self, page: NonNull<u8>, count: usize) {
        let layout =
            core::alloc::Layout::from_size_align(KERNEL_PAGE_SIZE * count, KERNEL_PAGE_SIZE)
                .unwrap();
        unsafe { std::alloc::dealloc(page.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_aligned() {
        let pages = page_allocator();
        let page = pages.allocate_page().unwrap();
        assert_eq!(page.as_ptr() as usize % KERNEL_PAGE_SIZE, 0);
        unsafe { pages.free_pages(page, 1) };
    }

    #[test]
    fn simulated_physical_aliases_round_trip() {
        let pages = page_allocator();
        let page = pages.allocate_page().unwrap();
        let addr = page.as_ptr() as usize + 1234;

        let phys = virt_to_phys(addr);
        // Stays addressable through 32-bit descriptor registers.
        assert!(phys < u32::MAX as u64);
        // Stable and reversible.
        assert_eq!(virt_to_phys(addr), phys);
        assert_eq!(phys_to_virt(phys), Some(addr));

        unsafe { pages.free_pages(page, 1) };
    }
}
