//! What the swap subsystem needs to know about processes and their page
//! tables. The real bookkeeping (process table, page-directory walking,
//! resident-set accounting) lives with the threading code; these traits are
//! the seam between it and eviction/restore.

use marrowos_shared::paging::PageTableEntry;

pub type Pid = u16;

/// One process's virtual address space, viewed entry by entry.
///
/// All of the swap subsystem's scans and entry rewrites happen through this
/// trait while the caller holds the owning process's address-space lock, so
/// entry transitions are atomic with respect to every other thread that
/// might fault on or scan the same space.
pub trait AddressSpace {
    fn pid(&self) -> Pid;

    /// Number of virtual pages the address space spans. Scans run from page
    /// 0 upward.
    fn page_span(&self) -> usize;

    /// Walk the page table for `page`. `None` means the walk failed: the
    /// page has no entry at all, which every caller in this subsystem
    /// treats as a fatal address-space bug.
    fn entry_mut(&mut self, page: usize) -> Option<&mut PageTableEntry>;

    /// Bytes of this address space currently backed by physical frames.
    fn resident_size(&self) -> usize;

    fn set_resident_size(&mut self, bytes: usize);
}

/// The eviction-target policy: some other part of the kernel decides which
/// process loses a page under memory pressure. Opaque to the swap code.
pub trait VictimPolicy {
    type Space: AddressSpace;

    /// Pick the target process and run `f` with its address-space lock
    /// held. The lock must cover the whole of `f`, so victim selection, the
    /// device write, and the entry rewrite all happen under it.
    ///
    /// Implementations that can hold several address-space locks at once
    /// must acquire them in ascending pid order, or two threads evicting
    /// from each other's processes can deadlock.
    fn with_victim<R>(&mut self, f: impl FnOnce(&mut Self::Space) -> R) -> R;
}
