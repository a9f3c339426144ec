//! Hosted stand-ins for the swap subsystem's collaborators: a flat address
//! space over heap-allocated frames, a counting frame allocator, and a
//! victim policy pinned to one process.

use crate::mem::address_space::{AddressSpace, Pid, VictimPolicy};
use crate::mem::{FrameAllocError, FrameAllocator};
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;
use marrowos_shared::mem::{virt_to_phys, PAGE_FRAME_SIZE};
use marrowos_shared::paging::{PagePermissions, PageTableEntry, SwapSlotHandle};

pub fn test_perms() -> PagePermissions {
    PagePermissions::DEFAULT
        .with_writable(true)
        .with_user_accessible(true)
}

/// A flat page table whose frames are leaked heap allocations, so entry
/// frame addresses translate back to real, readable bytes.
pub struct TestSpace {
    pid: Pid,
    rss: usize,
    entries: Vec<Option<PageTableEntry>>,
}

impl TestSpace {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            rss: 0,
            entries: Vec::new(),
        }
    }

    fn grow_to(&mut self, page: usize) {
        while self.entries.len() <= page {
            self.entries.push(Some(PageTableEntry::unmapped()));
        }
    }

    fn fresh_frame() -> usize {
        let frame: &'static mut [u8] = vec![0u8; PAGE_FRAME_SIZE].leak();
        virt_to_phys(frame.as_ptr() as usize)
    }

    /// Map `page` to a fresh frame with the default test permissions.
    pub fn map_page(&mut self, page: usize, accessed: bool) {
        self.map_page_with_perms(page, accessed, test_perms());
    }

    pub fn map_page_with_perms(&mut self, page: usize, accessed: bool, perms: PagePermissions) {
        self.grow_to(page);
        let mut entry = PageTableEntry::resident(Self::fresh_frame(), perms);
        entry.set_accessed(accessed);
        self.entries[page] = Some(entry);
        self.rss += PAGE_FRAME_SIZE;
    }

    /// Force the entry straight to `Swapped` without any I/O.
    pub fn evict_page(&mut self, page: usize, slot: SwapSlotHandle) {
        self.entries[page]
            .as_mut()
            .expect("evict_page: walk hole")
            .evict_to(slot);
    }

    /// Make the page-table walk fail for `page`.
    pub fn break_walk_at(&mut self, page: usize) {
        self.grow_to(page);
        self.entries[page] = None;
    }

    pub fn entry(&self, page: usize) -> &PageTableEntry {
        self.entries[page].as_ref().expect("entry: walk hole")
    }

    /// The frame bytes backing `page`, which must be resident.
    pub fn frame_bytes(&self, page: usize) -> &[u8] {
        let phys = self.entry(page).frame().expect("frame_bytes: not resident");
        let virt = marrowos_shared::mem::phys_to_virt(phys) as *const u8;
        // SAFETY: Frames come from `fresh_frame` and are never freed.
        unsafe { core::slice::from_raw_parts(virt, PAGE_FRAME_SIZE) }
    }

    pub fn fill_frame(&mut self, page: usize, pattern: u8) {
        let phys = self.entry(page).frame().expect("fill_frame: not resident");
        let virt = marrowos_shared::mem::phys_to_virt(phys) as *mut u8;
        // SAFETY: Frames come from `fresh_frame` and are never freed.
        unsafe { core::slice::from_raw_parts_mut(virt, PAGE_FRAME_SIZE).fill(pattern) };
    }
}

pub fn frame_phys_of(space: &TestSpace, page: usize) -> usize {
    space.entry(page).frame().expect("frame_phys_of: not resident")
}

impl AddressSpace for TestSpace {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn page_span(&self) -> usize {
        self.entries.len()
    }

    fn entry_mut(&mut self, page: usize) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(page)?.as_mut()
    }

    fn resident_size(&self) -> usize {
        self.rss
    }

    fn set_resident_size(&mut self, bytes: usize) {
        self.rss = bytes;
    }
}

/// Frame allocator over leaked heap pages, counting traffic so tests can
/// assert on allocation behavior. Flip `fail` to model exhaustion.
pub struct TestFrames {
    pub allocated: usize,
    pub deallocated: usize,
    pub fail: bool,
}

impl TestFrames {
    pub fn new() -> Self {
        Self {
            allocated: 0,
            deallocated: 0,
            fail: false,
        }
    }
}

impl FrameAllocator for TestFrames {
    fn alloc(&mut self, frames_requested: usize) -> Result<NonNull<[u8]>, FrameAllocError> {
        if self.fail {
            return Err(FrameAllocError);
        }
        let frames: &'static mut [u8] = vec![0u8; frames_requested * PAGE_FRAME_SIZE].leak();
        self.allocated += frames_requested;
        Ok(NonNull::from(frames))
    }

    fn dealloc(&mut self, _ptr_to_dealloc: NonNull<u8>) -> usize {
        self.deallocated += 1;
        1
    }
}

/// A victim policy that always evicts from the one space it was built over.
pub struct SinglePolicy<'a> {
    pub space: &'a mut TestSpace,
}

impl VictimPolicy for SinglePolicy<'_> {
    type Space = TestSpace;

    fn with_victim<R>(&mut self, f: impl FnOnce(&mut TestSpace) -> R) -> R {
        f(self.space)
    }
}
