//! Second-chance victim selection.
//!
//! The accessed bit is the recency signal: a resident page whose bit is
//! clear goes immediately. When every resident page has been touched, a
//! tenth of them (rounded up) get their bits cleared, and the page whose
//! clearing exhausts that budget is taken as the victim in the same pass.
//! Deliberately not the textbook clock algorithm (age everything, then
//! re-scan for a newly clear bit): the aging pass picks its victim on the
//! spot, and callers depend on that.

use crate::mem::address_space::{AddressSpace, Pid};
use core::ptr::NonNull;
use marrowos_shared::mem::{phys_to_virt, PAGE_FRAME_SIZE};

/// One resident page chosen for eviction.
pub struct VictimPage {
    /// Index of the page in its address space.
    pub page: usize,
    /// Kernel virtual address of the backing frame's bytes.
    pub frame: NonNull<u8>,
    pub pid: Pid,
}

fn claim<A: AddressSpace>(space: &mut A, page: usize, frame_phys: usize) -> VictimPage {
    let resident = space.resident_size();
    space.set_resident_size(resident.saturating_sub(PAGE_FRAME_SIZE));
    let frame = NonNull::new(phys_to_virt(frame_phys) as *mut u8)
        .expect("find_victim_page: frame maps to null");
    VictimPage {
        page,
        frame,
        pid: space.pid(),
    }
}

/// Choose one resident page of `space` to evict. The caller holds the
/// address-space lock and guarantees the space has at least one resident
/// page; a space without one is a policy bug upstream and fatal here.
///
/// On return the victim's accessed bit is clear and the space's resident
/// size has dropped by one page. Up to `ceil(C/10)` other pages (where `C`
/// is the resident page count) have had their accessed bits cleared.
pub fn find_victim_page<A: AddressSpace>(space: &mut A) -> VictimPage {
    // First pass: take the first resident page that has not been touched,
    // counting the touched ones as we go.
    let mut accessed_pages: usize = 0;
    for page in 0..space.page_span() {
        let Some(entry) = space.entry_mut(page) else {
            panic!("find_victim_page: no page table entry for page {page}");
        };
        if !entry.is_resident() {
            continue;
        }
        if entry.accessed() {
            accessed_pages += 1;
        } else {
            let frame_phys = entry.frame().expect("resident entry without a frame");
            return claim(space, page, frame_phys);
        }
    }

    // Every resident page has been touched. Give a tenth of them (rounded
    // up) their second chance; the page that exhausts the budget is the
    // victim, its own bit freshly cleared.
    let mut budget = accessed_pages.div_ceil(10);
    if budget > 0 {
        for page in 0..space.page_span() {
            let Some(entry) = space.entry_mut(page) else {
                panic!("find_victim_page: no page table entry for page {page}");
            };
            if !(entry.is_resident() && entry.accessed()) {
                continue;
            }
            entry.set_accessed(false);
            budget -= 1;
            if budget == 0 {
                let frame_phys = entry.frame().expect("resident entry without a frame");
                return claim(space, page, frame_phys);
            }
        }
    }

    panic!(
        "find_victim_page: no resident pages in address space of pid {}",
        space.pid()
    );
}
