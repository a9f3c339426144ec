// https://wiki.osdev.org/Paging
//
// The hardware-shaped pieces (permission bits, virtual-address split) are
// bitfields; the entry itself is kept as a small tagged value so every state
// change funnels through the transition methods below instead of loose bit
// twiddling at call sites.

use arbitrary_int::{u12, u20};
use bitbybit::bitfield;
use core::fmt;

/// Sector number on the swap device where a swapped-out page's first block
/// lives. Doubles as the slot's identity everywhere outside the slot table.
pub type SwapSlotHandle = u32;

/// Permission bits carried by a page-table entry, preserved verbatim across
/// an evict/restore cycle.
#[bitfield(u8, default = 0)]
pub struct PagePermissions {
    #[bit(0, rw)]
    writable: bool,
    #[bit(1, rw)]
    user_accessible: bool,
    #[bit(2, rw)]
    write_through: bool,
    #[bit(3, rw)]
    cache_disabled: bool,
}

impl PartialEq for PagePermissions {
    fn eq(&self, other: &Self) -> bool {
        self.raw_value() == other.raw_value()
    }
}

impl Eq for PagePermissions {}

impl fmt::Debug for PagePermissions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PagePermissions({:#06b})", self.raw_value())
    }
}

#[bitfield(u32)]
pub struct VirtualAddress {
    #[bits(12..=31, r)]
    page_number: u20,
    #[bits(0..=11, r)]
    offset: u12,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum EntryState {
    Unmapped,
    Resident {
        frame: usize,
        perms: PagePermissions,
        accessed: bool,
    },
    Swapped {
        slot: SwapSlotHandle,
        perms: PagePermissions,
    },
}

/// One page-table entry, always in exactly one of three states:
///
/// - `Unmapped`: no translation; faulting here is an address-space bug.
/// - `Resident`: backed by the physical frame whose address it holds.
/// - `Swapped`: backed only by a swap slot, identified by its handle.
///
/// The only legal transitions are `Resident -> Swapped` ([`evict_to`]),
/// `Swapped -> Resident` ([`restore_to`]) and teardown to `Unmapped`
/// ([`release`]). Each transition is a single store of the new state;
/// callers serialize through the owning address space's lock, so no other
/// reader can observe a half-finished transition.
///
/// [`evict_to`]: PageTableEntry::evict_to
/// [`restore_to`]: PageTableEntry::restore_to
/// [`release`]: PageTableEntry::release
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PageTableEntry(EntryState);

impl PageTableEntry {
    pub const fn unmapped() -> Self {
        Self(EntryState::Unmapped)
    }

    /// A fresh resident mapping, accessed bit clear. Initial mappings are
    /// the loader's business; the swap subsystem only ever sees entries
    /// that already exist.
    pub const fn resident(frame: usize, perms: PagePermissions) -> Self {
        Self(EntryState::Resident {
            frame,
            perms,
            accessed: false,
        })
    }

    pub fn is_unmapped(&self) -> bool {
        matches!(self.0, EntryState::Unmapped)
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.0, EntryState::Resident { .. })
    }

    pub fn is_swapped(&self) -> bool {
        matches!(self.0, EntryState::Swapped { .. })
    }

    /// Hardware recency signal. Clear on non-resident entries.
    pub fn accessed(&self) -> bool {
        matches!(self.0, EntryState::Resident { accessed: true, .. })
    }

    /// Physical frame address, if resident.
    pub fn frame(&self) -> Option<usize> {
        match self.0 {
            EntryState::Resident { frame, .. } => Some(frame),
            _ => None,
        }
    }

    /// Swap slot handle, if swapped out.
    pub fn slot(&self) -> Option<SwapSlotHandle> {
        match self.0 {
            EntryState::Swapped { slot, .. } => Some(slot),
            _ => None,
        }
    }

    pub fn permissions(&self) -> Option<PagePermissions> {
        match self.0 {
            EntryState::Resident { perms, .. } | EntryState::Swapped { perms, .. } => Some(perms),
            EntryState::Unmapped => None,
        }
    }

    /// Stand-in for the MMU setting or clearing the accessed bit.
    pub fn set_accessed(&mut self, accessed: bool) {
        match &mut self.0 {
            EntryState::Resident {
                accessed: entry_accessed,
                ..
            } => *entry_accessed = accessed,
            _ => panic!("page table: accessed bit on a non-resident entry"),
        }
    }

    /// `Resident -> Swapped`: the frame address is replaced by `slot`, the
    /// permission bits survive unchanged.
    pub fn evict_to(&mut self, slot: SwapSlotHandle) {
        match self.0 {
            EntryState::Resident { perms, .. } => {
                self.0 = EntryState::Swapped { slot, perms };
            }
            _ => panic!("page table: evict of a non-resident entry"),
        }
    }

    /// `Swapped -> Resident`: the slot handle is replaced by `frame` and the
    /// saved permissions; the accessed bit is set, since the page is being
    /// touched right now.
    pub fn restore_to(&mut self, frame: usize, perms: PagePermissions) {
        match self.0 {
            EntryState::Swapped {
                perms: entry_perms, ..
            } => {
                debug_assert_eq!(perms, entry_perms);
                self.0 = EntryState::Resident {
                    frame,
                    perms,
                    accessed: true,
                };
            }
            _ => panic!("page table: restore of a non-swapped entry"),
        }
    }

    /// Teardown: the entry stops referencing whatever backed it.
    pub fn release(&mut self) {
        self.0 = EntryState::Unmapped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw_perms() -> PagePermissions {
        PagePermissions::DEFAULT
            .with_writable(true)
            .with_user_accessible(true)
    }

    #[test]
    fn evict_then_restore_closes_the_state_machine() {
        let perms = rw_perms();
        let mut entry = PageTableEntry::resident(0x5000, perms);
        let before = entry;

        entry.evict_to(72);
        assert!(entry.is_swapped());
        assert_eq!(entry.slot(), Some(72));
        assert_eq!(entry.permissions(), Some(perms));

        entry.restore_to(0x5000, perms);
        assert!(entry.is_resident());
        assert_eq!(entry.permissions(), before.permissions());
        assert_eq!(entry.frame(), Some(0x5000));
        // The restore itself counts as an access.
        assert!(entry.accessed());
    }

    #[test]
    fn accessed_bit_tracks_only_resident_entries() {
        let mut entry = PageTableEntry::resident(0x2000, rw_perms());
        assert!(!entry.accessed());
        entry.set_accessed(true);
        assert!(entry.accessed());
        entry.evict_to(8);
        assert!(!entry.accessed());
    }

    #[test]
    #[should_panic(expected = "evict of a non-resident entry")]
    fn evicting_an_unmapped_entry_is_fatal() {
        PageTableEntry::unmapped().evict_to(0);
    }

    #[test]
    #[should_panic(expected = "restore of a non-swapped entry")]
    fn restoring_a_resident_entry_is_fatal() {
        PageTableEntry::resident(0x1000, rw_perms()).restore_to(0x1000, rw_perms());
    }

    #[test]
    fn virtual_address_splits_into_page_and_offset() {
        let va = VirtualAddress::new_with_raw_value(0x0040_3ABC);
        assert_eq!(va.page_number().value(), 0x403);
        assert_eq!(va.offset().value(), 0xABC);
    }
}
