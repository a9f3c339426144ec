//! The swap-slot registry: which fixed-size region of the swap area holds
//! which process's page, and with what permission bits.

use crate::block::block_core::BlockSector;
use crate::mem::address_space::Pid;
use crate::mem::swap::SECTORS_PER_PAGE;
use alloc::boxed::Box;
use alloc::vec;
use bitbybit::bitfield;
use core::fmt;
use marrowos_shared::paging::{PagePermissions, SwapSlotHandle};

/// Per-slot bookkeeping, packed like a core-map entry. A slot is `free` iff
/// no live page-table entry references it; while occupied, it remembers the
/// owning process and the evicted page's permission bits.
#[bitfield(u32, default = 0)]
pub struct SwapSlot {
    #[bit(0, rw)]
    free: bool,
    #[bits(8..=15, rw)]
    permissions: u8,
    #[bits(16..=31, rw)]
    owner: u16,
}

/// The process-wide table of swap slots. Slot `i`'s bytes start at device
/// sector `base + i * SECTORS_PER_PAGE`; that affine map and its inverse
/// live in [`index_to_handle`]/[`handle_to_index`] and nowhere else, so the
/// two directions cannot drift apart.
///
/// [`index_to_handle`]: SlotTable::index_to_handle
/// [`handle_to_index`]: SlotTable::handle_to_index
pub struct SlotTable {
    base: BlockSector,
    slots: Box<[SwapSlot]>,
}

impl SlotTable {
    pub fn new(base: BlockSector, slot_count: usize) -> Self {
        let mut table = Self {
            base,
            slots: vec![SwapSlot::DEFAULT; slot_count].into_boxed_slice(),
        };
        table.reset();
        table
    }

    /// Every slot back to free. Called once before any swap activity.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = SwapSlot::DEFAULT.with_free(true);
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.free()).count()
    }

    pub fn index_to_handle(&self, index: usize) -> SwapSlotHandle {
        assert!(index < self.slots.len(), "slot table: index {index} out of range");
        self.base + index as BlockSector * SECTORS_PER_PAGE
    }

    pub fn handle_to_index(&self, handle: SwapSlotHandle) -> usize {
        assert!(
            handle >= self.base && (handle - self.base) % SECTORS_PER_PAGE == 0,
            "slot table: {handle} is not a slot handle"
        );
        let index = ((handle - self.base) / SECTORS_PER_PAGE) as usize;
        assert!(index < self.slots.len(), "slot table: handle {handle} out of range");
        index
    }

    /// First free slot in index order, or `None` when the swap area is
    /// exhausted.
    pub fn find_free_slot(&self) -> Option<SwapSlotHandle> {
        self.slots
            .iter()
            .position(|slot| slot.free())
            .map(|index| self.index_to_handle(index))
    }

    pub fn is_free(&self, handle: SwapSlotHandle) -> bool {
        self.slots[self.handle_to_index(handle)].free()
    }

    pub fn mark_occupied(&mut self, handle: SwapSlotHandle, perms: PagePermissions, pid: Pid) {
        let index = self.handle_to_index(handle);
        assert!(self.slots[index].free(), "slot table: {handle} occupied twice");
        self.slots[index] = SwapSlot::DEFAULT
            .with_free(false)
            .with_permissions(perms.raw_value())
            .with_owner(pid);
    }

    /// Idempotent: freeing a free slot is a no-op.
    pub fn mark_free(&mut self, handle: SwapSlotHandle) {
        let index = self.handle_to_index(handle);
        self.slots[index] = self.slots[index].with_free(true);
    }

    pub fn permissions_of(&self, handle: SwapSlotHandle) -> PagePermissions {
        let index = self.handle_to_index(handle);
        assert!(!self.slots[index].free(), "slot table: permissions of free slot {handle}");
        PagePermissions::new_with_raw_value(self.slots[index].permissions())
    }

    pub fn owner_of(&self, handle: SwapSlotHandle) -> Pid {
        let index = self.handle_to_index(handle);
        assert!(!self.slots[index].free(), "slot table: owner of free slot {handle}");
        self.slots[index].owner()
    }
}

impl fmt::Display for SlotTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.free() {
                writeln!(f, "Slot {i}: free")?;
            } else {
                writeln!(
                    f,
                    "Slot {i}: pid {}, perms {:#06b}",
                    slot.owner(),
                    slot.permissions()
                )?;
            }
        }
        Ok(())
    }
}
