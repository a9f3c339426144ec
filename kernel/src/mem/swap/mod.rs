//! The swap area and the operations over it: pushing a victim page out to
//! disk, pulling a faulted page back in, and the bookkeeping that keeps the
//! two honest.

pub mod page_replacement;
pub mod slot_table;

use crate::block::block_core::{Block, BlockSector, BLOCK_SECTOR_SIZE};
use crate::block::block_error::BlockError;
use crate::block::buffer::BlockBuffer;
use crate::mem::address_space::{AddressSpace, VictimPolicy};
use crate::mem::swap::page_replacement::{find_victim_page, VictimPage};
use crate::mem::swap::slot_table::SlotTable;
use crate::mem::FrameAllocator;
use crate::sync::mutex::Mutex;
use alloc::boxed::Box;
use core::error::Error;
use core::fmt::{self, Display, Formatter};
use core::ptr::NonNull;
use marrowos_shared::mem::{virt_to_phys, PAGE_FRAME_SIZE};
use marrowos_shared::paging::{PagePermissions, SwapSlotHandle, VirtualAddress};
use marrowos_shared::println;
use once_cell::race::OnceBox;

/// Device sectors holding one page. The slot-handle arithmetic in
/// [`SlotTable`] is parameterized on this constant and nothing else.
pub const SECTORS_PER_PAGE: BlockSector = (PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE) as BlockSector;

/// First sector of the swap area on its device.
pub const SWAP_START_SECTOR: BlockSector = 10240;

/// Slots in the default swap area: 4 MiB worth of pages.
pub const SWAP_SLOT_COUNT: usize = 1024;

/// Failures the trap layer gets to see. Resource exhaustion and device
/// failure are reported rather than aborting outright, so the trap layer
/// can choose between killing the faulting process and halting; structural
/// inconsistencies (faults on resident or unmapped entries, failed walks)
/// panic instead, since they mean the address-space bookkeeping itself is
/// broken.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SwapError {
    /// Every swap slot is occupied
    NoFreeSlot,
    /// The frame allocator could not back a restored page
    OutOfFrames,
    /// The swap device failed mid-transfer
    Io(BlockError),
}

impl Display for SwapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            SwapError::NoFreeSlot => write!(f, "out of swap space"),
            SwapError::OutOfFrames => write!(f, "out of physical frames"),
            SwapError::Io(err) => write!(f, "swap device: {err}"),
        }
    }
}

impl Error for SwapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SwapError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BlockError> for SwapError {
    fn from(err: BlockError) -> Self {
        SwapError::Io(err)
    }
}

/// The swap area: a block device plus the slot table describing its
/// occupancy. The two locks are never held across device I/O and never
/// together; address-space locks are the caller's and sit outside both.
pub struct SwapSpace {
    device: Mutex<Block>,
    slots: Mutex<SlotTable>,
}

impl SwapSpace {
    /// A swap area with the default geometry at [`SWAP_START_SECTOR`].
    pub fn new(device: Block) -> Self {
        Self::with_geometry(device, SWAP_START_SECTOR, SWAP_SLOT_COUNT)
    }

    pub fn with_geometry(device: Block, base: BlockSector, slot_count: usize) -> Self {
        assert!(
            base + slot_count as BlockSector * SECTORS_PER_PAGE <= device.get_size(),
            "swap area does not fit on \"{}\"",
            device.get_name()
        );
        Self {
            device: Mutex::new(device),
            slots: Mutex::new(SlotTable::new(base, slot_count)),
        }
    }

    pub fn free_slots(&self) -> usize {
        self.slots.lock().free_count()
    }

    /// Evict one page from the process the policy picks and persist it to a
    /// swap slot. On success the page's entry is `Swapped`, the slot
    /// records the entry's permissions and owner, and the vacated frame's
    /// kernel address is returned for the caller to hand back to the frame
    /// allocator. On failure nothing visible has changed except accessed
    /// bits aged by the selector.
    pub fn swap_out<P: VictimPolicy>(&self, policy: &mut P) -> Result<NonNull<u8>, SwapError> {
        policy.with_victim(|space| self.evict_from(space))
    }

    fn evict_from<A: AddressSpace>(&self, space: &mut A) -> Result<NonNull<u8>, SwapError> {
        let victim = find_victim_page(space);
        let perms = space
            .entry_mut(victim.page)
            .and_then(|entry| entry.permissions())
            .expect("swap out: victim is not a mapped page");

        match self.write_victim(&victim, perms) {
            Ok(handle) => {
                let entry = space
                    .entry_mut(victim.page)
                    .expect("swap out: victim entry vanished");
                entry.evict_to(handle);
                Ok(victim.frame)
            }
            Err(err) => {
                // The eviction never happened; put the resident accounting
                // back the way the selector found it.
                let resident = space.resident_size();
                space.set_resident_size(resident + PAGE_FRAME_SIZE);
                Err(err)
            }
        }
    }

    /// Reserve a slot and copy the victim's frame into it, sector by
    /// sector. The slot is reserved (and attributed) before the transfer
    /// and released again if the device fails partway.
    fn write_victim(
        &self,
        victim: &VictimPage,
        perms: PagePermissions,
    ) -> Result<SwapSlotHandle, SwapError> {
        let handle = {
            let mut slots = self.slots.lock();
            let handle = slots.find_free_slot().ok_or(SwapError::NoFreeSlot)?;
            slots.mark_occupied(handle, perms, victim.pid);
            handle
        };

        let mut device = self.device.lock();
        for i in 0..SECTORS_PER_PAGE {
            let mut buffer = BlockBuffer::zeroed(&mut device, handle + i);
            // SAFETY: The victim's frame stays mapped and exclusively ours
            // for the whole eviction; the caller holds the address-space
            // lock.
            let src = unsafe {
                core::slice::from_raw_parts(
                    victim.frame.as_ptr().add(i as usize * BLOCK_SECTOR_SIZE),
                    BLOCK_SECTOR_SIZE,
                )
            };
            buffer.data_mut().copy_from_slice(src);
            if let Err(err) = buffer.write() {
                drop(buffer);
                drop(device);
                self.slots.lock().mark_free(handle);
                return Err(SwapError::Io(err));
            }
        }

        Ok(handle)
    }

    /// Read the page stored at `handle` into a freshly allocated frame and
    /// return it. Pure byte-mover: neither the slot table nor any page
    /// table changes here.
    fn swap_in<F: FrameAllocator>(
        &self,
        handle: SwapSlotHandle,
        frames: &mut F,
    ) -> Result<NonNull<u8>, SwapError> {
        let frame = frames
            .alloc(1)
            .map_err(|_| SwapError::OutOfFrames)?
            .cast::<u8>();

        let mut device = self.device.lock();
        for i in 0..SECTORS_PER_PAGE {
            // Each sector's buffer is released as soon as its bytes are
            // copied out.
            match BlockBuffer::read(&mut device, handle + i) {
                Ok(buffer) => {
                    // SAFETY: `frame` is a fresh page-sized allocation.
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            buffer.data().as_ptr(),
                            frame.as_ptr().add(i as usize * BLOCK_SECTOR_SIZE),
                            BLOCK_SECTOR_SIZE,
                        );
                    }
                }
                Err(err) => {
                    drop(device);
                    frames.dealloc(frame);
                    return Err(SwapError::Io(err));
                }
            }
        }

        Ok(frame)
    }

    /// The swap half of the page-fault path. The caller (trap layer) has
    /// resolved the faulting process and holds its address-space lock.
    ///
    /// A fault on a `Swapped` entry restores the page: fresh frame, bytes
    /// read back, entry rewritten with the slot's saved permissions and the
    /// accessed bit set, slot freed, resident counter bumped. A fault on
    /// any other entry is a bug in address-space management and fatal.
    pub fn handle_page_fault<A: AddressSpace, F: FrameAllocator>(
        &self,
        space: &mut A,
        fault_addr: usize,
        frames: &mut F,
    ) -> Result<(), SwapError> {
        #[allow(clippy::cast_possible_truncation)]
        let page = VirtualAddress::new_with_raw_value(fault_addr as u32)
            .page_number()
            .value() as usize;

        let Some(entry) = space.entry_mut(page) else {
            panic!("page fault: no page table entry for {fault_addr:#X}");
        };
        if entry.is_resident() {
            panic!("page fault: {fault_addr:#X} is already resident");
        }
        let Some(handle) = entry.slot() else {
            panic!("page fault: {fault_addr:#X} is not backed by swap");
        };

        let frame = self.swap_in(handle, frames)?;
        let perms = self.slots.lock().permissions_of(handle);

        let entry = space
            .entry_mut(page)
            .expect("page fault: entry vanished during swap in");
        entry.restore_to(virt_to_phys(frame.as_ptr() as usize), perms);

        // Only freed once no entry references the slot anymore.
        self.slots.lock().mark_free(handle);

        let resident = space.resident_size();
        space.set_resident_size(resident + PAGE_FRAME_SIZE);
        Ok(())
    }

    /// Process teardown: free every slot this space's `Swapped` entries
    /// reference and retire those entries. Slots owned by other processes
    /// are untouched.
    pub fn reclaim_process_swap<A: AddressSpace>(&self, space: &mut A) {
        let pid = space.pid();
        let mut freed = 0;
        for page in 0..space.page_span() {
            let Some(entry) = space.entry_mut(page) else {
                panic!("reclaim: no page table entry for page {page}");
            };
            if let Some(handle) = entry.slot() {
                let mut slots = self.slots.lock();
                debug_assert_eq!(slots.owner_of(handle), pid);
                slots.mark_free(handle);
                drop(slots);
                entry.release();
                freed += 1;
            }
        }
        if freed > 0 {
            println!("swap: reclaimed {} slot(s) from pid {}", freed, pid);
        }
    }

    /// Log the slot table, for the shell's debug command.
    pub fn dump(&self) {
        println!("{}", self);
    }
}

impl Display for SwapSpace {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Swap slots ({} free):", self.free_slots())?;
        write!(f, "{}", *self.slots.lock())
    }
}

static SWAP_SPACE: OnceBox<SwapSpace> = OnceBox::new();

/// One-time setup of the system swap area over `device`. Must run before
/// any swap activity.
pub fn swap_init(device: Block) {
    let swap = SwapSpace::new(device);
    println!(
        "swap: {} slots of {} sectors starting at sector {}",
        SWAP_SLOT_COUNT, SECTORS_PER_PAGE, SWAP_START_SECTOR
    );
    assert!(
        SWAP_SPACE.set(Box::new(swap)).is_ok(),
        "swap_init: swap area already initialized"
    );
}

pub fn swap_space() -> &'static SwapSpace {
    SWAP_SPACE.get().expect("swap used before swap_init")
}

/// Trap-layer entry point for faults the page tables attribute to swap.
pub fn page_fault_handler<A: AddressSpace, F: FrameAllocator>(
    space: &mut A,
    fault_addr: usize,
    frames: &mut F,
) -> Result<(), SwapError> {
    swap_space().handle_page_fault(space, fault_addr, frames)
}

/// Process-teardown entry point.
pub fn reclaim_process_swap<A: AddressSpace>(space: &mut A) {
    swap_space().reclaim_process_swap(space)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block_core::{BlockDriver, BlockType};
    use crate::drivers::ram_disk::{FailingDisk, RamDisk};
    use crate::mem::testing::{test_perms, SinglePolicy, TestFrames, TestSpace};

    const BASE: BlockSector = 16;

    fn small_swap(slot_count: usize) -> SwapSpace {
        let sectors = BASE + slot_count as BlockSector * SECTORS_PER_PAGE;
        let device = Block::new(
            BlockType::Swap,
            "swap-test",
            sectors,
            BlockDriver::Ram(RamDisk::new(sectors)),
        );
        SwapSpace::with_geometry(device, BASE, slot_count)
    }

    fn fault_addr(page: usize) -> usize {
        page * PAGE_FRAME_SIZE
    }

    #[test]
    fn evicted_page_round_trips_bytes_and_permissions() {
        let swap = small_swap(4);
        let mut space = TestSpace::new(3);
        space.map_page(0, false);
        space.fill_frame(0, 0xAB);
        let rss_before = space.resident_size();

        let freed_frame = {
            let mut policy = SinglePolicy { space: &mut space };
            swap.swap_out(&mut policy).unwrap()
        };
        assert!(space.entry(0).is_swapped());
        assert_eq!(space.resident_size(), rss_before - PAGE_FRAME_SIZE);

        let handle = space.entry(0).slot().unwrap();
        {
            let slots = swap.slots.lock();
            assert!(!slots.is_free(handle));
            assert_eq!(slots.owner_of(handle), 3);
            assert_eq!(slots.permissions_of(handle), test_perms());
        }

        // The vacated frame is the one that backed the page; scribble on it
        // to prove the restore does not depend on it.
        // SAFETY: The frame is a leaked test allocation.
        unsafe {
            core::slice::from_raw_parts_mut(freed_frame.as_ptr(), PAGE_FRAME_SIZE).fill(0xFF)
        };

        let mut frames = TestFrames::new();
        swap.handle_page_fault(&mut space, fault_addr(0), &mut frames)
            .unwrap();

        let entry = space.entry(0);
        assert!(entry.is_resident());
        assert!(entry.accessed());
        assert_eq!(entry.permissions(), Some(test_perms()));
        assert!(space.frame_bytes(0).iter().all(|&b| b == 0xAB));
        assert_eq!(space.resident_size(), rss_before);
        assert!(swap.slots.lock().is_free(handle));
        assert_eq!(frames.allocated, 1);
    }

    #[test]
    fn slots_fill_in_index_order_and_free_independently() {
        // Two pages out: slots at base+0 and base+8. Faulting the first
        // back in frees only its slot.
        let swap = small_swap(4);
        let mut space = TestSpace::new(1);
        space.map_page(0, false);
        space.map_page(1, false);
        space.fill_frame(0, 0x0A);
        space.fill_frame(1, 0x0B);

        {
            let mut policy = SinglePolicy { space: &mut space };
            swap.swap_out(&mut policy).unwrap();
            swap.swap_out(&mut policy).unwrap();
        }
        assert_eq!(space.entry(0).slot(), Some(BASE));
        assert_eq!(space.entry(1).slot(), Some(BASE + SECTORS_PER_PAGE));
        assert_eq!(swap.free_slots(), 2);

        let mut frames = TestFrames::new();
        swap.handle_page_fault(&mut space, fault_addr(0), &mut frames)
            .unwrap();

        let slots = swap.slots.lock();
        assert!(slots.is_free(BASE));
        assert!(!slots.is_free(BASE + SECTORS_PER_PAGE));
        assert_eq!(slots.owner_of(BASE + SECTORS_PER_PAGE), 1);
        drop(slots);
        assert!(space.frame_bytes(0).iter().all(|&b| b == 0x0A));
    }

    #[test]
    fn exhausted_swap_area_reports_no_free_slot() {
        let swap = small_swap(1);
        let mut space = TestSpace::new(1);
        space.map_page(0, false);
        space.map_page(1, false);
        let rss_before = space.resident_size();

        let mut policy = SinglePolicy { space: &mut space };
        swap.swap_out(&mut policy).unwrap();
        assert_eq!(swap.swap_out(&mut policy), Err(SwapError::NoFreeSlot));

        // The failed eviction left no trace: the second page is still
        // resident and accounted for.
        assert!(policy.space.entry(1).is_resident());
        assert_eq!(policy.space.resident_size(), rss_before - PAGE_FRAME_SIZE);
    }

    #[test]
    fn failed_device_write_releases_the_slot() {
        let sectors = BASE + SECTORS_PER_PAGE;
        let device = Block::new(
            BlockType::Swap,
            "swap-flaky",
            sectors,
            // Three sectors make it out, the fourth write fails.
            BlockDriver::Failing(FailingDisk::new(sectors, 3)),
        );
        let swap = SwapSpace::with_geometry(device, BASE, 1);

        let mut space = TestSpace::new(1);
        space.map_page(0, false);
        let rss_before = space.resident_size();

        let mut policy = SinglePolicy { space: &mut space };
        let result = swap.swap_out(&mut policy);
        assert!(matches!(result, Err(SwapError::Io(_))));

        assert_eq!(swap.free_slots(), 1);
        assert!(policy.space.entry(0).is_resident());
        assert_eq!(policy.space.resident_size(), rss_before);
    }

    #[test]
    fn frame_exhaustion_leaves_the_swapped_page_intact() {
        let swap = small_swap(2);
        let mut space = TestSpace::new(1);
        space.map_page(0, false);
        {
            let mut policy = SinglePolicy { space: &mut space };
            swap.swap_out(&mut policy).unwrap();
        }
        let handle = space.entry(0).slot().unwrap();

        let mut frames = TestFrames::new();
        frames.fail = true;
        assert_eq!(
            swap.handle_page_fault(&mut space, fault_addr(0), &mut frames),
            Err(SwapError::OutOfFrames)
        );

        // The page's only copy is still there to retry against.
        assert_eq!(space.entry(0).slot(), Some(handle));
        assert!(!swap.slots.lock().is_free(handle));
    }

    #[test]
    fn reclaim_frees_only_the_dying_processs_slots() {
        let swap = small_swap(4);
        let mut doomed = TestSpace::new(5);
        doomed.map_page(0, false);
        doomed.map_page(1, false);
        let mut bystander = TestSpace::new(6);
        bystander.map_page(0, false);

        {
            let mut policy = SinglePolicy { space: &mut doomed };
            swap.swap_out(&mut policy).unwrap();
            swap.swap_out(&mut policy).unwrap();
        }
        {
            let mut policy = SinglePolicy {
                space: &mut bystander,
            };
            swap.swap_out(&mut policy).unwrap();
        }
        let bystander_slot = bystander.entry(0).slot().unwrap();
        assert_eq!(swap.free_slots(), 1);

        swap.reclaim_process_swap(&mut doomed);

        assert_eq!(swap.free_slots(), 3);
        assert!(!swap.slots.lock().is_free(bystander_slot));
        assert!(doomed.entry(0).is_unmapped());
        assert!(doomed.entry(1).is_unmapped());
        assert!(bystander.entry(0).is_swapped());
    }

    #[test]
    #[should_panic(expected = "already resident")]
    fn fault_on_a_resident_page_is_fatal() {
        let swap = small_swap(1);
        let mut space = TestSpace::new(1);
        space.map_page(0, true);
        let mut frames = TestFrames::new();
        let _ = swap.handle_page_fault(&mut space, fault_addr(0), &mut frames);
    }

    #[test]
    #[should_panic(expected = "not backed by swap")]
    fn fault_on_an_unmapped_page_is_fatal() {
        let swap = small_swap(1);
        let mut space = TestSpace::new(1);
        space.map_page(0, true);
        space.evict_page(0, BASE);
        space.map_page(1, true);
        space.entry_mut(1).unwrap().release();
        let mut frames = TestFrames::new();
        let _ = swap.handle_page_fault(&mut space, fault_addr(1), &mut frames);
    }

    #[test]
    #[should_panic(expected = "no page table entry")]
    fn fault_with_a_failed_walk_is_fatal() {
        let swap = small_swap(1);
        let mut space = TestSpace::new(1);
        space.break_walk_at(0);
        let mut frames = TestFrames::new();
        let _ = swap.handle_page_fault(&mut space, fault_addr(0), &mut frames);
    }

    #[test]
    fn global_swap_area_serves_the_free_function_entry_points() {
        let sectors = SWAP_START_SECTOR + SWAP_SLOT_COUNT as BlockSector * SECTORS_PER_PAGE;
        swap_init(Block::new(
            BlockType::Swap,
            "swap",
            sectors,
            BlockDriver::Ram(RamDisk::new(sectors)),
        ));

        let mut space = TestSpace::new(9);
        space.map_page(0, false);
        space.fill_frame(0, 0x42);
        {
            let mut policy = SinglePolicy { space: &mut space };
            swap_space().swap_out(&mut policy).unwrap();
        }

        let mut frames = TestFrames::new();
        page_fault_handler(&mut space, fault_addr(0), &mut frames).unwrap();
        assert!(space.frame_bytes(0).iter().all(|&b| b == 0x42));

        reclaim_process_swap(&mut space);
        assert_eq!(swap_space().free_slots(), SWAP_SLOT_COUNT);
        swap_space().dump();
    }
}
