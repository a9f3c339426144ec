//! Scoped one-sector buffers over a [`Block`] device.
//!
//! The swap path moves whole pages one sector at a time. Each sector's bytes
//! live in a [`BlockBuffer`] that borrows the device for its lifetime:
//! acquisition-to-release is one lexical scope, so a buffer cannot outlive
//! its device or leak when a transfer bails out partway through a page.

use crate::block::block_core::{Block, BlockSector, BLOCK_SECTOR_SIZE};
use crate::block::block_error::BlockError;

pub struct BlockBuffer<'a> {
    block: &'a mut Block,
    sector: BlockSector,
    data: [u8; BLOCK_SECTOR_SIZE],
}

impl<'a> BlockBuffer<'a> {
    /// Acquire a buffer for `sector` and fill it from the device.
    pub fn read(block: &'a mut Block, sector: BlockSector) -> Result<Self, BlockError> {
        let mut data = [0; BLOCK_SECTOR_SIZE];
        block.read(sector, &mut data)?;
        Ok(Self {
            block,
            sector,
            data,
        })
    }

    /// Acquire a zeroed buffer for `sector` without touching the device.
    /// For callers that overwrite the whole sector, sparing the
    /// read-modify-write a partial update would need.
    pub fn zeroed(block: &'a mut Block, sector: BlockSector) -> Self {
        Self {
            block,
            sector,
            data: [0; BLOCK_SECTOR_SIZE],
        }
    }

    pub fn sector(&self) -> BlockSector {
        self.sector
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Flush the buffer's bytes to its sector.
    pub fn write(&mut self) -> Result<(), BlockError> {
        self.block.write(self.sector, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block_core::{BlockDriver, BlockType};
    use crate::drivers::ram_disk::RamDisk;

    fn scratch_block() -> Block {
        Block::new(
            BlockType::Raw,
            "scratch",
            8,
            BlockDriver::Ram(RamDisk::new(8)),
        )
    }

    #[test]
    fn zeroed_buffer_round_trips_through_the_device() {
        let mut block = scratch_block();

        {
            let mut buffer = BlockBuffer::zeroed(&mut block, 5);
            buffer.data_mut().fill(0xC3);
            buffer.write().unwrap();
        }

        let buffer = BlockBuffer::read(&mut block, 5).unwrap();
        assert_eq!(buffer.sector(), 5);
        assert!(buffer.data().iter().all(|&b| b == 0xC3));
    }

    #[test]
    fn read_propagates_device_bounds_errors() {
        let mut block = scratch_block();
        assert!(matches!(
            BlockBuffer::read(&mut block, 9),
            Err(BlockError::SectorOutOfBounds { .. })
        ));
    }
}
