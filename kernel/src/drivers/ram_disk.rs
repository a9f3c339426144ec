use crate::block::block_core::{BlockOp, BlockSector, BLOCK_SECTOR_SIZE};
use crate::block::block_error::BlockError;
use alloc::vec;
use alloc::vec::Vec;

/// A block driver backed by ordinary memory. Stands in for the IDE driver
/// during bring-up and backs the hosted tests.
pub struct RamDisk {
    storage: Vec<u8>,
}

impl RamDisk {
    pub fn new(sectors: BlockSector) -> Self {
        Self {
            storage: vec![0; sectors as usize * BLOCK_SECTOR_SIZE],
        }
    }

    fn range(&self, sector: BlockSector) -> core::ops::Range<usize> {
        let start = sector as usize * BLOCK_SECTOR_SIZE;
        start..start + BLOCK_SECTOR_SIZE
    }
}

impl BlockOp for RamDisk {
    unsafe fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        let range = self.range(sector);
        if range.end > self.storage.len() {
            return Err(BlockError::ReadFailed(sector));
        }
        buf.copy_from_slice(&self.storage[range]);
        Ok(())
    }

    unsafe fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        let range = self.range(sector);
        if range.end > self.storage.len() {
            return Err(BlockError::WriteFailed(sector));
        }
        self.storage[range].copy_from_slice(buf);
        Ok(())
    }
}

/// A RAM disk that starts failing after a set number of operations. Only for
/// exercising error paths in tests.
#[cfg(test)]
pub struct FailingDisk {
    inner: RamDisk,
    ops_before_failure: usize,
}

#[cfg(test)]
impl FailingDisk {
    pub fn new(sectors: BlockSector, ops_before_failure: usize) -> Self {
        Self {
            inner: RamDisk::new(sectors),
            ops_before_failure,
        }
    }
}

#[cfg(test)]
impl BlockOp for FailingDisk {
    unsafe fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        if self.ops_before_failure == 0 {
            return Err(BlockError::ReadFailed(sector));
        }
        self.ops_before_failure -= 1;
        self.inner.read(sector, buf)
    }

    unsafe fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        if self.ops_before_failure == 0 {
            return Err(BlockError::WriteFailed(sector));
        }
        self.ops_before_failure -= 1;
        self.inner.write(sector, buf)
    }
}
