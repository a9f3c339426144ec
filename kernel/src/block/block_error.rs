use crate::block::block_core::BlockSector;
use core::error::Error;
use core::fmt::{Debug, Display, Formatter};

/// Error type for block operations. Device failures carry the sector so a
/// failed swap transfer can be pinned down from the log alone.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BlockError {
    /// The sector lies beyond the end of the device
    SectorOutOfBounds { sector: BlockSector, size: BlockSector },
    /// The buffer does not hold exactly `BLOCK_SECTOR_SIZE` bytes
    BufferInvalid,
    /// The device failed to read the sector
    ReadFailed(BlockSector),
    /// The device failed to write the sector
    WriteFailed(BlockSector),
}

impl Display for BlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            BlockError::SectorOutOfBounds { sector, size } => {
                write!(f, "sector {sector} out of bounds (device has {size} sectors)")
            }
            BlockError::BufferInvalid => write!(f, "buffer is not exactly one sector"),
            BlockError::ReadFailed(sector) => write!(f, "read of sector {sector} failed"),
            BlockError::WriteFailed(sector) => write!(f, "write of sector {sector} failed"),
        }
    }
}

impl Error for BlockError {}
