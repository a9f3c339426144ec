use crate::block::block_error::BlockError;
use crate::drivers::ram_disk::RamDisk;
use alloc::string::String;
use core::fmt;
use marrowos_shared::println;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Types of blocks
#[derive(PartialEq, Eq, Copy, Clone)]
pub enum BlockType {
    /// Swap area
    Swap,
    /// "Raw" device with unidentified contents
    Raw,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockType::Swap => write!(f, "Swap"),
            BlockType::Raw => write!(f, "Raw"),
        }
    }
}

/// Lower-level interface to block device drivers
pub trait BlockOp {
    /// Read a block sector
    ///
    /// # Safety
    ///
    /// `buf` must hold `BLOCK_SECTOR_SIZE` bytes and `sector` must be in
    /// bounds; [`Block`] checks both before calling down here.
    unsafe fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Write a block sector
    ///
    /// # Safety
    ///
    /// Same contract as [`BlockOp::read`].
    unsafe fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError>;
}

/// Supported block drivers
pub enum BlockDriver {
    // TODO: Add the ATA driver here once the IDE bring-up lands.
    Ram(RamDisk),
    #[cfg(test)]
    Failing(crate::drivers::ram_disk::FailingDisk),
}

impl BlockDriver {
    fn driver_mut(&mut self) -> &mut dyn BlockOp {
        match self {
            BlockDriver::Ram(driver) => driver,
            #[cfg(test)]
            BlockDriver::Failing(driver) => driver,
        }
    }
}

/// A block device: a named, bounds-checked view of a driver, counting the
/// sectors that pass through it.
pub struct Block {
    block_name: String,
    block_type: BlockType,
    driver: BlockDriver,

    /// The size of the block device in sectors
    block_size: BlockSector,

    read_count: u32,
    write_count: u32,
}

impl Block {
    pub fn new(
        block_type: BlockType,
        block_name: &str,
        block_size: BlockSector,
        driver: BlockDriver,
    ) -> Self {
        println!(
            "Registered block device \"{}\" ({} type) with {} sectors",
            block_name, block_type, block_size,
        );

        Block {
            block_name: String::from(block_name),
            block_type,
            driver,
            block_size,
            read_count: 0,
            write_count: 0,
        }
    }

    /// Verifies that `buf` can hold exactly one sector.
    fn verify_buffer(buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        Ok(())
    }

    /// Verifies that `sector` is a valid offset within the block device.
    fn check_sector(&self, sector: BlockSector) -> Result<(), BlockError> {
        if sector >= self.block_size {
            return Err(BlockError::SectorOutOfBounds {
                sector,
                size: self.block_size,
            });
        }
        Ok(())
    }

    /// Reads sector `sector` from the block device into `buf`, which must
    /// have room for `BLOCK_SECTOR_SIZE` bytes.
    pub fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        self.check_sector(sector)?;
        Self::verify_buffer(buf)?;

        // SAFETY: Bounds and buffer size checked above.
        unsafe { self.driver.driver_mut().read(sector, buf)? };
        self.read_count += 1;
        Ok(())
    }

    /// Writes sector `sector` from `buf`, which must contain
    /// `BLOCK_SECTOR_SIZE` bytes. Returns after the block device has
    /// acknowledged receiving the data.
    pub fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        self.check_sector(sector)?;
        Self::verify_buffer(buf)?;

        // SAFETY: Bounds and buffer size checked above.
        unsafe { self.driver.driver_mut().write(sector, buf)? };
        self.write_count += 1;
        Ok(())
    }

    // Block getters -----------------------------------------------------------

    pub fn get_type(&self) -> BlockType {
        self.block_type
    }
    pub fn get_size(&self) -> BlockSector {
        self.block_size
    }
    pub fn get_name(&self) -> &str {
        &self.block_name
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\" ({}): {:04} sectors, {:04} read, {:04} write",
            self.block_name, self.block_type, self.block_size, self.read_count, self.write_count
        )
    }
}
