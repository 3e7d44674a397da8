//! Ramdisk: block devices backed by kernel memory.
//!
//! Units are numbered like devices; unit 0 does not exist because device 0
//! means "no device" to the buffer cache. A unit's memory is allocated on
//! first access.

use super::{Block, BlockDevice, DiskError, Direction};
use crate::{param::BLOCK_SIZE, sync::SpinMutex};
use alloc::vec::Vec;

pub const RAMDISK_UNITS: usize = 8;

pub struct RamDisk {
    /// Blocks per unit.
    nblocks: u32,
    units: [SpinMutex<Vec<u8>>; RAMDISK_UNITS],
}
impl RamDisk {
    pub fn new(nblocks: u32) -> RamDisk {
        RamDisk {
            nblocks,
            units: core::array::from_fn(|_| SpinMutex::new(Vec::new())),
        }
    }
    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }
    fn unit(&self, dev: u32) -> Result<&SpinMutex<Vec<u8>>, DiskError> {
        match dev as usize {
            0 => Err(DiskError::NoSuchDevice),
            n => self.units.get(n).ok_or(DiskError::NoSuchDevice),
        }
    }
}

impl BlockDevice for RamDisk {
    fn transfer(
        &self,
        direction: Direction,
        dev: u32,
        block: u32,
        data: &mut Block,
    ) -> Result<(), DiskError> {
        if block >= self.nblocks {
            return Err(DiskError::OutOfRange);
        }
        let mut unit = self.unit(dev)?.lock();
        if unit.is_empty() {
            unit.resize(self.nblocks as usize * BLOCK_SIZE, 0);
        }

        let start = block as usize * BLOCK_SIZE;
        let stored = &mut unit[start..start + BLOCK_SIZE];
        match direction {
            Direction::Read => data.copy_from_slice(stored),
            Direction::Write => stored.copy_from_slice(data),
        }
        Ok(())
    }
}
