//! Block devices.
//!
//! The buffer cache talks to disks through [`BlockDevice`] only. A
//! transfer is synchronous from the caller's point of view; a driver that
//! has to wait for the hardware parks the calling task through the
//! scheduler and returns once the request has completed.

pub mod ramdisk;

pub use ramdisk::RamDisk;

use crate::param::BLOCK_SIZE;
use alloc::sync::Arc;
use core::fmt;

pub type Block = [u8; BLOCK_SIZE];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiskError {
    NoSuchDevice,
    /// Block number past the end of the device.
    OutOfRange,
    /// The device reported an error.
    Failed,
}
impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::NoSuchDevice => write!(f, "no such device"),
            DiskError::OutOfRange => write!(f, "block out of range"),
            DiskError::Failed => write!(f, "device error"),
        }
    }
}

pub trait BlockDevice: Send + Sync {
    /// Move one block between `data` and block `block` of device `dev`.
    fn transfer(
        &self,
        direction: Direction,
        dev: u32,
        block: u32,
        data: &mut Block,
    ) -> Result<(), DiskError>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for Arc<T> {
    fn transfer(
        &self,
        direction: Direction,
        dev: u32,
        block: u32,
        data: &mut Block,
    ) -> Result<(), DiskError> {
        (**self).transfer(direction, dev, block, data)
    }
}
