//! Scheduler and block buffer cache for a small single-CPU kernel.
//!
//! The [`Scheduler`] owns the task table, the timer tick, and sleep/wake
//! on single-slot [`WaitSlot`]s. The [`BufferCache`] keeps a fixed pool of
//! disk blocks and blocks tasks through the scheduler whenever a buffer is
//! busy or the pool is exhausted.
//!
//! Context switching and disk hardware are supplied by the embedding
//! kernel through [`ContextSwitch`] and [`BlockDevice`].

#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]

extern crate alloc;

pub mod arch;
pub mod hardware;
pub mod io;
pub mod logger;
pub mod param;
pub mod proc;
pub mod sync;

pub use crate::{
    hardware::{BlockDevice, DiskError, RamDisk},
    io::{BioError, Buf, BufferCache},
    proc::{ContextSwitch, Privilege, SchedError, Scheduler, TaskId, TaskState},
    sync::WaitSlot,
};
