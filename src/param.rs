/// Number of slots in the task table, idle task included.
pub const NR_TASKS: usize = 64;
/// Timer interrupts per second.
pub const HZ: u64 = 100;
/// Size of a cached disk block in bytes.
pub const BLOCK_SIZE: usize = 1024;
/// Number of hash buckets in the buffer cache.
pub const NR_HASH: usize = 307;
/// Default size of the disk block cache.
pub const NBUF: usize = 30;
/// Bookkeeping bytes charged per buffer when sizing the pool from memory.
pub const BUFFER_HEAD_SIZE: usize = 64;
/// Priority given to the idle task and used as the default time slice.
pub const DEFAULT_PRIORITY: i32 = 15;
/// Slot of the idle task. It never sleeps and never exits.
pub const IDLE_TASK: usize = 0;
