pub mod spinmutex;
pub mod waitslot;

pub use spinmutex::{SpinMutex, SpinMutexGuard};
pub use waitslot::WaitSlot;
