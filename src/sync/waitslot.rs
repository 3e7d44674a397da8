//! Single-slot wait queue.
//!
//! A wait slot names at most one parked task. A second task parking on an
//! occupied slot displaces the first and keeps it on its own stack; the
//! displaced task is only made runnable again when the second one wakes up
//! and passes the wake-up along. A single `wake_up` therefore recovers one
//! task directly, no matter how many are chained behind it.
//!
//! The slot never holds the idle task, so slot 0 doubles as "empty".

use crate::{param::IDLE_TASK, proc::task::TaskId};
use core::sync::atomic::{AtomicUsize, Ordering};

const EMPTY: usize = IDLE_TASK;

pub struct WaitSlot {
    task: AtomicUsize,
}
impl WaitSlot {
    pub const fn new() -> WaitSlot {
        WaitSlot {
            task: AtomicUsize::new(EMPTY),
        }
    }
    pub fn get(&self) -> Option<TaskId> {
        decode(self.task.load(Ordering::Acquire))
    }
    pub fn is_empty(&self) -> bool {
        self.get().is_none()
    }
    /// Install `task`, returning the task it displaced.
    pub(crate) fn replace(&self, task: TaskId) -> Option<TaskId> {
        if task.0 == EMPTY {
            panic!("wait slot: idle task cannot be parked");
        }
        decode(self.task.swap(task.0, Ordering::AcqRel))
    }
    pub(crate) fn take(&self) -> Option<TaskId> {
        decode(self.task.swap(EMPTY, Ordering::AcqRel))
    }
    pub(crate) fn clear(&self) {
        self.task.store(EMPTY, Ordering::Release);
    }
}
impl Default for WaitSlot {
    fn default() -> WaitSlot {
        WaitSlot::new()
    }
}
impl core::fmt::Debug for WaitSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("WaitSlot").field(&self.get()).finish()
    }
}

fn decode(raw: usize) -> Option<TaskId> {
    if raw == EMPTY {
        None
    } else {
        Some(TaskId(raw))
    }
}
