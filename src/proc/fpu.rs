//! Lazy FPU context ownership.
//!
//! FPU state is not switched with the rest of the context. The first FPU
//! instruction after a switch traps; the trap handler asks
//! [`FpuOwner::claim`] what to do and performs the save/restore itself.

use super::task::{Task, TaskId};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FpuAction {
    /// The current task's state is already in the unit.
    AlreadyLoaded,
    /// Save `save`'s state if set, then load the current task's state.
    Restore { save: Option<TaskId> },
    /// Save `save`'s state if set, then reset the unit for a first-time user.
    Init { save: Option<TaskId> },
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FpuOwner {
    last_task_used_math: Option<TaskId>,
}
impl FpuOwner {
    pub const fn new() -> FpuOwner {
        FpuOwner {
            last_task_used_math: None,
        }
    }
    pub fn owner(&self) -> Option<TaskId> {
        self.last_task_used_math
    }
    /// Hand the unit to `current`.
    pub fn claim(&mut self, current: TaskId, task: &mut Task) -> FpuAction {
        if self.last_task_used_math == Some(current) {
            return FpuAction::AlreadyLoaded;
        }
        let save = self.last_task_used_math.replace(current);
        if task.used_math {
            FpuAction::Restore { save }
        } else {
            task.used_math = true;
            FpuAction::Init { save }
        }
    }
    /// Forget `task` if it owns the unit; its state is gone.
    pub fn release(&mut self, task: TaskId) {
        if self.last_task_used_math == Some(task) {
            self.last_task_used_math = None;
        }
    }
}
