pub mod context;
pub mod cpu;
pub mod fpu;
pub mod scheduler;
pub mod task;

pub use context::ContextSwitch;
pub use scheduler::{SchedError, Scheduler};
pub use task::{Pid, Privilege, Task, TaskId, TaskInfo, TaskState};
