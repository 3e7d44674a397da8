use core::fmt;

/// Index of a slot in the task table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

pub type Pid = i32;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    Running,
    Interruptible,
    Uninterruptible,
    Zombie,
}

/// Where the CPU was when the timer fired.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

/// Signal numbers start at 1.
pub type Signal = u32;

pub const SIGHUP: Signal = 1;
pub const SIGINT: Signal = 2;
pub const SIGKILL: Signal = 9;
pub const SIGUSR1: Signal = 10;
pub const SIGALRM: Signal = 14;
pub const SIGCHLD: Signal = 17;

/// Pending signals. Signal `n` is bit `n - 1`.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct SignalSet(u32);
impl SignalSet {
    pub const fn empty() -> SignalSet {
        SignalSet(0)
    }
    pub fn raise(&mut self, signal: Signal) {
        if let Some(bit) = bit(signal) {
            self.0 |= bit;
        }
    }
    pub fn clear(&mut self, signal: Signal) {
        if let Some(bit) = bit(signal) {
            self.0 &= !bit;
        }
    }
    pub fn contains(&self, signal: Signal) -> bool {
        bit(signal).is_some_and(|bit| self.0 & bit != 0)
    }
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
    pub fn bits(&self) -> u32 {
        self.0
    }
}
impl fmt::Debug for SignalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalSet({:#010x})", self.0)
    }
}

fn bit(signal: Signal) -> Option<u32> {
    if (1..=32).contains(&signal) {
        Some(1 << (signal - 1))
    } else {
        None
    }
}

/// Per-task scheduling state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub pid: Pid,
    /// Parent process id.
    pub parent: Pid,
    pub state: TaskState,
    /// Fixed share of the recharge; always positive.
    pub priority: i32,
    /// Remaining time slice in ticks.
    pub counter: i32,
    /// Absolute tick at which SIGALRM is raised, if armed.
    pub alarm: Option<u64>,
    pub signal: SignalSet,
    /// The task has FPU state worth saving.
    pub used_math: bool,
    /// Ticks spent in user mode.
    pub utime: u64,
    /// Ticks spent in kernel mode.
    pub stime: u64,
    /// Exit status to be returned to the reaper.
    pub exit_code: i32,
}
impl Task {
    pub const fn new(pid: Pid, parent: Pid, priority: i32) -> Task {
        Task {
            pid,
            parent,
            state: TaskState::Running,
            priority,
            counter: priority,
            alarm: None,
            signal: SignalSet::empty(),
            used_math: false,
            utime: 0,
            stime: 0,
            exit_code: 0,
        }
    }
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Running
    }
}

/// One line of a task table dump.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub pid: Pid,
    pub parent: Pid,
    pub state: TaskState,
    pub priority: i32,
    pub counter: i32,
}
impl TaskInfo {
    pub fn of(id: TaskId, task: &Task) -> TaskInfo {
        TaskInfo {
            id,
            pid: task.pid,
            parent: task.parent,
            state: task.state,
            priority: task.priority,
            counter: task.counter,
        }
    }
}
impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            TaskState::Running => "run",
            TaskState::Interruptible => "sleep",
            TaskState::Uninterruptible => "dsleep",
            TaskState::Zombie => "zombie",
        };
        write!(
            f,
            "{:>3} {:>5} {:>5} {:<6} pri {:>3} cnt {:>3}",
            self.id.0, self.pid, self.parent, state, self.priority, self.counter
        )
    }
}
