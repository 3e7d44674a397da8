//! Task selection, the timer tick, and sleep/wake on wait slots.
//!
//! There is one CPU and scheduling is cooperative: a task only stops
//! running inside [`Scheduler::schedule`], which it reaches by sleeping,
//! pausing, exiting, or by running out of time slice on a user-mode timer
//! tick.

use super::{
    context::ContextSwitch,
    cpu::Cpu,
    fpu::{FpuAction, FpuOwner},
    task::{Pid, Privilege, Signal, Task, TaskId, TaskInfo, TaskState, SIGALRM, SIGCHLD},
};
use crate::{
    arch::trap::InterruptBlocker,
    param::{DEFAULT_PRIORITY, HZ, IDLE_TASK, NR_TASKS},
    sync::{SpinMutex, SpinMutexGuard, WaitSlot},
};
use alloc::sync::Arc;
use arrayvec::ArrayVec;
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use log::{debug, info, trace};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SchedError {
    /// Every task slot is occupied.
    TableFull,
    /// Priorities must be positive.
    InvalidPriority,
    NoSuchTask,
    /// The task has not exited yet.
    NotZombie,
}
impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::TableFull => write!(f, "task table full"),
            SchedError::InvalidPriority => write!(f, "priority must be positive"),
            SchedError::NoSuchTask => write!(f, "no such task"),
            SchedError::NotZombie => write!(f, "task has not exited"),
        }
    }
}

/// The task table. Slot 0 is the idle task and is always occupied.
pub struct TaskTable {
    tasks: [Option<Task>; NR_TASKS],
    last_pid: Pid,
    fpu: FpuOwner,
}
impl TaskTable {
    fn new() -> TaskTable {
        let mut tasks = [None; NR_TASKS];
        tasks[IDLE_TASK] = Some(Task::new(0, 0, DEFAULT_PRIORITY));
        TaskTable {
            tasks,
            last_pid: 0,
            fpu: FpuOwner::new(),
        }
    }
    fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0).and_then(Option::as_ref)
    }
    fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id.0).and_then(Option::as_mut)
    }
    /// The running task's slot. An empty one means the table is corrupt.
    fn running(&mut self, id: TaskId) -> &mut Task {
        match self.get_mut(id) {
            Some(task) => task,
            None => panic!("sched: current task slot {} is empty", id.0),
        }
    }

    /// Phase 1: fire expired alarms and let signals interrupt sleepers.
    fn sweep(&mut self, jiffies: u64) {
        for task in self.tasks[1..].iter_mut().rev().flatten() {
            if let Some(alarm) = task.alarm {
                if alarm < jiffies {
                    task.signal.raise(SIGALRM);
                    task.alarm = None;
                }
            }
            if !task.signal.is_empty() && task.state == TaskState::Interruptible {
                task.state = TaskState::Running;
            }
        }
    }

    /// Phases 2 and 3: the runnable task with the largest counter,
    /// recharging every slice until one is positive.
    ///
    /// Slots are scanned from the top down and the first task with the
    /// largest counter wins, so ties go to the higher slot. The idle task
    /// is never a candidate; it is chosen only when nothing else can run.
    fn select(&mut self) -> TaskId {
        loop {
            let mut best: Option<(TaskId, i32)> = None;
            for (i, slot) in self.tasks.iter().enumerate().skip(1).rev() {
                let Some(task) = slot else { continue };
                if task.is_runnable() && best.map_or(true, |(_, counter)| task.counter > counter)
                {
                    best = Some((TaskId(i), task.counter));
                }
            }

            match best {
                None => return TaskId(IDLE_TASK),
                Some((id, counter)) if counter > 0 => return id,
                Some(_) => self.recharge(),
            }
        }
    }

    /// counter = counter / 2 + priority, for every task whether it can run
    /// or not. Sleepers come back with a larger slice.
    fn recharge(&mut self) {
        trace!("sched: recharging time slices");
        for task in self.tasks.iter_mut().flatten() {
            task.counter = (task.counter / 2).saturating_add(task.priority);
        }
    }

    fn set_state(&mut self, id: TaskId, state: TaskState) {
        self.running(id).state = state;
    }

    /// Make a parked task runnable again. Tasks that exited meanwhile
    /// stay dead.
    fn wake(&mut self, id: TaskId) {
        match self.get_mut(id) {
            Some(task) if task.state != TaskState::Zombie => task.state = TaskState::Running,
            _ => debug!("sched: wake-up for vacated slot {}", id.0),
        }
    }
}

pub struct Scheduler {
    cpu: Cpu,
    table: SpinMutex<TaskTable>,
    /// Timer ticks since boot.
    jiffies: AtomicU64,
    switcher: Arc<dyn ContextSwitch>,
}
impl Scheduler {
    /// Create the scheduler with the idle task in slot 0 as current.
    pub fn new(switcher: Arc<dyn ContextSwitch>) -> Scheduler {
        info!("sched: {} task slots, {} Hz", NR_TASKS, HZ);
        Scheduler {
            cpu: Cpu::new(),
            table: SpinMutex::new(TaskTable::new()),
            jiffies: AtomicU64::new(0),
            switcher,
        }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }
    pub fn jiffies(&self) -> u64 {
        self.jiffies.load(Ordering::SeqCst)
    }
    /// Mask interrupts until the returned guard is dropped.
    pub fn block_interrupts(&self) -> InterruptBlocker<'_> {
        InterruptBlocker::new(&self.cpu)
    }
    fn table(&self) -> SpinMutexGuard<'_, TaskTable> {
        self.table.lock_masked(&self.cpu)
    }

    pub fn current(&self) -> TaskId {
        self.cpu.current()
    }
    /// A copy of the running task's record.
    pub fn current_task(&self) -> Task {
        *self.table().running(self.current())
    }
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.table().get(id).copied()
    }
    pub fn pid(&self) -> Pid {
        self.current_task().pid
    }
    pub fn ppid(&self) -> Pid {
        self.current_task().parent
    }

    /// Timer interrupt. Charges the tick to the current task and
    /// preempts it if its slice ran out while it was in user mode.
    pub fn on_timer(&self, privilege: Privilege) {
        let preempt = {
            let mut table = self.table();
            self.jiffies.fetch_add(1, Ordering::SeqCst);
            let task = table.running(self.current());
            match privilege {
                Privilege::User => task.utime += 1,
                Privilege::Kernel => task.stime += 1,
            }
            task.counter -= 1;
            if task.counter > 0 {
                return;
            }
            task.counter = 0;
            privilege == Privilege::User
        };

        if preempt {
            self.schedule();
        }
    }

    /// Pick the next task and switch to it.
    pub fn schedule(&self) {
        let prev = self.current();
        let next = self.pick_next();
        if next != prev {
            self.check_switchable();
            trace!("sched: switch {} -> {}", prev.0, next.0);
            self.cpu.set_current(next);
            self.switcher.switch_to(prev, next);
        }
    }

    fn pick_next(&self) -> TaskId {
        let mut table = self.table();
        table.sweep(self.jiffies());
        table.select()
    }

    fn check_switchable(&self) {
        if self.cpu.interrupt_disable_layers() != 0 || !self.cpu.interrupts_enabled() {
            panic!("sched: switching with interrupts masked");
        }
    }

    /// Park the current task on `slot` until a [`wake_up`](Self::wake_up).
    /// Signals do not end this sleep.
    pub fn sleep_on(&self, slot: &WaitSlot) {
        self.sleep_on_masked(slot, self.block_interrupts());
    }

    /// [`sleep_on`](Self::sleep_on) for callers that checked their wait
    /// condition under `intr`. The mask is lifted once the task is parked.
    pub fn sleep_on_masked(&self, slot: &WaitSlot, intr: InterruptBlocker<'_>) {
        let me = self.current();
        if me.0 == IDLE_TASK {
            panic!("sleep_on: idle task attempting to sleep");
        }
        let prev = slot.replace(me);
        self.table().set_state(me, TaskState::Uninterruptible);
        drop(intr);

        self.schedule();

        // Pass the wake-up on to the task this one displaced.
        if let Some(prev) = prev {
            self.table().wake(prev);
        }
    }

    /// Park the current task on `slot` until a wake-up or a signal.
    pub fn interruptible_sleep_on(&self, slot: &WaitSlot) {
        self.interruptible_sleep_on_masked(slot, self.block_interrupts());
    }

    pub fn interruptible_sleep_on_masked(&self, slot: &WaitSlot, intr: InterruptBlocker<'_>) {
        let me = self.current();
        if me.0 == IDLE_TASK {
            panic!("interruptible_sleep_on: idle task attempting to sleep");
        }
        let prev = slot.replace(me);

        let mut intr = Some(intr);
        loop {
            {
                let _intr = intr.take().unwrap_or_else(|| self.block_interrupts());
                self.table().set_state(me, TaskState::Interruptible);
            }
            self.schedule();

            // Woken by a signal while someone else parked behind us: wake
            // them and go back to sleep until the slot is ours again.
            match slot.get() {
                Some(other) if other != me => self.table().wake(other),
                _ => break,
            }
        }

        slot.clear();
        if let Some(prev) = prev {
            self.table().wake(prev);
        }
    }

    /// Make the task parked on `slot`, if any, runnable and empty the slot.
    pub fn wake_up(&self, slot: &WaitSlot) {
        let mut table = self.table();
        if let Some(task) = slot.take() {
            table.wake(task);
        }
    }

    /// Sleep until a signal arrives.
    pub fn pause(&self) {
        self.table()
            .set_state(self.current(), TaskState::Interruptible);
        self.schedule();
    }

    /// Arm SIGALRM `seconds` from now, or disarm it for 0. Returns the
    /// seconds that were left on the previous alarm.
    pub fn alarm(&self, seconds: u64) -> u64 {
        let now = self.jiffies();
        let mut table = self.table();
        let task = table.running(self.current());
        let old = task.alarm.map_or(0, |alarm| alarm.saturating_sub(now) / HZ);
        task.alarm = if seconds > 0 {
            Some(now.saturating_add(HZ.saturating_mul(seconds)))
        } else {
            None
        };
        old
    }

    /// Lower the current task's priority by `increment`. The change is
    /// dropped if the priority would not stay positive. Returns the
    /// resulting priority.
    pub fn nice(&self, increment: i32) -> i32 {
        let mut table = self.table();
        let task = table.running(self.current());
        match task.priority.checked_sub(increment) {
            Some(priority) if priority > 0 => task.priority = priority,
            _ => {}
        }
        task.priority
    }

    /// Mark `signal` pending on `id`. Delivery happens at the next
    /// scheduling pass.
    pub fn raise_signal(&self, id: TaskId, signal: Signal) -> Result<(), SchedError> {
        let mut table = self.table();
        let task = table.get_mut(id).ok_or(SchedError::NoSuchTask)?;
        task.signal.raise(signal);
        Ok(())
    }

    /// Take `signal` off the current task's pending set. Returns whether
    /// it was pending.
    pub fn take_signal(&self, signal: Signal) -> bool {
        let mut table = self.table();
        let task = table.running(self.current());
        let pending = task.signal.contains(signal);
        task.signal.clear(signal);
        pending
    }

    /// Create a runnable child of the current task with a full slice.
    pub fn fork(&self, priority: i32) -> Result<TaskId, SchedError> {
        self.fork_with_counter(priority, priority)
    }

    pub fn fork_with_counter(&self, priority: i32, counter: i32) -> Result<TaskId, SchedError> {
        if priority <= 0 {
            return Err(SchedError::InvalidPriority);
        }
        let mut table = self.table();
        let slot = (1..NR_TASKS)
            .find(|&i| table.tasks[i].is_none())
            .ok_or(SchedError::TableFull)?;

        table.last_pid += 1;
        let pid = table.last_pid;
        let parent = table.running(self.current()).pid;
        let mut task = Task::new(pid, parent, priority);
        task.counter = counter.max(0);
        table.tasks[slot] = Some(task);

        debug!("sched: pid {} in slot {} (priority {})", pid, slot, priority);
        Ok(TaskId(slot))
    }

    /// End the current task and give the CPU away for good. The slot
    /// stays occupied as a zombie until [`reap`](Self::reap).
    pub fn exit(&self, code: i32) {
        let me = self.current();
        if me.0 == IDLE_TASK {
            panic!("exit: idle task attempting to exit");
        }
        {
            let mut table = self.table();
            let task = table.running(me);
            task.state = TaskState::Zombie;
            task.exit_code = code;
            let parent = task.parent;
            table.fpu.release(me);
            if let Some(father) = table.tasks.iter_mut().flatten().find(|t| t.pid == parent) {
                father.signal.raise(SIGCHLD);
            }
        }

        let next = self.pick_next();
        self.check_switchable();
        trace!("sched: {} exited, switch to {}", me.0, next.0);
        self.cpu.set_current(next);
        self.switcher.exit_to(me, next);
    }

    /// Free an exited task's slot and return its exit code.
    pub fn reap(&self, id: TaskId) -> Result<i32, SchedError> {
        let mut table = self.table();
        let task = table.get(id).ok_or(SchedError::NoSuchTask)?;
        if task.state != TaskState::Zombie {
            return Err(SchedError::NotZombie);
        }
        let code = task.exit_code;
        table.tasks[id.0] = None;
        Ok(code)
    }

    /// Snapshot of every occupied slot, lowest slot first.
    pub fn procdump(&self) -> ArrayVec<TaskInfo, NR_TASKS> {
        let table = self.table();
        table
            .tasks
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|task| TaskInfo::of(TaskId(i), task)))
            .collect()
    }

    /// Device-not-available trap: give the FPU to the current task.
    pub fn math_state_restore(&self) -> FpuAction {
        let me = self.current();
        let mut table = self.table();
        let table = &mut *table;
        let task = match table.tasks.get_mut(me.0).and_then(Option::as_mut) {
            Some(task) => task,
            None => panic!("math_state_restore: no current task"),
        };
        table.fpu.claim(me, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::task::SIGUSR1;
    use core::sync::atomic::AtomicUsize;

    /// Switches that return at once: the test thread plays whichever task
    /// is current.
    struct Immediate {
        switches: AtomicUsize,
    }
    impl ContextSwitch for Immediate {
        fn switch_to(&self, _prev: TaskId, _next: TaskId) {
            self.switches.fetch_add(1, Ordering::SeqCst);
        }
        fn exit_to(&self, _prev: TaskId, _next: TaskId) {}
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(Arc::new(Immediate {
            switches: AtomicUsize::new(0),
        }))
    }

    #[test]
    fn idle_runs_when_nothing_else_can() {
        let sched = scheduler();
        sched.schedule();
        assert_eq!(sched.current(), TaskId(IDLE_TASK));
    }

    #[test]
    fn largest_counter_wins_and_ties_go_to_the_higher_slot() {
        let sched = scheduler();
        let a = sched.fork_with_counter(5, 4).unwrap();
        let b = sched.fork_with_counter(5, 9).unwrap();
        let c = sched.fork_with_counter(5, 9).unwrap();
        assert!(a < b && b < c);
        sched.schedule();
        assert_eq!(sched.current(), c);
    }

    #[test]
    fn exhausted_slices_are_recharged_for_sleepers_too() {
        let sched = scheduler();
        let a = sched.fork_with_counter(4, 0).unwrap();
        let b = sched.fork_with_counter(3, 6).unwrap();
        sched.raise_signal(b, SIGUSR1).unwrap();
        {
            let mut table = sched.table();
            table.get_mut(b).unwrap().state = TaskState::Uninterruptible;
        }
        sched.schedule();
        assert_eq!(sched.current(), a);
        assert_eq!(sched.task(a).unwrap().counter, 4);
        assert_eq!(sched.task(b).unwrap().counter, 6 / 2 + 3);
    }

    #[test]
    fn kernel_mode_ticks_never_preempt() {
        let sched = scheduler();
        let a = sched.fork_with_counter(2, 1).unwrap();
        sched.schedule();
        assert_eq!(sched.current(), a);
        sched.on_timer(Privilege::Kernel);
        assert_eq!(sched.current(), a);
        let task = sched.task(a).unwrap();
        assert_eq!((task.counter, task.stime, task.utime), (0, 1, 0));
        assert_eq!(sched.jiffies(), 1);
    }

    #[test]
    fn user_mode_tick_preempts_at_zero() {
        let sched = scheduler();
        let a = sched.fork_with_counter(2, 1).unwrap();
        let b = sched.fork_with_counter(2, 0).unwrap();
        sched.schedule();
        assert_eq!(sched.current(), a);
        sched.on_timer(Privilege::User);
        // Both are out of time: recharge gives a 2 and b 2, b is scanned first.
        assert_eq!(sched.current(), b);
        assert_eq!(sched.task(a).unwrap().utime, 1);
    }

    #[test]
    fn expired_alarm_interrupts_a_sleeper() {
        let sched = scheduler();
        let a = sched.fork(3).unwrap();
        sched.schedule();
        assert_eq!(sched.alarm(1), 0);
        assert_eq!(sched.alarm(2), 1);
        sched.table().set_state(a, TaskState::Interruptible);
        for _ in 0..=2 * HZ {
            sched.jiffies.fetch_add(1, Ordering::SeqCst);
        }
        sched.schedule();
        let task = sched.task(a).unwrap();
        assert!(task.signal.contains(SIGALRM));
        assert_eq!(task.alarm, None);
        assert_eq!(task.state, TaskState::Running);
    }

    #[test]
    fn nice_keeps_priority_positive() {
        let sched = scheduler();
        sched.fork(5).unwrap();
        sched.schedule();
        assert_eq!(sched.nice(2), 3);
        assert_eq!(sched.nice(3), 3);
        assert_eq!(sched.nice(-4), 7);
    }

    #[test]
    fn nice_ignores_increments_that_overflow() {
        let sched = scheduler();
        sched.fork(5).unwrap();
        sched.schedule();
        assert_eq!(sched.nice(i32::MIN), 5);
        assert_eq!(sched.nice(i32::MAX), 5);
        assert_eq!(sched.nice(-(i32::MAX - 5)), i32::MAX);
        assert_eq!(sched.nice(-1), i32::MAX);
    }

    #[test]
    fn recharge_saturates_at_the_largest_slice() {
        let sched = scheduler();
        let a = sched.fork_with_counter(5, 8).unwrap();
        sched.schedule();
        sched.nice(-(i32::MAX - 5));
        sched.table().recharge();
        assert_eq!(sched.task(a).unwrap().counter, i32::MAX);
        sched.table().recharge();
        assert_eq!(sched.task(a).unwrap().counter, i32::MAX);
    }

    #[test]
    fn distant_alarm_saturates() {
        let sched = scheduler();
        let a = sched.fork(3).unwrap();
        sched.schedule();
        sched.jiffies.fetch_add(7, Ordering::SeqCst);
        assert_eq!(sched.alarm(u64::MAX), 0);
        assert_eq!(sched.task(a).unwrap().alarm, Some(u64::MAX));
        assert_eq!(sched.alarm(0), (u64::MAX - 7) / HZ);
        assert_eq!(sched.task(a).unwrap().alarm, None);
    }

    #[test]
    fn fork_fills_the_table_then_fails() {
        let sched = scheduler();
        for _ in 1..NR_TASKS {
            sched.fork(1).unwrap();
        }
        assert_eq!(sched.fork(1), Err(SchedError::TableFull));
        assert_eq!(sched.fork(0), Err(SchedError::InvalidPriority));
        assert_eq!(sched.procdump().len(), NR_TASKS);
    }

    #[test]
    fn exit_leaves_a_zombie_for_the_reaper() {
        let sched = scheduler();
        let a = sched.fork(3).unwrap();
        assert_eq!(sched.reap(a), Err(SchedError::NotZombie));
        sched.schedule();
        assert_eq!(sched.ppid(), 0);
        sched.exit(7);
        assert_eq!(sched.current(), TaskId(IDLE_TASK));
        assert!(sched.task(TaskId(IDLE_TASK)).unwrap().signal.contains(SIGCHLD));
        assert_eq!(sched.reap(a), Ok(7));
        assert_eq!(sched.reap(a), Err(SchedError::NoSuchTask));
    }

    #[test]
    fn wake_up_empties_the_slot() {
        let sched = scheduler();
        let a = sched.fork(3).unwrap();
        sched.table().set_state(a, TaskState::Uninterruptible);
        let slot = WaitSlot::new();
        slot.replace(a);
        sched.wake_up(&slot);
        assert!(slot.is_empty());
        assert_eq!(sched.task(a).unwrap().state, TaskState::Running);
    }

    #[test]
    #[should_panic(expected = "idle task attempting to sleep")]
    fn idle_may_not_sleep() {
        let sched = scheduler();
        sched.sleep_on(&WaitSlot::new());
    }

    #[test]
    #[should_panic(expected = "idle task attempting to exit")]
    fn idle_may_not_exit() {
        scheduler().exit(0);
    }

    #[test]
    #[should_panic(expected = "switching with interrupts masked")]
    fn switching_under_a_mask_is_fatal() {
        let sched = scheduler();
        sched.fork(3).unwrap();
        let _intr = sched.block_interrupts();
        sched.schedule();
    }

    #[test]
    fn fpu_follows_the_current_task() {
        let sched = scheduler();
        let a = sched.fork(3).unwrap();
        sched.schedule();
        assert_eq!(sched.math_state_restore(), FpuAction::Init { save: None });
        assert!(sched.task(a).unwrap().used_math);
        assert_eq!(sched.math_state_restore(), FpuAction::AlreadyLoaded);
    }

    #[test]
    fn procdump_lists_occupied_slots() {
        let sched = scheduler();
        let a = sched.fork(4).unwrap();
        let dump = sched.procdump();
        assert_eq!(dump.len(), 2);
        assert_eq!(dump[1].id, a);
        assert_eq!(dump[1].pid, 1);
        assert_eq!(dump[1].priority, 4);
    }
}
