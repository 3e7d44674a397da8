#![allow(dead_code)]

use minikernel::{
    hardware::{Block, BlockDevice, Direction, DiskError, RamDisk},
    logger,
    proc::{ContextSwitch, Scheduler, TaskId},
    sync::WaitSlot,
};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
};

fn stderr_sink(args: fmt::Arguments<'_>) {
    eprint!("{}", args);
}

pub fn init_logging() {
    let _ = logger::init(stderr_sink, log::LevelFilter::Debug);
}

/// Records every switch and returns at once. The test thread plays
/// whichever task is current.
#[derive(Default)]
pub struct RecordingSwitch {
    switches: Mutex<Vec<(TaskId, TaskId)>>,
    exits: Mutex<Vec<(TaskId, TaskId)>>,
}
impl RecordingSwitch {
    pub fn switches(&self) -> Vec<(TaskId, TaskId)> {
        self.switches.lock().unwrap().clone()
    }
    pub fn exits(&self) -> Vec<(TaskId, TaskId)> {
        self.exits.lock().unwrap().clone()
    }
}
impl ContextSwitch for RecordingSwitch {
    fn switch_to(&self, prev: TaskId, next: TaskId) {
        self.switches.lock().unwrap().push((prev, next));
    }
    fn exit_to(&self, prev: TaskId, next: TaskId) {
        self.exits.lock().unwrap().push((prev, next));
    }
}

pub fn recording_scheduler() -> (Arc<Scheduler>, Arc<RecordingSwitch>) {
    init_logging();
    let switch = Arc::new(RecordingSwitch::default());
    (Arc::new(Scheduler::new(switch.clone())), switch)
}

struct Turn {
    running: TaskId,
    /// Set when a task's thread panicked; everyone waiting gives up.
    failure: Option<String>,
}

/// Only the thread whose task holds the baton may run.
struct Baton {
    turn: Mutex<Turn>,
    changed: Condvar,
}
impl Baton {
    fn pass(&self, next: TaskId) {
        self.turn.lock().unwrap().running = next;
        self.changed.notify_all();
    }
    fn wait_for(&self, me: TaskId) {
        let mut turn = self.turn.lock().unwrap();
        loop {
            if let Some(failure) = &turn.failure {
                panic!("machine stopped: {}", failure);
            }
            if turn.running == me {
                return;
            }
            turn = self.changed.wait(turn).unwrap();
        }
    }
    fn poison(&self, failure: String) {
        self.turn.lock().unwrap().failure = Some(failure);
        self.changed.notify_all();
    }
}

struct BatonSwitch {
    baton: Arc<Baton>,
}
impl ContextSwitch for BatonSwitch {
    fn switch_to(&self, prev: TaskId, next: TaskId) {
        self.baton.pass(next);
        self.baton.wait_for(prev);
    }
    fn exit_to(&self, _prev: TaskId, next: TaskId) {
        self.baton.pass(next);
    }
}

/// One OS thread per task. The test thread is the idle task.
pub struct Machine {
    sched: Arc<Scheduler>,
    baton: Arc<Baton>,
    threads: Vec<JoinHandle<()>>,
}
impl Machine {
    pub fn new() -> Machine {
        init_logging();
        let baton = Arc::new(Baton {
            turn: Mutex::new(Turn {
                running: TaskId(0),
                failure: None,
            }),
            changed: Condvar::new(),
        });
        let sched = Arc::new(Scheduler::new(Arc::new(BatonSwitch {
            baton: baton.clone(),
        })));
        Machine {
            sched,
            baton,
            threads: Vec::new(),
        }
    }

    pub fn sched(&self) -> Arc<Scheduler> {
        self.sched.clone()
    }

    /// Fork a task that runs `body` once it is first scheduled, then exits.
    pub fn spawn(&mut self, priority: i32, body: impl FnOnce() + Send + 'static) -> TaskId {
        let id = self.sched.fork(priority).unwrap();
        let sched = self.sched.clone();
        let baton = self.baton.clone();
        self.threads.push(thread::spawn(move || {
            baton.wait_for(id);
            match catch_unwind(AssertUnwindSafe(body)) {
                Ok(()) => sched.exit(0),
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    baton.poison(format!("task {} panicked: {}", id.0, message));
                    resume_unwind(payload);
                }
            }
        }));
        id
    }

    /// Let other tasks run until nothing but the idle task can.
    pub fn run(&self) {
        self.sched.schedule();
    }
}

/// A ramdisk that counts transfers per block and can be told to fail
/// reads or writes, or to hold writers until released.
pub struct CountingDisk {
    inner: RamDisk,
    sched: Arc<Scheduler>,
    reads: Mutex<HashMap<(u32, u32), usize>>,
    writes: Mutex<HashMap<(u32, u32), usize>>,
    failing_reads: Mutex<HashSet<(u32, u32)>>,
    failing_writes: Mutex<HashSet<(u32, u32)>>,
    hold_writes: AtomicBool,
    writers: WaitSlot,
}
impl CountingDisk {
    pub fn new(sched: Arc<Scheduler>, nblocks: u32) -> CountingDisk {
        CountingDisk {
            inner: RamDisk::new(nblocks),
            sched,
            reads: Mutex::new(HashMap::new()),
            writes: Mutex::new(HashMap::new()),
            failing_reads: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
            hold_writes: AtomicBool::new(false),
            writers: WaitSlot::new(),
        }
    }
    pub fn reads(&self, dev: u32, block: u32) -> usize {
        *self.reads.lock().unwrap().get(&(dev, block)).unwrap_or(&0)
    }
    pub fn writes(&self, dev: u32, block: u32) -> usize {
        *self.writes.lock().unwrap().get(&(dev, block)).unwrap_or(&0)
    }
    pub fn fail_reads_of(&self, dev: u32, block: u32) {
        self.failing_reads.lock().unwrap().insert((dev, block));
    }
    /// Writes to the block are counted, then fail.
    pub fn fail_writes_of(&self, dev: u32, block: u32) {
        self.failing_writes.lock().unwrap().insert((dev, block));
    }
    pub fn heal(&self, dev: u32, block: u32) {
        self.failing_reads.lock().unwrap().remove(&(dev, block));
        self.failing_writes.lock().unwrap().remove(&(dev, block));
    }
    /// Writers park on the disk until [`release_writers`](Self::release_writers).
    pub fn hold_writes(&self) {
        self.hold_writes.store(true, Ordering::SeqCst);
    }
    pub fn has_parked_writer(&self) -> bool {
        !self.writers.is_empty()
    }
    pub fn release_writers(&self) {
        self.hold_writes.store(false, Ordering::SeqCst);
        self.sched.wake_up(&self.writers);
    }
}
impl BlockDevice for CountingDisk {
    fn transfer(
        &self,
        direction: Direction,
        dev: u32,
        block: u32,
        data: &mut Block,
    ) -> Result<(), DiskError> {
        match direction {
            Direction::Read => {
                *self.reads.lock().unwrap().entry((dev, block)).or_default() += 1;
                if self.failing_reads.lock().unwrap().contains(&(dev, block)) {
                    return Err(DiskError::Failed);
                }
            }
            Direction::Write => {
                while self.hold_writes.load(Ordering::SeqCst) {
                    self.sched.sleep_on(&self.writers);
                }
                *self.writes.lock().unwrap().entry((dev, block)).or_default() += 1;
                if self.failing_writes.lock().unwrap().contains(&(dev, block)) {
                    return Err(DiskError::Failed);
                }
            }
        }
        self.inner.transfer(direction, dev, block, data)
    }
}
