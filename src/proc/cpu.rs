use crate::proc::task::TaskId;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Per-CPU state.
///
/// There is exactly one CPU. Interrupt delivery is modelled by the
/// `interrupts_enabled` flag; the timer collaborator must not call
/// `Scheduler::on_timer` while it is clear.
pub struct Cpu {
    /// Slot of the task currently running on this CPU.
    current: AtomicUsize,
    interrupts_enabled: AtomicBool,
    /// Depth of push_intr_off() nesting.
    interrupt_disable_layers: AtomicUsize,
    /// Were interrupts enabled before push_intr_off()?
    previous_interrupts_enabled: AtomicBool,
}
impl Cpu {
    pub const fn new() -> Cpu {
        Cpu {
            current: AtomicUsize::new(crate::param::IDLE_TASK),
            interrupts_enabled: AtomicBool::new(true),
            interrupt_disable_layers: AtomicUsize::new(0),
            previous_interrupts_enabled: AtomicBool::new(true),
        }
    }

    pub fn current(&self) -> TaskId {
        TaskId(self.current.load(Ordering::SeqCst))
    }
    pub(crate) fn set_current(&self, task: TaskId) {
        self.current.store(task.0, Ordering::SeqCst);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled.load(Ordering::SeqCst)
    }
    pub fn interrupt_disable_layers(&self) -> usize {
        self.interrupt_disable_layers.load(Ordering::SeqCst)
    }

    pub(crate) fn enable_interrupts(&self) {
        self.interrupts_enabled.store(true, Ordering::SeqCst);
    }
    pub(crate) fn disable_interrupts(&self) {
        self.interrupts_enabled.store(false, Ordering::SeqCst);
    }
    pub(crate) fn push_layer(&self, interrupts_before: bool) {
        if self.interrupt_disable_layers.fetch_add(1, Ordering::SeqCst) == 0 {
            self.previous_interrupts_enabled
                .store(interrupts_before, Ordering::SeqCst);
        }
    }
    /// Returns true when the outermost layer was popped.
    pub(crate) fn pop_layer(&self) -> bool {
        self.interrupt_disable_layers.fetch_sub(1, Ordering::SeqCst) == 1
    }
    pub(crate) fn previous_interrupts_enabled(&self) -> bool {
        self.previous_interrupts_enabled.load(Ordering::SeqCst)
    }
}
impl Default for Cpu {
    fn default() -> Cpu {
        Cpu::new()
    }
}
