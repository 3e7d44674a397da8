//! Interrupt masking.
//!
//! The kernel runs on a single CPU, so masking interrupts is the whole of
//! mutual exclusion against interrupt handlers. Check-then-park sequences
//! hold an [`InterruptBlocker`] from the check until the task is parked.

use crate::proc::cpu::Cpu;
use core::marker::PhantomData;

/// Masks interrupts on `cpu` for as long as it lives. Nests.
pub struct InterruptBlocker<'c> {
    cpu: &'c Cpu,
    // Must be dropped on the task that created it.
    _not_send: PhantomData<*const ()>,
}
impl<'c> InterruptBlocker<'c> {
    pub fn new(cpu: &'c Cpu) -> InterruptBlocker<'c> {
        push_intr_off(cpu);
        InterruptBlocker {
            cpu,
            _not_send: PhantomData,
        }
    }
}
impl<'c> core::ops::Drop for InterruptBlocker<'c> {
    fn drop(&mut self) {
        pop_intr_off(self.cpu);
    }
}

pub fn push_intr_off(cpu: &Cpu) {
    let old = cpu.interrupts_enabled();
    cpu.disable_interrupts();
    cpu.push_layer(old);
}

pub fn pop_intr_off(cpu: &Cpu) {
    if cpu.interrupts_enabled() {
        panic!("pop_intr_off - interruptible");
    } else if cpu.interrupt_disable_layers() < 1 {
        panic!("pop_intr_off");
    }

    if cpu.pop_layer() && cpu.previous_interrupts_enabled() {
        cpu.enable_interrupts();
    }
}
