use crate::{arch::trap::InterruptBlocker, proc::cpu::Cpu};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut, Drop},
    sync::atomic::{AtomicBool, Ordering},
};

pub struct SpinMutex<T> {
    locked: AtomicBool,
    inner: UnsafeCell<T>,
}
impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> SpinMutex<T> {
        SpinMutex {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(value),
        }
    }
    /// Spin until the mutex is unlocked, acquiring afterwards.
    ///
    /// Interrupts stay as they are, so the guard may be held across a
    /// sleep. Only use this for data that interrupt handlers never touch.
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.spin();
        SpinMutexGuard {
            mutex: self,
            _intr: None,
        }
    }
    /// Mask interrupts on `cpu`, then spin until the mutex is unlocked.
    ///
    /// The guard unlocks before unmasking. It must not be held across a
    /// context switch.
    pub fn lock_masked<'m>(&'m self, cpu: &'m Cpu) -> SpinMutexGuard<'m, T> {
        let intr = InterruptBlocker::new(cpu);
        self.spin();
        SpinMutexGuard {
            mutex: self,
            _intr: Some(intr),
        }
    }
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
    fn spin(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}
unsafe impl<T> Sync for SpinMutex<T> where T: Send {}
unsafe impl<T> Send for SpinMutex<T> where T: Send {}

pub struct SpinMutexGuard<'m, T> {
    mutex: &'m SpinMutex<T>,
    // Dropped after the unlock in Drop::drop.
    _intr: Option<InterruptBlocker<'m>>,
}
impl<'m, T> Deref for SpinMutexGuard<'m, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.inner.get() }
    }
}
impl<'m, T> DerefMut for SpinMutexGuard<'m, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.inner.get() }
    }
}
impl<'m, T> Drop for SpinMutexGuard<'m, T> {
    fn drop(&mut self) {
        unsafe { self.mutex.unlock() }
    }
}
