use crate::proc::task::TaskId;

/// The context-switch primitive.
///
/// Saving and loading register state is architecture work that the
/// scheduler never looks at; it only decides who runs next and hands both
/// slots to this trait. Interrupts are never masked when either method is
/// called.
pub trait ContextSwitch: Send + Sync {
    /// Switch from `prev` to `next`.
    ///
    /// Returns once `prev` has been selected again and switched back in.
    fn switch_to(&self, prev: TaskId, next: TaskId);

    /// Switch from `prev` to `next` for the last time.
    ///
    /// `prev` has exited and will never be switched back in. Hardware
    /// implementations do not return; hosted ones may, after which the
    /// caller must not touch the kernel again.
    fn exit_to(&self, prev: TaskId, next: TaskId);
}
