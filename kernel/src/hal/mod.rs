//! Hardware abstraction layer
//!
//! Everything the scheduler needs from the machine goes through [`Platform`]:
//! core identification, interrupt masking, the per-core cycle counter and its
//! compare register, and the context-switch primitive. Nothing else in the
//! crate touches hardware.
//!
//! [`sim::SimPlatform`] is a deterministic implementation used by the test
//! suites and by hosted tooling.

pub mod sim;

/// Index of a physical core. Also the index of that core's scheduling pool.
pub type CoreId = usize;

/// Opaque handle to a saved register file.
///
/// The kernel never looks inside; it only hands contexts back to the platform
/// when switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Context(pub u64);

impl Context {
    /// Context of a core before its first activation has been scheduled.
    pub const BOOT: Context = Context(0);
}

/// Machine services required by the kernel.
///
/// Reschedules made from an exception (timer, device interrupt) do not call
/// [`Platform::context_switch`]: the exception return path must resume
/// whatever `Kernel::current_act` names for the core. Interrupts replayed on
/// a syscall return are switched by `Kernel::exit_critical_path` itself.
pub trait Platform: Sync {
    /// Core executing the caller.
    fn core_id(&self) -> CoreId;

    /// Mask interrupts on the calling core.
    ///
    /// Returns whether interrupts were enabled before the call.
    fn interrupts_disable(&self) -> bool;

    /// Restore the interrupt mask captured by [`Platform::interrupts_disable`].
    fn interrupts_restore(&self, was_enabled: bool);

    /// Give up the hardware thread briefly while waiting on another core.
    fn hw_yield(&self) {
        core::hint::spin_loop();
    }

    /// Free-running 32-bit cycle counter of the calling core.
    fn counter(&self) -> u32;

    /// Program the calling core's compare register.
    fn compare_set(&self, value: u32);

    /// Save the running register file into `from` and resume `to`.
    fn context_switch(&self, from: Context, to: Context);

    /// Resume `to` and discard `dying`, which will never run again.
    fn destroy_context(&self, dying: Context, to: Context);
}
