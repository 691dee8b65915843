//! Kernel configuration
//!
//! Fixed limits are compile-time constants; everything a board bring-up may
//! reasonably want to tune lives in [`KernelConfig`].

use log::LevelFilter;

/// Upper bound on cores (and therefore scheduling pools).
pub const MAX_CORES: usize = 8;

/// Slots per priority level in a run queue.
pub const QUEUE_CAPACITY: usize = 15;

/// Concurrent timed waits across the whole machine.
pub const MAX_WAITERS: usize = 16;

/// Longest activation name kept, in bytes. Longer names are truncated.
pub const ACT_NAME_MAX_LEN: usize = 16;

/// Device interrupt lines per core.
pub const INTERRUPT_LINES: usize = 7;

/// Pending-cause bit raised by the per-core timer.
pub const TIMER_CAUSE: u64 = 1 << INTERRUPT_LINES;

/// A non-empty level is passed over once every `1 << DECAY_SHIFT` visits
/// when lower levels have work.
pub const DECAY_SHIFT: u32 = 2;

/// Boot-time tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of cores brought up. One scheduling pool per core.
    pub cores: usize,
    /// Activation table capacity.
    pub max_activations: usize,
    /// Cycles between timer interrupts.
    pub timer_interval: u32,
    /// Minimum distance between "now" and the next compare value.
    pub timer_interval_min: u32,
    /// Message queue length for activations that don't ask for one.
    pub default_queue_len: usize,
    pub log_level: LevelFilter,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            cores: 1,
            max_activations: 64,
            timer_interval: 10_000,
            timer_interval_min: 1_000,
            default_queue_len: 16,
            log_level: LevelFilter::Info,
        }
    }

    pub const fn with_cores(self, cores: usize) -> Self {
        Self { cores, ..self }
    }

    pub const fn with_max_activations(self, max_activations: usize) -> Self {
        Self { max_activations, ..self }
    }

    pub const fn with_timer(self, timer_interval: u32, timer_interval_min: u32) -> Self {
        Self { timer_interval, timer_interval_min, ..self }
    }

    pub const fn with_default_queue_len(self, default_queue_len: usize) -> Self {
        Self { default_queue_len, ..self }
    }

    pub const fn with_log_level(self, log_level: LevelFilter) -> Self {
        Self { log_level, ..self }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.cores == 0 || self.cores > MAX_CORES {
            return Err("core count must be between 1 and MAX_CORES");
        }
        if self.max_activations == 0 || self.max_activations >= u32::MAX as usize {
            return Err("activation table capacity out of range");
        }
        if self.timer_interval == 0 || self.timer_interval > i32::MAX as u32 {
            return Err("timer interval must fit in a signed 32-bit distance");
        }
        if self.timer_interval_min > self.timer_interval {
            return Err("timer minimum exceeds timer interval");
        }
        if !self.default_queue_len.is_power_of_two() {
            return Err("message queue length must be a power of two");
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
