//! Interrupt-safe spinlock
//!
//! `CriticalLock` pairs a [`spin::Mutex`] with a per-core critical section so
//! that a lock holder can never be interrupted by code that wants the same
//! lock on the same core. The section is entered before spinning and left
//! after the lock is released.

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use super::critical::{CoreCritical, CriticalSection};
use crate::hal::Platform;

pub struct CriticalLock<T> {
    inner: Mutex<T>,
}

pub struct CriticalLockGuard<'a, T> {
    // Field order matters: the mutex is released before the section ends.
    guard: MutexGuard<'a, T>,
    _section: CriticalSection<'a>,
}

impl<T> CriticalLock<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: Mutex::new(value) }
    }

    pub fn lock<'a>(&'a self, core: &'a CoreCritical, platform: &'a dyn Platform) -> CriticalLockGuard<'a, T> {
        let section = CriticalSection::enter(core, platform);
        CriticalLockGuard { guard: self.inner.lock(), _section: section }
    }

    pub fn try_lock<'a>(
        &'a self,
        core: &'a CoreCritical,
        platform: &'a dyn Platform,
    ) -> Option<CriticalLockGuard<'a, T>> {
        let section = CriticalSection::enter(core, platform);
        self.inner
            .try_lock()
            .map(|guard| CriticalLockGuard { guard, _section: section })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Access without locking. Requires exclusive ownership.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T> Deref for CriticalLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for CriticalLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
