pub mod critical;
pub mod semaphore;
pub mod spinlock;

pub use critical::{CoreCritical, CriticalSection};
pub use semaphore::{KMutex, Semaphore};
pub use spinlock::{CriticalLock, CriticalLockGuard};
