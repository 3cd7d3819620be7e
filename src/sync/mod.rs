//! Synchronization helpers shared by pools and buffers
//!
//! Pool and buffer state lives behind `std::sync::Mutex`. A panic while a
//! lock is held must not turn every later call into a panic, so poisoned
//! locks are recovered and the protected state is used as-is.

pub mod wait;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use wait::{CooperativeWait, LivenessCheck, WaitOutcome, WaitTiming};

/// Lock a mutex, recovering the guard if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-lock, recovering from poison
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-lock, recovering from poison
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
