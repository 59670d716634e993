//! Shared cells written by the background transfer and read by observers.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared upload percentage (0–100).
///
/// Written by the single background transfer task, read by any number of
/// observers. Stable at 100 once the transfer succeeds.
#[derive(Debug, Default)]
pub struct ProgressCell(AtomicU64);

impl ProgressCell {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Records a new percentage, clamped to 100.
    pub fn set(&self, percent: u64) {
        self.0.store(percent.min(100), Ordering::Relaxed);
    }

    /// Returns the last recorded percentage.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// First-failure slot shared between the background transfer and the
/// lifecycle manager.
///
/// Only the first [`set`](ErrorSlot::set) wins; later errors are dropped so
/// the original failure is never masked.
#[derive(Debug, Default)]
pub struct ErrorSlot<E> {
    inner: Mutex<Option<E>>,
}

impl<E> ErrorSlot<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn set(&self, err: E) {
        let mut slot = self.inner.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    pub fn take(&self) -> Option<E> {
        self.inner.lock().unwrap().take()
    }
}
