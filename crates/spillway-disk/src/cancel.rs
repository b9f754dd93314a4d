//! Cooperative cancellation and the merge concurrency limit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::{Result, SpillError};

/// How often a waiting merge re-checks cancellation.
const SLOT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared cancellation signal.
///
/// Cloning yields a handle to the same flag. Spill and merge code checks it
/// before every block read or write.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    /// New, not-cancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with [`SpillError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SpillError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Counting semaphore limiting how many merges run at once.
#[derive(Debug)]
pub struct MergeSlots {
    available: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

impl MergeSlots {
    /// Limit concurrent merges to `capacity` (at least one).
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            available: Mutex::new(capacity),
            released: Condvar::new(),
            capacity,
        })
    }

    /// Maximum number of concurrent merges.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    /// Block until a slot is free or `cancel` fires.
    pub fn acquire(self: &Arc<Self>, cancel: &CancellationFlag) -> Result<MergeSlot> {
        let mut available = self.available.lock();
        while *available == 0 {
            cancel.check()?;
            trace!("Waiting for a merge slot");
            self.released.wait_for(&mut available, SLOT_POLL_INTERVAL);
        }
        cancel.check()?;
        *available -= 1;
        Ok(MergeSlot {
            slots: Arc::clone(self),
        })
    }

    /// Take a slot if one is free.
    pub fn try_acquire(self: &Arc<Self>) -> Option<MergeSlot> {
        let mut available = self.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(MergeSlot {
            slots: Arc::clone(self),
        })
    }

    fn release(&self) {
        *self.available.lock() += 1;
        self.released.notify_one();
    }
}

/// A held merge slot, returned on drop.
#[derive(Debug)]
pub struct MergeSlot {
    slots: Arc<MergeSlots>,
}

impl Drop for MergeSlot {
    fn drop(&mut self) {
        self.slots.release();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancellation_flag_shared() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());

        other.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(SpillError::Cancelled)));
    }

    #[test]
    fn test_slots_limit_and_release() {
        let slots = MergeSlots::new(2);
        let a = slots.try_acquire().unwrap();
        let _b = slots.try_acquire().unwrap();
        assert!(slots.try_acquire().is_none());
        assert_eq!(slots.available(), 0);

        drop(a);
        assert_eq!(slots.available(), 1);
        assert!(slots.try_acquire().is_some());
    }

    #[test]
    fn test_zero_capacity_is_one() {
        assert_eq!(MergeSlots::new(0).capacity(), 1);
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let slots = MergeSlots::new(1);
        let held = slots.acquire(&CancellationFlag::new()).unwrap();

        let waiter = {
            let slots = Arc::clone(&slots);
            thread::spawn(move || slots.acquire(&CancellationFlag::new()).map(drop))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        waiter.join().unwrap().unwrap();
        assert_eq!(slots.available(), 1);
    }

    #[test]
    fn test_acquire_observes_cancellation() {
        let slots = MergeSlots::new(1);
        let _held = slots.try_acquire().unwrap();
        let cancel = CancellationFlag::new();

        let waiter = {
            let slots = Arc::clone(&slots);
            let cancel = cancel.clone();
            thread::spawn(move || slots.acquire(&cancel).map(drop))
        };
        cancel.cancel();

        assert!(matches!(
            waiter.join().unwrap(),
            Err(SpillError::Cancelled)
        ));
    }
}
