//! Fixed-size pool of signing slots.
//!
//! One slot is one in-flight call to the signer, held from dispatch until the
//! worker has finished its post-success cooldown (or given up).

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// A semaphore-backed pool bounding concurrent downstream calls.
#[derive(Debug, Clone)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. Dropping it returns the slot to the pool.
pub type Slot = OwnedSemaphorePermit;

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits until a slot is free.
    pub async fn acquire(&self) -> Result<Slot, AcquireError> {
        Arc::clone(&self.semaphore).acquire_owned().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}
