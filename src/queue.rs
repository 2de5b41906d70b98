//! Bounded sample queue between the trigger task and the sender loop.
//!
//! # Architecture
//!
//! ```text
//! Trigger task ──try_enqueue──▶ SampleQueue ──dequeue_blocking──▶ Sender loop
//!  (never waits)                 (16 slots)     (waits forever)
//! ```
//!
//! # Rules
//!
//! - The producer never waits for space: a full queue drops the newest sample
//! - FIFO order is preserved for every accepted sample
//! - The consumer blocks until a sample is available
//!
//! The internal lock is only held for O(1) slot manipulation; the consumer
//! releases it while waiting.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use heapless::Deque;

use crate::sample::SensorSample;

/// Default queue depth.
pub const SAMPLE_QUEUE_DEPTH: usize = 16;

/// Fixed-capacity FIFO of samples, internally synchronized.
pub struct SampleQueue<const N: usize = SAMPLE_QUEUE_DEPTH> {
    slots: Mutex<Deque<SensorSample, N>>,
    available: Condvar,
}

impl<const N: usize> SampleQueue<N> {
    /// Create an empty queue.
    ///
    /// # Panics
    ///
    /// Panics at compile time (in const contexts) if N is zero.
    pub const fn new() -> Self {
        assert!(N > 0, "Queue depth must be non-zero");

        Self {
            slots: Mutex::new(Deque::new()),
            available: Condvar::new(),
        }
    }

    #[inline]
    fn slots(&self) -> MutexGuard<'_, Deque<SensorSample, N>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample without waiting.
    ///
    /// Returns `false` (and the sample is discarded) if the queue is full.
    #[inline]
    pub fn try_enqueue(&self, sample: SensorSample) -> bool {
        let accepted = self.slots().push_back(sample).is_ok();
        if accepted {
            self.available.notify_one();
        }
        accepted
    }

    /// Remove the oldest sample, waiting as long as it takes for one.
    pub fn dequeue_blocking(&self) -> SensorSample {
        let mut slots = self.slots();
        loop {
            if let Some(sample) = slots.pop_front() {
                return sample;
            }
            slots = self
                .available
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove the oldest sample, waiting at most `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<SensorSample> {
        let slots = self.slots();
        let (mut slots, _) = self
            .available
            .wait_timeout_while(slots, timeout, |slots| slots.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        slots.pop_front()
    }

    /// Remove the oldest sample if one is queued.
    #[inline]
    pub fn try_dequeue(&self) -> Option<SensorSample> {
        self.slots().pop_front()
    }

    /// Current occupancy.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.slots().is_full()
    }

    /// Get the queue capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for SampleQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
