//! Link diagnostics for RustLightMeter.
//!
//! Counters since boot for every outcome a sample can have between the
//! trigger and the peer. Nothing here is ever reset; a snapshot is taken for
//! reporting.
//!
//! A sample ends in exactly one of: `debounced` (never measured),
//! `queue_full`, `unsubscribed`, `rejected`, `confirmed`, `ack_failed`,
//! `ack_timeouts` or `ack_outstanding`.

use core::sync::atomic::{AtomicU32, Ordering};

/// Thread-safe link counters.
///
/// Written by the trigger task, the sender loop and the BLE callbacks.
pub struct LinkStats {
    queued: AtomicU32,
    queue_full: AtomicU32,
    debounced: AtomicU32,
    unsubscribed: AtomicU32,
    indicated: AtomicU32,
    rejected: AtomicU32,
    confirmed: AtomicU32,
    ack_failed: AtomicU32,
    ack_timeouts: AtomicU32,
    ack_outstanding: AtomicU32,
    stale_acks: AtomicU32,
}

macro_rules! counter {
    ($record:ident, $get:ident) => {
        #[inline]
        pub fn $record(&self) {
            self.$get.fetch_add(1, Ordering::Relaxed);
        }

        #[inline]
        pub fn $get(&self) -> u32 {
            self.$get.load(Ordering::Relaxed)
        }
    };
}

impl LinkStats {
    pub const fn new() -> Self {
        Self {
            queued: AtomicU32::new(0),
            queue_full: AtomicU32::new(0),
            debounced: AtomicU32::new(0),
            unsubscribed: AtomicU32::new(0),
            indicated: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            confirmed: AtomicU32::new(0),
            ack_failed: AtomicU32::new(0),
            ack_timeouts: AtomicU32::new(0),
            ack_outstanding: AtomicU32::new(0),
            stale_acks: AtomicU32::new(0),
        }
    }

    counter!(record_queued, queued);
    counter!(record_queue_full, queue_full);
    counter!(record_debounced, debounced);
    counter!(record_unsubscribed, unsubscribed);
    counter!(record_indicated, indicated);
    counter!(record_rejected, rejected);
    counter!(record_confirmed, confirmed);
    counter!(record_ack_failed, ack_failed);
    counter!(record_ack_timeout, ack_timeouts);
    counter!(record_ack_outstanding, ack_outstanding);
    counter!(record_stale_ack, stale_acks);

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            queued: self.queued(),
            queue_full: self.queue_full(),
            debounced: self.debounced(),
            unsubscribed: self.unsubscribed(),
            indicated: self.indicated(),
            rejected: self.rejected(),
            confirmed: self.confirmed(),
            ack_failed: self.ack_failed(),
            ack_timeouts: self.ack_timeouts(),
            ack_outstanding: self.ack_outstanding(),
            stale_acks: self.stale_acks(),
        }
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of link counters at a point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub queued: u32,
    pub queue_full: u32,
    pub debounced: u32,
    pub unsubscribed: u32,
    pub indicated: u32,
    pub rejected: u32,
    pub confirmed: u32,
    pub ack_failed: u32,
    pub ack_timeouts: u32,
    pub ack_outstanding: u32,
    pub stale_acks: u32,
}

impl LinkSnapshot {
    /// Samples that left the queue without reaching the peer.
    ///
    /// Wraps like the counters it sums.
    pub fn lost(&self) -> u32 {
        [self.rejected, self.ack_failed, self.ack_timeouts, self.ack_outstanding]
            .into_iter()
            .fold(self.unsubscribed, u32::wrapping_add)
    }
}
