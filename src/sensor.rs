//! Trigger handling: turn an input edge into a queued sample.
//!
//! The GPIO interrupt itself only wakes the trigger task; everything here
//! runs in that task and never waits. A full queue drops the new sample,
//! which is logged and counted but not reported to the interrupt path.

use core::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::LinkError;
use crate::queue::{SampleQueue, SAMPLE_QUEUE_DEPTH};
use crate::sample::{SensorSample, TestPattern};
use crate::stats::LinkStats;
use crate::{link_debug, link_warn, SENSOR_LOG};

/// Something that can take a light measurement on demand.
pub trait LightSource: Send + Sync {
    fn measure(&self) -> SensorSample;
}

impl LightSource for TestPattern {
    #[inline]
    fn measure(&self) -> SensorSample {
        self.next_sample()
    }
}

/// Rejects edges that arrive within `window_us` of the last accepted one.
pub struct Debouncer {
    window_us: i64,
    last_us: AtomicI64,
}

impl Debouncer {
    /// `window_us == 0` accepts every edge.
    pub const fn new(window_us: i64) -> Self {
        Self {
            window_us,
            last_us: AtomicI64::new(i64::MIN),
        }
    }

    /// Accept or reject an edge seen at `now_us`.
    pub fn accept(&self, now_us: i64) -> bool {
        if self.window_us <= 0 {
            return true;
        }
        let last = self.last_us.load(Ordering::Relaxed);
        if last != i64::MIN && now_us.saturating_sub(last) < self.window_us {
            return false;
        }
        self.last_us.store(now_us, Ordering::Relaxed);
        true
    }
}

/// Producer side of the sample queue.
pub struct TriggerHandler<S: LightSource, const N: usize = SAMPLE_QUEUE_DEPTH> {
    queue: Arc<SampleQueue<N>>,
    source: S,
    debounce: Debouncer,
    stats: Arc<LinkStats>,
}

impl<S: LightSource, const N: usize> TriggerHandler<S, N> {
    pub fn new(
        queue: Arc<SampleQueue<N>>,
        source: S,
        debounce_us: i64,
        stats: Arc<LinkStats>,
    ) -> Self {
        Self {
            queue,
            source,
            debounce: Debouncer::new(debounce_us),
            stats,
        }
    }

    /// Handle one trigger edge seen at `now_us`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(sample))` - Sample measured and queued
    /// - `Ok(None)` - Edge ignored (bounce), nothing measured
    /// - `Err(LinkError::QueueFull)` - Sample measured and dropped
    pub fn on_trigger(&self, now_us: i64) -> Result<Option<SensorSample>, LinkError> {
        if !self.debounce.accept(now_us) {
            self.stats.record_debounced();
            return Ok(None);
        }

        let sample = self.source.measure();
        if self.queue.try_enqueue(sample) {
            self.stats.record_queued();
            link_debug!(SENSOR_LOG, "Sample {:#010x} sent to queue", sample.lumens);
            Ok(Some(sample))
        } else {
            self.stats.record_queue_full();
            link_warn!(SENSOR_LOG, "Sample queue full, {:#010x} dropped", sample.lumens);
            Err(LinkError::QueueFull)
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
