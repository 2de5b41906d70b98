//! Sender loop: the single consumer of the sample queue.
//!
//! Each iteration dequeues one sample (waiting as long as needed) and hands
//! it to the [`Coordinator`], which may in turn wait for the peer's
//! confirmation. There is no exit condition; the loop lives as long as the
//! firmware does.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::TaskConfig;
use crate::error::LinkError;
use crate::link::{Coordinator, Delivery, IndicationTransport};
use crate::queue::{SampleQueue, SAMPLE_QUEUE_DEPTH};
use crate::{link_info, LINK_LOG};

/// Drives dequeue → gate check → send → wait-for-ack.
pub struct SenderLoop<T: IndicationTransport, const N: usize = SAMPLE_QUEUE_DEPTH> {
    queue: Arc<SampleQueue<N>>,
    coordinator: Arc<Coordinator<T>>,
}

impl<T: IndicationTransport, const N: usize> SenderLoop<T, N> {
    pub fn new(queue: Arc<SampleQueue<N>>, coordinator: Arc<Coordinator<T>>) -> Self {
        Self { queue, coordinator }
    }

    /// One iteration: wait for a sample, then process it.
    pub fn step(&self) -> Result<Delivery, LinkError> {
        let sample = self.queue.dequeue_blocking();
        link_info!(LINK_LOG, "Sensor data received: {}", sample.lumens);
        self.coordinator.process_one(sample)
    }

    /// Run forever. Failures are logged and counted by the coordinator.
    pub fn run(&self) -> ! {
        loop {
            let _ = self.step();
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<T>> {
        &self.coordinator
    }
}

impl<T: IndicationTransport + 'static, const N: usize> SenderLoop<T, N> {
    /// Start the loop on its own thread.
    pub fn spawn(self, task: &TaskConfig) -> io::Result<JoinHandle<()>> {
        link_info!(LINK_LOG, "Starting {} task", task.name);
        thread::Builder::new()
            .name(task.name.into())
            .stack_size(task.stack_size)
            .spawn(move || {
                self.run();
            })
    }
}
