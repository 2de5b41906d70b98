//! Hardware Abstraction Layer for RustLightMeter.
//!
//! Thin wrappers around ESP-IDF peripherals and the Bluedroid stack.
//! Business logic stays in core modules, HAL is just I/O.

use esp_idf_svc::hal::task::thread::ThreadSpawnConfiguration;
use esp_idf_svc::sys::EspError;

use crate::config::TaskConfig;

pub mod ble;
pub mod gpio;

pub use ble::{EspIndicationTransport, SensorServer};
pub use gpio::{run_trigger_task, LedPin};

/// Apply `task`'s priority and stack size to the next spawned thread.
pub fn apply_task_config(task: &TaskConfig) -> Result<(), EspError> {
    ThreadSpawnConfiguration {
        stack_size: task.stack_size,
        priority: task.priority,
        ..Default::default()
    }
    .set()
}

/// Restore the default spawn configuration.
pub fn reset_task_config() -> Result<(), EspError> {
    ThreadSpawnConfiguration::default().set()
}
