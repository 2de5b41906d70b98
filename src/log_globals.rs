//! Global log stream instances.
//!
//! One stream per execution context family, each drained by the log task.

use crate::logging::LogStream;

/// Trigger-side log stream.
///
/// Written by the trigger task (edge handling, queue-full drops).
pub static SENSOR_LOG: LogStream = LogStream::new();

/// Link-side log stream.
///
/// Written by the sender loop and the BLE stack callbacks (connection,
/// subscription and confirmation events).
pub static LINK_LOG: LogStream = LogStream::new();
