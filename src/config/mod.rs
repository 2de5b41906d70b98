//! Module: config
//!
//! Purpose: Configuration for RustLightMeter.
//!
//! Architecture:
//! - Compile-time constants: queue depth, GATT identity, LED timing
//! - LinkConfig: runtime knobs, built from defaults then NVS overrides
//! - nvs: versioned persistence of the overrides
//!
//! Safety: Safe. Plain values, read once at boot.

use core::time::Duration;

use crate::logging::LogLevel;

pub mod nvs;

pub use crate::queue::SAMPLE_QUEUE_DEPTH;

/// Advertised device name.
pub const DEVICE_NAME: &str = "Light Meter";

/// Sensor service UUID (f28e76d6-40f5-43a3-b2a4-8deac278fb30).
pub const SENSOR_SERVICE_UUID: u128 = 0xf28e76d6_40f5_43a3_b2a4_8deac278fb30;

/// Sensor characteristic UUID (f28e76d6-40f5-43a3-b2a4-8deac278fb31).
pub const SENSOR_CHAR_UUID: u128 = 0xf28e76d6_40f5_43a3_b2a4_8deac278fb31;

/// Client Characteristic Configuration descriptor UUID.
pub const CCCD_UUID: u16 = 0x2902;

/// Run LED: number of fast toggles after boot.
pub const STARTUP_BLINKS: u32 = 5;

/// Run LED: fast toggle period after boot.
pub const STARTUP_BLINK_PERIOD: Duration = Duration::from_millis(100);

/// Run LED: steady toggle period.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

/// What the sender does while an indication is outstanding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// Block until the transport reports completion.
    #[default]
    WaitForever,
    /// Give up on the acknowledgment after this long and move on.
    Timeout(Duration),
}

impl AckPolicy {
    /// `0` means wait forever.
    pub const fn from_millis(ms: u32) -> Self {
        if ms == 0 {
            AckPolicy::WaitForever
        } else {
            AckPolicy::Timeout(Duration::from_millis(ms as u64))
        }
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            AckPolicy::WaitForever => None,
            AckPolicy::Timeout(t) => Some(*t),
        }
    }

    /// Persisted form (`0` = wait forever).
    pub fn as_millis(&self) -> u32 {
        match self {
            AckPolicy::WaitForever => 0,
            AckPolicy::Timeout(t) => t.as_millis().clamp(1, u32::MAX as u128) as u32,
        }
    }
}

/// Thread parameters for one firmware task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskConfig {
    pub name: &'static str,
    pub stack_size: usize,
    /// FreeRTOS priority (applied on target only).
    pub priority: u8,
}

/// Runtime configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkConfig {
    /// Acknowledgment wait policy of the sender.
    pub ack_policy: AckPolicy,
    /// Trigger edges closer than this to the last accepted one are ignored.
    pub debounce_ms: u32,
    /// Most verbose level kept by the log streams.
    pub log_level: LogLevel,
    pub sender_task: TaskConfig,
    pub trigger_task: TaskConfig,
}

impl LinkConfig {
    /// Debounce window in microseconds.
    #[inline]
    pub fn debounce_us(&self) -> i64 {
        self.debounce_ms as i64 * 1000
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_policy: AckPolicy::WaitForever,
            debounce_ms: 20,
            log_level: LogLevel::Debug,
            sender_task: TaskConfig {
                name: "comm",
                stack_size: 4096,
                priority: 5,
            },
            trigger_task: TaskConfig {
                name: "sensor",
                stack_size: 3072,
                priority: 5,
            },
        }
    }
}
