//! # RustLightMeter
//!
//! BLE light sensor: one button press, one measurement, one confirmed
//! indication.
//!
//! ## Architecture
//!
//! ```text
//! GPIO edge ─▶ TriggerHandler ─▶ SampleQueue (16) ─▶ SenderLoop ─▶ Coordinator ─▶ transport
//!                                                                        ▲              │
//!                                                    PeerEvents ─────────┴── completion ┘
//! ```
//!
//! - Producers never wait: a full queue drops the new sample
//! - One consumer, at most one indication in flight
//! - The subscription gate is written by the stack, read by the sender
//! - Logging goes through lock-free rings drained by a separate task
//!
//! Hardware bindings live in `hal` and only exist on the ESP-IDF target;
//! everything else builds and tests on the host.

pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod indicator;
pub mod link;
pub mod log_globals;
pub mod logging;
pub mod queue;
pub mod sample;
pub mod sender;
pub mod sensor;
pub mod stats;
pub mod uart_logger;

#[cfg(target_os = "espidf")]
pub mod hal;

pub use config::{AckPolicy, LinkConfig};
pub use error::{LinkError, TransportError};
pub use events::PeerEvents;
pub use gate::{CccValue, SubscriptionGate};
pub use link::{AckHandle, AckStatus, Coordinator, Delivery, IndicationTransport, LinkState};
pub use log_globals::{LINK_LOG, SENSOR_LOG};
pub use queue::SampleQueue;
pub use sample::{SensorSample, TestPattern};
pub use sender::SenderLoop;
pub use sensor::{LightSource, TriggerHandler};
pub use stats::LinkStats;
