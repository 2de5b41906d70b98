//! Subscription gate: does the peer want samples right now?
//!
//! Written from the BLE callback context when the peer writes the Client
//! Characteristic Configuration descriptor, read by the sender loop before
//! every send. Samples are drained regardless; the gate only decides whether
//! they are indicated or discarded.

use core::sync::atomic::{AtomicBool, Ordering};

/// CCC value: notifications enabled.
pub const CCC_NOTIFY: u16 = 0x0001;

/// CCC value: indications enabled.
pub const CCC_INDICATE: u16 = 0x0002;

/// Decoded Client Characteristic Configuration write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CccValue {
    Disabled,
    Notify,
    Indicate,
    /// Reserved bit pattern.
    Unknown(u16),
}

impl CccValue {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => CccValue::Disabled,
            CCC_NOTIFY => CccValue::Notify,
            CCC_INDICATE => CccValue::Indicate,
            other => CccValue::Unknown(other),
        }
    }

    /// Whether this configuration lets the sender indicate.
    ///
    /// The sensor characteristic only supports indications, so a
    /// notify-only subscription keeps the gate closed.
    #[inline]
    pub fn allows_indication(self) -> bool {
        self == CccValue::Indicate
    }
}

/// Atomic "indications enabled" flag.
pub struct SubscriptionGate {
    enabled: AtomicBool,
}

impl SubscriptionGate {
    /// Create a closed gate.
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Apply a raw CCC descriptor write and return its decoded value.
    pub fn apply_ccc_write(&self, raw: u16) -> CccValue {
        let value = CccValue::from_raw(raw);
        self.set(value.allows_indication());
        value
    }
}

impl Default for SubscriptionGate {
    fn default() -> Self {
        Self::new()
    }
}
