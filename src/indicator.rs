//! Status LEDs: connection indicator and run heartbeat.
//!
//! Pure side effects. Nothing in the transport depends on them.

use core::time::Duration;

use crate::config::{HEARTBEAT_PERIOD, STARTUP_BLINKS, STARTUP_BLINK_PERIOD};
use crate::{link_info, LINK_LOG};

/// One on/off indicator.
pub trait StatusLed: Send {
    fn set(&mut self, on: bool);

    fn toggle(&mut self);
}

/// Connection LED: lit while a peer is connected.
pub struct ConnectionIndicator<L: StatusLed> {
    led: L,
    connected: bool,
}

impl<L: StatusLed> ConnectionIndicator<L> {
    /// Take the LED and switch it off.
    pub fn new(mut led: L) -> Self {
        led.set(false);
        Self {
            led,
            connected: false,
        }
    }

    /// Connection attempt finished; `err` is the stack's failure code.
    pub fn on_connected(&mut self, err: Option<u8>) {
        match err {
            Some(code) => {
                link_info!(LINK_LOG, "Connection failed (err 0x{:02x})", code);
            }
            None => {
                link_info!(LINK_LOG, "Connected");
                self.connected = true;
                self.led.set(true);
            }
        }
    }

    pub fn on_disconnected(&mut self, reason: u8) {
        link_info!(LINK_LOG, "Disconnected (reason 0x{:02x})", reason);
        self.connected = false;
        self.led.set(false);
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Run LED pattern: on at boot, a few fast toggles, then a slow blink.
pub struct Heartbeat<L: StatusLed> {
    led: L,
    toggles: u32,
}

impl<L: StatusLed> Heartbeat<L> {
    pub fn new(mut led: L) -> Self {
        led.set(true);
        Self { led, toggles: 0 }
    }

    /// How long to wait before the next [`tick`](Self::tick).
    #[inline]
    pub fn next_delay(&self) -> Duration {
        if self.toggles < STARTUP_BLINKS {
            STARTUP_BLINK_PERIOD
        } else {
            HEARTBEAT_PERIOD
        }
    }

    /// Toggle the LED and return the delay until the next tick.
    pub fn tick(&mut self) -> Duration {
        self.led.toggle();
        self.toggles = self.toggles.saturating_add(1);
        self.next_delay()
    }
}
