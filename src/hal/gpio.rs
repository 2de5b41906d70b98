//! GPIO HAL for the trigger button and status LEDs.

use core::num::NonZeroU32;

use esp_idf_svc::hal::delay::BLOCK;
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, InterruptType, Output, PinDriver, Pull};
use esp_idf_svc::hal::task::notification::Notification;
use esp_idf_svc::sys::EspError;

use crate::indicator::StatusLed;
use crate::logging::now_us;
use crate::sensor::{LightSource, TriggerHandler};
use crate::{link_info, link_warn, LINK_LOG, SENSOR_LOG};

/// Push-pull LED output.
pub struct LedPin {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl LedPin {
    pub fn new(pin: AnyOutputPin) -> Result<Self, EspError> {
        Ok(Self {
            pin: PinDriver::output(pin)?,
        })
    }
}

impl StatusLed for LedPin {
    fn set(&mut self, on: bool) {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(err) = result {
            link_warn!(LINK_LOG, "LED write failed: {}", err);
        }
    }

    fn toggle(&mut self) {
        if let Err(err) = self.pin.toggle() {
            link_warn!(LINK_LOG, "LED toggle failed: {}", err);
        }
    }
}

/// Trigger task body.
///
/// Button is active low with the internal pull-up. The interrupt only
/// notifies this task; measuring and queueing happen here. Returns only on
/// a GPIO driver error.
pub fn run_trigger_task<S: LightSource>(
    button: AnyIOPin,
    handler: TriggerHandler<S>,
) -> Result<(), EspError> {
    let mut pin = PinDriver::input(button)?;
    pin.set_pull(Pull::Up)?;
    pin.set_interrupt_type(InterruptType::NegEdge)?;

    let notification = Notification::new();
    let notifier = notification.notifier();

    // SAFETY: the callback runs in ISR context and only notifies a task.
    unsafe {
        pin.subscribe(move || {
            notifier.notify_and_yield(NonZeroU32::MIN);
        })?;
    }

    link_info!(SENSOR_LOG, "Trigger armed");

    loop {
        // Interrupts are disabled after each delivery
        pin.enable_interrupt()?;
        notification.wait(BLOCK);

        // Outcome is logged and counted by the handler
        let _ = handler.on_trigger(now_us());
    }
}
