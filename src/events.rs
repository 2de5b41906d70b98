//! Peer event handling on the transport side.
//!
//! The BLE stack reports four things the link cares about:
//!
//! | Event                   | Effect                                        |
//! |-------------------------|-----------------------------------------------|
//! | connected               | connection LED on                             |
//! | CCC descriptor write    | subscription gate opened/closed               |
//! | indication confirmed    | completion endpoint signalled                 |
//! | disconnected            | LED off, gate closed, pending send failed     |
//!
//! Failing the pending indication on disconnect is what keeps the sender
//! from waiting forever when the confirmation can no longer arrive.

use std::sync::Arc;

use crate::gate::{CccValue, SubscriptionGate};
use crate::indicator::{ConnectionIndicator, StatusLed};
use crate::link::{AckHandle, AckStatus};
use crate::{link_info, link_warn, LINK_LOG};

/// Status reported for an indication cut short by a disconnect
/// (HCI "remote user terminated connection").
pub const DISCONNECTED_STATUS: u8 = 0x13;

/// Transport-side glue between stack events and the link.
pub struct PeerEvents<L: StatusLed> {
    indicator: ConnectionIndicator<L>,
    gate: Arc<SubscriptionGate>,
    completion: Option<AckHandle>,
}

impl<L: StatusLed> PeerEvents<L> {
    pub fn new(led: L, gate: Arc<SubscriptionGate>) -> Self {
        Self {
            indicator: ConnectionIndicator::new(led),
            gate,
            completion: None,
        }
    }

    /// Store the coordinator's completion endpoint.
    pub fn bind_completion(&mut self, completion: AckHandle) {
        self.completion = Some(completion);
    }

    pub fn on_connected(&mut self, err: Option<u8>) {
        self.indicator.on_connected(err);
    }

    pub fn on_disconnected(&mut self, reason: u8) {
        self.indicator.on_disconnected(reason);
        self.gate.set(false);

        if let Some(completion) = &self.completion {
            if completion.is_pending() && completion.complete(AckStatus::Failed(DISCONNECTED_STATUS)) {
                link_warn!(LINK_LOG, "Pending indication failed by disconnect");
            }
        }
    }

    /// Peer wrote the sensor characteristic's CCC descriptor.
    pub fn on_ccc_write(&mut self, raw: u16) -> CccValue {
        let value = self.gate.apply_ccc_write(raw);
        link_info!(LINK_LOG, "Sensor indication is set to: {}", raw);
        value
    }

    /// Stack finished an indication (confirmed by the peer or not).
    ///
    /// Returns `false` if no indication was waiting.
    pub fn on_indication_done(&mut self, status: AckStatus) -> bool {
        match &self.completion {
            Some(completion) => completion.complete(status),
            None => {
                link_warn!(LINK_LOG, "Indication completion before link bound");
                false
            }
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.indicator.is_connected()
    }

    #[inline]
    pub fn gate(&self) -> &Arc<SubscriptionGate> {
        &self.gate
    }
}
