//! Send/acknowledge coordination for BLE indications.
//!
//! This is the heart of RustLightMeter. An indication is a confirmable
//! notification: the stack accepts one, the peer confirms it, and only then
//! may the next one be issued.
//!
//! # State machine
//!
//! ```text
//!            gate open, sample dequeued
//!   Idle ───────────────────────────────▶ Sending
//!    ▲                                      │
//!    │         indicate() rejected          │ indicate() accepted
//!    ├──────────────────────────────────────┤
//!    │                                      ▼
//!    └──────── completion / timeout ─── AwaitingAck
//! ```
//!
//! # Rules
//!
//! - At most one indication is outstanding: the send lock (the mutex around
//!   the transport) is held from `indicate()` until the acknowledgment is
//!   observed
//! - The completion endpoint never takes the send lock; it only fills the
//!   acknowledgment slot and signals
//! - A rejected send is never retried and never waited on
//! - An indication that timed out stays outstanding at the stack: the slot
//!   is left orphaned, its late completion is consumed as stale, and the
//!   next send is held until that happens
//! - The completion endpoint is bound once, when the coordinator is built

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::config::AckPolicy;
use crate::error::{LinkError, TransportError};
use crate::gate::SubscriptionGate;
use crate::sample::SensorSample;
use crate::stats::LinkStats;
use crate::{link_debug, link_error, link_info, link_warn, LINK_LOG};

/// Coordinator state, observable from any context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    /// Waiting for the next sample.
    Idle = 0,
    /// Send lock held, `indicate()` in progress.
    Sending = 1,
    /// Indication accepted, waiting for the peer's confirmation.
    AwaitingAck = 2,
}

impl LinkState {
    /// Convert from raw u8 value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::Sending,
            2 => LinkState::AwaitingAck,
            _ => LinkState::Idle,
        }
    }
}

/// Completion status reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckStatus {
    /// Peer confirmed the indication.
    Confirmed,
    /// Indication failed; carries the stack's status code.
    Failed(u8),
}

/// How a sample left the coordinator when nothing went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Peer confirmed the indication.
    Confirmed,
    /// Gate closed; the sample was consumed and dropped.
    Unsubscribed,
}

/// Send-with-acknowledgment primitive of the wireless stack.
///
/// # Contract
///
/// - [`bind`](Self::bind) is called exactly once, before the first send
/// - `indicate` returning `Ok` means exactly one later call to
///   [`AckHandle::complete`] on the bound handle, including when the link
///   drops; the call may happen from any thread, even before `indicate`
///   returns
/// - `indicate` returning `Err` means no completion will follow
pub trait IndicationTransport: Send {
    /// Register the completion endpoint.
    fn bind(&mut self, completion: AckHandle);

    /// Start one indication carrying `payload`.
    fn indicate(&mut self, payload: &[u8]) -> Result<(), TransportError>;
}

/// One-shot outcome slot, re-armed for every accepted send.
#[derive(Debug, Default)]
struct AckSlot {
    armed: bool,
    outcome: Option<AckStatus>,
    /// A timed-out indication whose completion has not arrived yet.
    orphaned: bool,
}

struct AckShared {
    slot: Mutex<AckSlot>,
    done: Condvar,
}

impl AckShared {
    fn slot(&self) -> MutexGuard<'_, AckSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Completion endpoint handed to the transport.
///
/// Cloneable so the stack's confirmation and disconnection paths can both
/// hold one.
#[derive(Clone)]
pub struct AckHandle {
    shared: Arc<AckShared>,
    stats: Arc<LinkStats>,
}

impl AckHandle {
    /// Report the completion of the outstanding indication.
    ///
    /// Returns `false` if nothing was waiting (late completion after a
    /// timeout, duplicate, or no send in flight); such calls are counted as
    /// stale and otherwise ignored.
    pub fn complete(&self, status: AckStatus) -> bool {
        let mut slot = self.shared.slot();
        if slot.orphaned {
            slot.orphaned = false;
            drop(slot);

            // Releases a send held behind the timed-out indication
            self.shared.done.notify_one();
            self.stats.record_stale_ack();
            link_info!(LINK_LOG, "Late completion ({:?}) of timed-out indication", status);
            return false;
        }
        if !slot.armed || slot.outcome.is_some() {
            drop(slot);
            self.stats.record_stale_ack();
            link_debug!(LINK_LOG, "Stale indication completion ({:?}) ignored", status);
            return false;
        }
        slot.outcome = Some(status);
        drop(slot);

        self.shared.done.notify_one();
        link_info!(LINK_LOG, "Indication complete");
        true
    }

    /// Whether an accepted indication is still waiting for its completion,
    /// including one that already timed out on the sender side.
    pub fn is_pending(&self) -> bool {
        let slot = self.shared.slot();
        slot.orphaned || (slot.armed && slot.outcome.is_none())
    }
}

/// Serializes indications and waits for their acknowledgment.
pub struct Coordinator<T: IndicationTransport> {
    /// Send lock; also guards the transport's per-send parameters.
    transport: Mutex<T>,
    ack: Arc<AckShared>,
    gate: Arc<SubscriptionGate>,
    stats: Arc<LinkStats>,
    policy: AckPolicy,
    state: AtomicU8,
}

impl<T: IndicationTransport> Coordinator<T> {
    /// Build the coordinator and bind its completion endpoint into
    /// `transport`.
    pub fn new(
        mut transport: T,
        gate: Arc<SubscriptionGate>,
        stats: Arc<LinkStats>,
        policy: AckPolicy,
    ) -> Self {
        let ack = Arc::new(AckShared {
            slot: Mutex::new(AckSlot::default()),
            done: Condvar::new(),
        });

        transport.bind(AckHandle {
            shared: Arc::clone(&ack),
            stats: Arc::clone(&stats),
        });

        Self {
            transport: Mutex::new(transport),
            ack,
            gate,
            stats,
            policy,
            state: AtomicU8::new(LinkState::Idle as u8),
        }
    }

    /// Another handle on the bound completion endpoint.
    pub fn completion_handle(&self) -> AckHandle {
        AckHandle {
            shared: Arc::clone(&self.ack),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn policy(&self) -> AckPolicy {
        self.policy
    }

    #[inline]
    fn enter(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Run one sample through gate check, send and acknowledgment wait.
    ///
    /// # Returns
    ///
    /// - `Ok(Delivery::Unsubscribed)` - Gate closed, sample dropped
    /// - `Ok(Delivery::Confirmed)` - Peer confirmed the indication
    /// - `Err(LinkError::SendRejected)` - Transport refused, nothing waited
    /// - `Err(LinkError::AckFailed)` - Completion reported a failure
    /// - `Err(LinkError::AckTimeout)` - Only with `AckPolicy::Timeout`
    /// - `Err(LinkError::AckOutstanding)` - A timed-out indication is still
    ///   unconfirmed after another policy timeout; nothing was sent
    ///
    /// Every outcome is logged and counted here; the sample is never retried.
    pub fn process_one(&self, sample: SensorSample) -> Result<Delivery, LinkError> {
        if !self.gate.is_enabled() {
            self.stats.record_unsubscribed();
            link_info!(LINK_LOG, "No indication set up, data dropped");
            return Ok(Delivery::Unsubscribed);
        }

        link_info!(LINK_LOG, "Indicating new value");
        let payload = sample.to_bytes();

        let mut transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.enter(LinkState::Sending);

        if !self.await_orphan() {
            self.enter(LinkState::Idle);
            drop(transport);

            let timeout_ms = self.policy.as_millis();
            self.stats.record_ack_outstanding();
            link_warn!(LINK_LOG, "Previous indication still unconfirmed, data dropped");
            return Err(LinkError::AckOutstanding { timeout_ms });
        }

        // Armed before the send: a transport may complete synchronously.
        self.arm();
        if let Err(err) = transport.indicate(&payload) {
            self.disarm();
            self.enter(LinkState::Idle);
            drop(transport);

            self.stats.record_rejected();
            link_error!(LINK_LOG, "Cannot complete sensor indication: {}", err);
            return Err(LinkError::SendRejected(err));
        }

        self.stats.record_indicated();
        self.enter(LinkState::AwaitingAck);
        link_debug!(LINK_LOG, "Start waiting on indication condition");

        let outcome = self.wait_for_ack();

        self.enter(LinkState::Idle);
        drop(transport);

        match outcome {
            Some(AckStatus::Confirmed) => {
                self.stats.record_confirmed();
                link_info!(LINK_LOG, "Indication success");
                Ok(Delivery::Confirmed)
            }
            Some(AckStatus::Failed(status)) => {
                self.stats.record_ack_failed();
                link_warn!(LINK_LOG, "Indication fail (status 0x{:02x})", status);
                Err(LinkError::AckFailed(status))
            }
            None => {
                let timeout_ms = self.policy.as_millis();
                self.stats.record_ack_timeout();
                link_warn!(LINK_LOG, "Indication not confirmed after {} ms", timeout_ms);
                Err(LinkError::AckTimeout { timeout_ms })
            }
        }
    }

    /// Wait for the late completion of a timed-out indication.
    ///
    /// Returns `false` if it is still outstanding after the policy timeout.
    fn await_orphan(&self) -> bool {
        let slot = self.ack.slot();
        if !slot.orphaned {
            return true;
        }

        link_debug!(LINK_LOG, "Holding send for timed-out indication");
        let slot = match self.policy.timeout() {
            None => self
                .ack
                .done
                .wait_while(slot, |slot| slot.orphaned)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.ack
                    .done
                    .wait_timeout_while(slot, timeout, |slot| slot.orphaned)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        !slot.orphaned
    }

    fn arm(&self) {
        let mut slot = self.ack.slot();
        slot.armed = true;
        slot.outcome = None;
    }

    fn disarm(&self) {
        let mut slot = self.ack.slot();
        slot.armed = false;
        slot.outcome = None;
    }

    /// Wait for the armed slot to be filled, then disarm it.
    ///
    /// `None` only when the policy timeout elapsed first; the slot is then
    /// left orphaned.
    fn wait_for_ack(&self) -> Option<AckStatus> {
        let slot = self.ack.slot();
        let mut slot = match self.policy.timeout() {
            None => self
                .ack
                .done
                .wait_while(slot, |slot| slot.outcome.is_none())
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.ack
                    .done
                    .wait_timeout_while(slot, timeout, |slot| slot.outcome.is_none())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        slot.armed = false;
        let outcome = slot.outcome.take();
        slot.orphaned = outcome.is_none();
        outcome
    }
}
