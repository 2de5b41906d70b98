//! Integration tests for the send/acknowledge coordinator
//!
//! Transport doubles complete indications from other threads, the way the
//! BLE stack does:
//! - At most one indication in flight
//! - Completion releases exactly one waiting send
//! - Rejected sends are neither waited on nor retried
//! - Closed gate consumes samples without touching the transport
//! - A timed-out indication keeps the next send from starting until its
//!   late completion arrives

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rust_light_meter::{
    AckHandle, AckPolicy, AckStatus, Coordinator, Delivery, IndicationTransport, LinkError,
    LinkState, LinkStats, SensorSample, SubscriptionGate, TransportError,
};

/// Completes every indication from a helper thread after `delay`.
struct DelayedAckTransport {
    completion: Option<AckHandle>,
    delay: Duration,
    in_flight: Arc<AtomicBool>,
    overlaps: Arc<AtomicU32>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl DelayedAckTransport {
    fn new(delay: Duration) -> Self {
        Self {
            completion: None,
            delay,
            in_flight: Arc::new(AtomicBool::new(false)),
            overlaps: Arc::new(AtomicU32::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl IndicationTransport for DelayedAckTransport {
    fn bind(&mut self, completion: AckHandle) {
        self.completion = Some(completion);
    }

    fn indicate(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.sent.lock().unwrap().push(payload.to_vec());

        let completion = self.completion.clone().expect("transport not bound");
        let in_flight = Arc::clone(&self.in_flight);
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            in_flight.store(false, Ordering::SeqCst);
            completion.complete(AckStatus::Confirmed);
        });
        Ok(())
    }
}

/// Accepts indications and hands the completion to the test.
struct ManualTransport {
    completion: Arc<Mutex<Option<AckHandle>>>,
    calls: Arc<AtomicU32>,
}

impl IndicationTransport for ManualTransport {
    fn bind(&mut self, completion: AckHandle) {
        *self.completion.lock().unwrap() = Some(completion);
    }

    fn indicate(&mut self, _payload: &[u8]) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Refuses every indication.
struct RejectingTransport {
    calls: Arc<AtomicU32>,
}

impl IndicationTransport for RejectingTransport {
    fn bind(&mut self, _completion: AckHandle) {}

    fn indicate(&mut self, _payload: &[u8]) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Stack(-1))
    }
}

fn open_gate() -> Arc<SubscriptionGate> {
    let gate = Arc::new(SubscriptionGate::new());
    gate.set(true);
    gate
}

fn wait_for_state<T: IndicationTransport>(coordinator: &Coordinator<T>, state: LinkState) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while coordinator.state() != state {
        assert!(Instant::now() < deadline, "timed out waiting for {:?}", state);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_at_most_one_indication_in_flight() {
    let transport = DelayedAckTransport::new(Duration::from_millis(5));
    let overlaps = Arc::clone(&transport.overlaps);
    let sent = Arc::clone(&transport.sent);
    let stats = Arc::new(LinkStats::new());
    let coordinator = Arc::new(Coordinator::new(
        transport,
        open_gate(),
        Arc::clone(&stats),
        AckPolicy::WaitForever,
    ));

    // Several callers race for the send lock
    let senders: Vec<_> = (0..4u32)
        .map(|t| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                for i in 0..5 {
                    let result = coordinator.process_one(SensorSample::new(t * 10 + i));
                    assert_eq!(result, Ok(Delivery::Confirmed));
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0, "indications overlapped");
    assert_eq!(sent.lock().unwrap().len(), 20);
    assert_eq!(stats.confirmed(), 20);
    assert_eq!(coordinator.state(), LinkState::Idle);
}

#[test]
fn test_completion_releases_waiting_send() {
    let completion = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicU32::new(0));
    let transport = ManualTransport {
        completion: Arc::clone(&completion),
        calls: Arc::clone(&calls),
    };
    let coordinator = Arc::new(Coordinator::new(
        transport,
        open_gate(),
        Arc::new(LinkStats::new()),
        AckPolicy::WaitForever,
    ));
    let handle = completion.lock().unwrap().clone().unwrap();

    let sender = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.process_one(SensorSample::new(1)))
    };

    wait_for_state(&coordinator, LinkState::AwaitingAck);
    thread::sleep(Duration::from_millis(20));
    assert!(!sender.is_finished(), "send returned before completion");
    assert!(handle.is_pending());

    assert!(handle.complete(AckStatus::Confirmed));
    assert_eq!(sender.join().unwrap(), Ok(Delivery::Confirmed));

    // Exactly one further send is possible, and it waits again
    let sender = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.process_one(SensorSample::new(2)))
    };
    wait_for_state(&coordinator, LinkState::AwaitingAck);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(handle.complete(AckStatus::Failed(0x0e)));
    assert_eq!(sender.join().unwrap(), Err(LinkError::AckFailed(0x0e)));
}

#[test]
fn test_duplicate_completion_is_stale() {
    let completion = Arc::new(Mutex::new(None));
    let transport = ManualTransport {
        completion: Arc::clone(&completion),
        calls: Arc::new(AtomicU32::new(0)),
    };
    let stats = Arc::new(LinkStats::new());
    let coordinator = Arc::new(Coordinator::new(
        transport,
        open_gate(),
        Arc::clone(&stats),
        AckPolicy::WaitForever,
    ));
    let handle = completion.lock().unwrap().clone().unwrap();

    let sender = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.process_one(SensorSample::new(1)))
    };
    wait_for_state(&coordinator, LinkState::AwaitingAck);

    assert!(handle.complete(AckStatus::Confirmed));
    sender.join().unwrap().unwrap();

    assert!(!handle.complete(AckStatus::Confirmed));
    assert_eq!(stats.stale_acks(), 1);
    assert_eq!(stats.confirmed(), 1);
}

#[test]
fn test_rejected_send_is_not_waited_on_or_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let stats = Arc::new(LinkStats::new());
    let coordinator = Coordinator::new(
        RejectingTransport {
            calls: Arc::clone(&calls),
        },
        open_gate(),
        Arc::clone(&stats),
        AckPolicy::WaitForever,
    );

    let result = coordinator.process_one(SensorSample::new(9));

    assert_eq!(
        result,
        Err(LinkError::SendRejected(TransportError::Stack(-1)))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.rejected(), 1);
    assert_eq!(stats.indicated(), 0);
    assert_eq!(coordinator.state(), LinkState::Idle);

    // Next sample gets its own single attempt
    let _ = coordinator.process_one(SensorSample::new(10));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_closed_gate_skips_transport() {
    let calls = Arc::new(AtomicU32::new(0));
    let stats = Arc::new(LinkStats::new());
    let coordinator = Coordinator::new(
        ManualTransport {
            completion: Arc::new(Mutex::new(None)),
            calls: Arc::clone(&calls),
        },
        Arc::new(SubscriptionGate::new()),
        Arc::clone(&stats),
        AckPolicy::WaitForever,
    );

    for i in 0..3 {
        assert_eq!(
            coordinator.process_one(SensorSample::new(i)),
            Ok(Delivery::Unsubscribed)
        );
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(stats.unsubscribed(), 3);
    assert_eq!(stats.snapshot().lost(), 3);
}

#[test]
fn test_gate_read_per_sample() {
    let transport = DelayedAckTransport::new(Duration::from_millis(1));
    let sent = Arc::clone(&transport.sent);
    let gate = Arc::new(SubscriptionGate::new());
    let coordinator = Coordinator::new(
        transport,
        Arc::clone(&gate),
        Arc::new(LinkStats::new()),
        AckPolicy::WaitForever,
    );

    assert_eq!(coordinator.process_one(SensorSample::new(1)), Ok(Delivery::Unsubscribed));
    gate.apply_ccc_write(0x0002);
    assert_eq!(coordinator.process_one(SensorSample::new(2)), Ok(Delivery::Confirmed));
    gate.apply_ccc_write(0x0000);
    assert_eq!(coordinator.process_one(SensorSample::new(3)), Ok(Delivery::Unsubscribed));

    assert_eq!(*sent.lock().unwrap(), vec![vec![2, 0, 0, 0]]);
}

#[test]
fn test_ack_timeout_holds_next_send_until_late_completion() {
    let completion = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicU32::new(0));
    let stats = Arc::new(LinkStats::new());
    let coordinator = Arc::new(Coordinator::new(
        ManualTransport {
            completion: Arc::clone(&completion),
            calls: Arc::clone(&calls),
        },
        open_gate(),
        Arc::clone(&stats),
        AckPolicy::from_millis(300),
    ));
    let handle = completion.lock().unwrap().clone().unwrap();

    let started = Instant::now();
    assert_eq!(
        coordinator.process_one(SensorSample::new(1)),
        Err(LinkError::AckTimeout { timeout_ms: 300 })
    );
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(handle.is_pending(), "timed-out indication still outstanding");

    let sender = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.process_one(SensorSample::new(2)))
    };

    // Late confirmation of sample 1 is not credited to sample 2
    assert!(!handle.complete(AckStatus::Confirmed));
    assert_eq!(stats.stale_acks(), 1);

    wait_for_state(&coordinator, LinkState::AwaitingAck);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!sender.is_finished(), "sample 2 returned without its own completion");
    assert_eq!(stats.confirmed(), 0);

    assert!(handle.complete(AckStatus::Confirmed));
    assert_eq!(sender.join().unwrap(), Ok(Delivery::Confirmed));
    assert_eq!(stats.confirmed(), 1);
    assert_eq!(stats.ack_timeouts(), 1);
}

#[test]
fn test_unconfirmed_timeout_drops_next_sample_without_sending() {
    let completion = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicU32::new(0));
    let stats = Arc::new(LinkStats::new());
    let coordinator = Coordinator::new(
        ManualTransport {
            completion: Arc::clone(&completion),
            calls: Arc::clone(&calls),
        },
        open_gate(),
        Arc::clone(&stats),
        AckPolicy::from_millis(10),
    );
    let handle = completion.lock().unwrap().clone().unwrap();

    assert_eq!(
        coordinator.process_one(SensorSample::new(1)),
        Err(LinkError::AckTimeout { timeout_ms: 10 })
    );
    assert_eq!(
        coordinator.process_one(SensorSample::new(2)),
        Err(LinkError::AckOutstanding { timeout_ms: 10 })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second indication issued");
    assert_eq!(stats.ack_outstanding(), 1);
    assert_eq!(coordinator.state(), LinkState::Idle);

    // Link loss finally completes sample 1; sample 3 gets a fresh send
    assert!(!handle.complete(AckStatus::Failed(0x13)));
    assert_eq!(
        coordinator.process_one(SensorSample::new(3)),
        Err(LinkError::AckTimeout { timeout_ms: 10 })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(stats.snapshot().lost(), 3);
}
