//! Integration tests for peer event handling
//!
//! Drives PeerEvents the way the BLE callbacks do, with the coordinator's
//! completion endpoint bound through the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rust_light_meter::events::DISCONNECTED_STATUS;
use rust_light_meter::indicator::StatusLed;
use rust_light_meter::{
    AckHandle, AckPolicy, AckStatus, CccValue, Coordinator, Delivery, IndicationTransport,
    LinkError, LinkState, LinkStats, PeerEvents, SensorSample, SubscriptionGate, TransportError,
};

/// LED whose state the test can observe after handing it over.
#[derive(Clone, Default)]
struct SharedLed(Arc<AtomicBool>);

impl SharedLed {
    fn is_on(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl StatusLed for SharedLed {
    fn set(&mut self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }

    fn toggle(&mut self) {
        self.0.fetch_xor(true, Ordering::SeqCst);
    }
}

/// Accepts indications; completions come from PeerEvents only.
struct StackTransport {
    events: Arc<Mutex<PeerEvents<SharedLed>>>,
}

impl IndicationTransport for StackTransport {
    fn bind(&mut self, completion: AckHandle) {
        self.events.lock().unwrap().bind_completion(completion);
    }

    fn indicate(&mut self, _payload: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
}

struct Fixture {
    led: SharedLed,
    gate: Arc<SubscriptionGate>,
    stats: Arc<LinkStats>,
    events: Arc<Mutex<PeerEvents<SharedLed>>>,
    coordinator: Arc<Coordinator<StackTransport>>,
}

fn fixture() -> Fixture {
    let led = SharedLed(Arc::new(AtomicBool::new(true)));
    let gate = Arc::new(SubscriptionGate::new());
    let stats = Arc::new(LinkStats::new());
    let events = Arc::new(Mutex::new(PeerEvents::new(led.clone(), Arc::clone(&gate))));
    let coordinator = Arc::new(Coordinator::new(
        StackTransport {
            events: Arc::clone(&events),
        },
        Arc::clone(&gate),
        Arc::clone(&stats),
        AckPolicy::WaitForever,
    ));
    Fixture {
        led,
        gate,
        stats,
        events,
        coordinator,
    }
}

fn send_in_background(fx: &Fixture, lumens: u32) -> thread::JoinHandle<Result<Delivery, LinkError>> {
    let coordinator = Arc::clone(&fx.coordinator);
    let handle = thread::spawn(move || coordinator.process_one(SensorSample::new(lumens)));

    let deadline = Instant::now() + Duration::from_secs(2);
    while fx.coordinator.state() != LinkState::AwaitingAck {
        assert!(Instant::now() < deadline, "send never reached AwaitingAck");
        thread::sleep(Duration::from_millis(1));
    }
    handle
}

#[test]
fn test_connection_led() {
    let fx = fixture();
    assert!(!fx.led.is_on(), "LED should start off");

    fx.events.lock().unwrap().on_connected(Some(0x3e));
    assert!(!fx.led.is_on(), "failed connection leaves LED off");

    fx.events.lock().unwrap().on_connected(None);
    assert!(fx.led.is_on());
    assert!(fx.events.lock().unwrap().is_connected());

    fx.events.lock().unwrap().on_disconnected(0x13);
    assert!(!fx.led.is_on());
}

#[test]
fn test_ccc_write_drives_gate() {
    let fx = fixture();
    let mut events = fx.events.lock().unwrap();

    assert_eq!(events.on_ccc_write(0x0002), CccValue::Indicate);
    assert!(fx.gate.is_enabled());

    assert_eq!(events.on_ccc_write(0x0001), CccValue::Notify);
    assert!(!fx.gate.is_enabled(), "notify-only keeps the gate closed");

    events.on_ccc_write(0x0002);
    assert_eq!(events.on_ccc_write(0x0000), CccValue::Disabled);
    assert!(!fx.gate.is_enabled());
}

#[test]
fn test_confirm_event_completes_send() {
    let fx = fixture();
    fx.events.lock().unwrap().on_ccc_write(0x0002);

    let sender = send_in_background(&fx, 0x1234_5600);
    assert!(fx
        .events
        .lock()
        .unwrap()
        .on_indication_done(AckStatus::Confirmed));

    assert_eq!(sender.join().unwrap(), Ok(Delivery::Confirmed));
    assert_eq!(fx.stats.confirmed(), 1);
}

#[test]
fn test_disconnect_fails_pending_send_and_closes_gate() {
    let fx = fixture();
    {
        let mut events = fx.events.lock().unwrap();
        events.on_connected(None);
        events.on_ccc_write(0x0002);
    }

    let sender = send_in_background(&fx, 7);
    fx.events.lock().unwrap().on_disconnected(0x08);

    assert_eq!(
        sender.join().unwrap(),
        Err(LinkError::AckFailed(DISCONNECTED_STATUS))
    );
    assert!(!fx.gate.is_enabled());
    assert_eq!(fx.coordinator.state(), LinkState::Idle);

    // Nothing is indicated until the peer subscribes again
    assert_eq!(
        fx.coordinator.process_one(SensorSample::new(8)),
        Ok(Delivery::Unsubscribed)
    );
}

#[test]
fn test_disconnect_without_pending_send_is_quiet() {
    let fx = fixture();
    fx.events.lock().unwrap().on_disconnected(0x13);
    assert_eq!(fx.stats.stale_acks(), 0);
}

#[test]
fn test_confirm_without_send_is_ignored() {
    let fx = fixture();
    assert!(!fx
        .events
        .lock()
        .unwrap()
        .on_indication_done(AckStatus::Confirmed));
    assert_eq!(fx.stats.stale_acks(), 1);
}

#[test]
fn test_completion_before_binding() {
    let gate = Arc::new(SubscriptionGate::new());
    let mut events = PeerEvents::new(SharedLed::default(), gate);
    assert!(!events.on_indication_done(AckStatus::Confirmed));
}

#[test]
fn test_disconnect_clears_timed_out_indication() {
    let gate = Arc::new(SubscriptionGate::new());
    let stats = Arc::new(LinkStats::new());
    let events = Arc::new(Mutex::new(PeerEvents::new(SharedLed::default(), Arc::clone(&gate))));
    let coordinator = Arc::new(Coordinator::new(
        StackTransport {
            events: Arc::clone(&events),
        },
        Arc::clone(&gate),
        Arc::clone(&stats),
        AckPolicy::from_millis(200),
    ));

    events.lock().unwrap().on_ccc_write(0x0002);
    assert_eq!(
        coordinator.process_one(SensorSample::new(1)),
        Err(LinkError::AckTimeout { timeout_ms: 200 })
    );

    // Link loss accounts for the unconfirmed indication
    events.lock().unwrap().on_disconnected(0x08);
    assert_eq!(stats.stale_acks(), 1);

    events.lock().unwrap().on_ccc_write(0x0002);
    let sender = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.process_one(SensorSample::new(2)))
    };
    let deadline = Instant::now() + Duration::from_secs(2);
    while coordinator.state() != LinkState::AwaitingAck {
        assert!(Instant::now() < deadline, "send never reached AwaitingAck");
        thread::sleep(Duration::from_millis(1));
    }

    assert!(events.lock().unwrap().on_indication_done(AckStatus::Confirmed));
    assert_eq!(sender.join().unwrap(), Ok(Delivery::Confirmed));
    assert_eq!(stats.ack_outstanding(), 0);
}
