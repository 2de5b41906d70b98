//! RustLightMeter - Main entry point
//!
//! 1. Load configuration (defaults + NVS overrides)
//! 2. Start the UART log drain
//! 3. Bring up the BLE GATT server and the coordinator
//! 4. Spawn the sender and trigger tasks
//! 5. Run the heartbeat LED forever

#[cfg(target_os = "espidf")]
fn main() -> Result<(), firmware::InitError> {
    firmware::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    println!(
        "{} runs on ESP-IDF targets; host builds are for tests only",
        env!("VERSION_STRING")
    );
}

#[cfg(target_os = "espidf")]
mod firmware {
    use std::sync::Arc;
    use std::thread;

    use esp_idf_svc::bt::{Ble, BtDriver};
    use esp_idf_svc::hal::gpio::AnyIOPin;
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys::EspError;
    use thiserror::Error;

    use rust_light_meter::config::nvs::{self, MigrationResult, NvsOverrides};
    use rust_light_meter::config::{LinkConfig, SAMPLE_QUEUE_DEPTH};
    use rust_light_meter::hal::{self, run_trigger_task, LedPin, SensorServer};
    use rust_light_meter::indicator::Heartbeat;
    use rust_light_meter::uart_logger::{init_uart_logger, uart_logger_task, UartLoggerConfig};
    use rust_light_meter::{
        link_error, link_info, link_warn, Coordinator, LinkStats, PeerEvents, SampleQueue,
        SenderLoop, SubscriptionGate, TestPattern, TriggerHandler, LINK_LOG, SENSOR_LOG,
    };

    const LOG_TASK_STACK: usize = 3072;

    /// Heartbeat ticks between two statistics reports.
    const STATS_REPORT_TICKS: u32 = 60;

    #[derive(Debug, Error)]
    pub enum InitError {
        #[error("ESP-IDF: {0}")]
        Esp(#[from] EspError),
        #[error("task spawn: {0}")]
        Spawn(#[from] std::io::Error),
    }

    fn load_config(partition: &EspDefaultNvsPartition) -> LinkConfig {
        let mut config = LinkConfig::default();

        match nvs::load_overrides(partition.clone()) {
            Ok((overrides, status)) => {
                let applied = overrides.apply(&mut config);
                link_info!(LINK_LOG, "NVS: {:?}, {} override(s) applied", status, applied);

                if status == MigrationResult::FreshInstall {
                    // Stamp the schema version
                    if let Err(err) = nvs::save_overrides(partition.clone(), &NvsOverrides::default()) {
                        link_warn!(LINK_LOG, "NVS save failed: {}", err);
                    }
                }
            }
            Err(err) => {
                link_warn!(LINK_LOG, "NVS load failed: {}, using defaults", err);
            }
        }

        config
    }

    pub fn run() -> Result<(), InitError> {
        esp_idf_svc::sys::link_patches();

        let peripherals = Peripherals::take()?;
        let nvs_partition = EspDefaultNvsPartition::take()?;

        let config = load_config(&nvs_partition);
        LINK_LOG.set_max_level(config.log_level);
        SENSOR_LOG.set_max_level(config.log_level);

        // Log drain first so init messages reach the UART
        let uart = init_uart_logger(
            peripherals.uart1,
            peripherals.pins.gpio17,
            &UartLoggerConfig::default(),
        )?;
        thread::Builder::new()
            .name("log".into())
            .stack_size(LOG_TASK_STACK)
            .spawn(move || {
                uart_logger_task(uart);
            })?;

        link_info!(LINK_LOG, "{} starting", env!("VERSION_STRING"));
        link_info!(LINK_LOG, "Ack policy: {:?}", config.ack_policy);

        let queue = Arc::new(SampleQueue::<SAMPLE_QUEUE_DEPTH>::new());
        let gate = Arc::new(SubscriptionGate::new());
        let stats = Arc::new(LinkStats::new());

        // BLE: server first, coordinator binds its completion endpoint into it
        let bt = Arc::new(BtDriver::<Ble>::new(peripherals.modem, Some(nvs_partition))?);
        let conn_led = LedPin::new(peripherals.pins.gpio5.into())?;
        let server = SensorServer::new(bt, PeerEvents::new(conn_led, Arc::clone(&gate)))?;
        let coordinator = Arc::new(Coordinator::new(
            server.transport(),
            Arc::clone(&gate),
            Arc::clone(&stats),
            config.ack_policy,
        ));
        server.start()?;

        hal::apply_task_config(&config.sender_task)?;
        SenderLoop::new(Arc::clone(&queue), coordinator).spawn(&config.sender_task)?;

        let handler = TriggerHandler::new(
            queue,
            TestPattern::new(),
            config.debounce_us(),
            Arc::clone(&stats),
        );
        let button: AnyIOPin = peripherals.pins.gpio0.into();
        hal::apply_task_config(&config.trigger_task)?;
        thread::Builder::new()
            .name(config.trigger_task.name.into())
            .stack_size(config.trigger_task.stack_size)
            .spawn(move || {
                if let Err(err) = run_trigger_task(button, handler) {
                    link_error!(SENSOR_LOG, "Trigger task stopped: {}", err);
                }
            })?;
        hal::reset_task_config()?;

        let mut heartbeat = Heartbeat::new(LedPin::new(peripherals.pins.gpio4.into())?);
        let mut delay = heartbeat.next_delay();
        let mut ticks = 0u32;

        loop {
            thread::sleep(delay);
            delay = heartbeat.tick();

            ticks = ticks.wrapping_add(1);
            if ticks % STATS_REPORT_TICKS == 0 {
                let s = stats.snapshot();
                link_info!(
                    LINK_LOG,
                    "Stats: queued={} confirmed={} lost={} queue_full={} stale={}",
                    s.queued,
                    s.confirmed,
                    s.lost(),
                    s.queue_full,
                    s.stale_acks
                );
            }
        }
    }
}
