//! Log drain: LogStream rings → UART.
//!
//! The drain runs in its own low-priority task and is the only place where
//! log output may block.
//!
//! # Hardware Setup
//!
//! ```text
//! ESP32-S3 GPIO17 (UART1 TX) ──────▶ USB-UART RX
//!                                     └─▶ PC Serial Monitor
//! ```

use crate::logging::{BufWriter, LogEntry, LogStream};

#[cfg(target_os = "espidf")]
use crate::{LINK_LOG, SENSOR_LOG};

#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::gpio;
#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::peripheral::Peripheral;
#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::uart::{self, UartTxDriver};

/// Period of the dropped-messages report.
pub const DROP_REPORT_PERIOD_US: i64 = 10_000_000;

/// UART configuration for logging.
pub struct UartLoggerConfig {
    pub baud_rate: u32,
    pub tx_pin: u8,
}

impl Default for UartLoggerConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            tx_pin: 17, // UART1 default TX on ESP32-S3
        }
    }
}

/// Byte sink for formatted log lines.
pub trait LogSink {
    fn write_line(&mut self, line: &[u8]);
}

impl LogSink for Vec<u8> {
    fn write_line(&mut self, line: &[u8]) {
        self.extend_from_slice(line);
    }
}

/// Format log entry to string.
///
/// Format: `[timestamp_us] LEVEL: message\n`
pub fn format_log_entry(entry: &LogEntry, buf: &mut [u8]) -> usize {
    use core::fmt::Write;

    let mut writer = BufWriter { buf, pos: 0 };
    let _ = write!(
        writer,
        "[{:10}] {}: {}\n",
        entry.timestamp_us,
        entry.level.as_str(),
        entry.message()
    );
    writer.pos
}

/// Write every published entry of `streams`, in stream order, to `sink`.
///
/// Returns the number of entries written.
pub fn drain_streams<const N: usize, S: LogSink + ?Sized>(
    streams: &[&LogStream<N>],
    sink: &mut S,
) -> usize {
    let mut format_buf = [0u8; 256];
    let mut written = 0;

    for stream in streams {
        while let Some(entry) = stream.drain() {
            let len = format_log_entry(&entry, &mut format_buf);
            sink.write_line(&format_buf[..len]);
            written += 1;
        }
    }

    written
}

/// Emit a warning line with per-stream drop counts, then reset them.
///
/// Returns `false` (and writes nothing) if nothing was dropped.
pub fn report_dropped<const N: usize, S: LogSink + ?Sized>(
    streams: &[(&str, &LogStream<N>)],
    sink: &mut S,
) -> bool {
    use core::fmt::Write;

    if streams.iter().all(|(_, stream)| stream.dropped() == 0) {
        return false;
    }

    let mut msg = [0u8; 96];
    let mut writer = BufWriter { buf: &mut msg, pos: 0 };
    let _ = write!(writer, "[WARN] Dropped:");
    for (name, stream) in streams {
        let _ = write!(writer, " {}={}", name, stream.dropped());
        stream.reset_dropped();
    }
    let _ = writer.write_str("\n");
    let len = writer.pos;

    sink.write_line(&msg[..len]);
    true
}

#[cfg(target_os = "espidf")]
impl LogSink for UartTxDriver<'_> {
    fn write_line(&mut self, line: &[u8]) {
        let _ = self.write(line);
    }
}

/// Initialize UART1 TX-only for logging output.
#[cfg(target_os = "espidf")]
pub fn init_uart_logger<'d>(
    uart: impl Peripheral<P = esp_idf_svc::hal::uart::UART1> + 'd,
    tx_pin: impl Peripheral<P = impl gpio::OutputPin> + 'd,
    config: &UartLoggerConfig,
) -> Result<UartTxDriver<'d>, esp_idf_svc::sys::EspError> {
    let uart_config = uart::config::Config::default()
        .baudrate(esp_idf_svc::hal::units::Hertz(config.baud_rate));

    UartTxDriver::new(
        uart,
        tx_pin,
        Option::<gpio::AnyIOPin>::None, // CTS
        Option::<gpio::AnyIOPin>::None, // RTS
        &uart_config,
    )
}

/// UART log consumer task.
///
/// Drains LINK_LOG then SENSOR_LOG, reports drops every 10 seconds.
#[cfg(target_os = "espidf")]
pub fn uart_logger_task(mut uart: UartTxDriver<'static>) -> ! {
    use std::time::Duration;

    let mut last_dropped_report = 0i64;

    loop {
        let written = drain_streams(&[&LINK_LOG, &SENSOR_LOG], &mut uart);

        let now = crate::logging::now_us();
        if now - last_dropped_report > DROP_REPORT_PERIOD_US {
            report_dropped(&[("LINK", &LINK_LOG), ("SENSOR", &SENSOR_LOG)], &mut uart);
            last_dropped_report = now;
        }

        // If no work, wait before checking again
        if written == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
