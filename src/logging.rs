//! Non-blocking logging for RustLightMeter.
//!
//! # Architecture
//!
//! ```text
//! Trigger task / sender / BT callbacks     LogStream        Log drain task
//! ────────────────────────────────────     ─────────        ──────────────
//!
//! link_info!() ─────────────────────────▶ [L0][L1][L2] ───▶ UART TX
//! format into stack buffer                 lock-free         blocking ok
//! never blocks                             ring buffer
//! ```
//!
//! # Rules
//!
//! - The trigger and sender paths never call blocking log functions
//! - Messages are dropped (and counted) if the ring is full
//! - Entries above the stream's maximum level are discarded at push time

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Maximum message length.
pub const MAX_MSG_LEN: usize = 120;

/// Log buffer size (number of entries).
pub const LOG_BUFFER_SIZE: usize = 64;

/// Log level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// Convert to string for output.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Convert from raw u8 value (values above Trace saturate to Trace).
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// A single log entry.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct LogEntry {
    /// Timestamp in microseconds.
    pub timestamp_us: i64,
    /// Log level.
    pub level: LogLevel,
    /// Message length.
    pub len: u8,
    /// Message bytes (not null-terminated).
    pub msg: [u8; MAX_MSG_LEN],
}

impl LogEntry {
    const EMPTY: Self = Self {
        timestamp_us: 0,
        level: LogLevel::Info,
        len: 0,
        msg: [0; MAX_MSG_LEN],
    };

    /// Message text (lossy on truncated UTF-8).
    pub fn message(&self) -> &str {
        let bytes = &self.msg[..self.len as usize];
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            // Truncation may split a multi-byte char; keep the valid prefix.
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

impl Default for LogEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Lock-free log stream (multiple producers, single consumer).
///
/// Producers reserve a slot with a CAS on `write_idx`, fill it, then publish
/// it through the slot's sequence stamp. The drain only consumes a slot whose
/// stamp matches, so a reserved-but-unwritten slot is never read.
pub struct LogStream<const N: usize = LOG_BUFFER_SIZE> {
    entries: UnsafeCell<[LogEntry; N]>,
    published: [AtomicU32; N],
    write_idx: AtomicU32,
    read_idx: AtomicU32,
    dropped: AtomicU32,
    max_level: AtomicU8,
}

// SAFETY: Producers own distinct slots (CAS reservation), the single consumer
// only reads slots whose publication stamp it has observed with Acquire.
unsafe impl<const N: usize> Sync for LogStream<N> {}
unsafe impl<const N: usize> Send for LogStream<N> {}

impl<const N: usize> LogStream<N> {
    const MASK: usize = N - 1;

    /// Create a new empty log stream.
    pub const fn new() -> Self {
        assert!(N.is_power_of_two(), "Log buffer size must be power of 2");

        const UNPUBLISHED: AtomicU32 = AtomicU32::new(0);

        Self {
            entries: UnsafeCell::new([LogEntry::EMPTY; N]),
            published: [UNPUBLISHED; N],
            write_idx: AtomicU32::new(0),
            read_idx: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            max_level: AtomicU8::new(LogLevel::Debug as u8),
        }
    }

    /// Set the most verbose level this stream accepts.
    pub fn set_max_level(&self, level: LogLevel) {
        self.max_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn max_level(&self) -> LogLevel {
        LogLevel::from_u8(self.max_level.load(Ordering::Relaxed))
    }

    /// Whether a message at `level` would be kept.
    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level as u8 <= self.max_level.load(Ordering::Relaxed)
    }

    /// Push a log entry (never blocks).
    ///
    /// Returns `true` if message was queued, `false` if filtered by level or
    /// dropped (ring full). Only ring-full drops are counted.
    pub fn push(&self, timestamp_us: i64, level: LogLevel, msg: &[u8]) -> bool {
        if !self.enabled(level) {
            return false;
        }

        let mut write = self.write_idx.load(Ordering::Relaxed);
        loop {
            let read = self.read_idx.load(Ordering::Acquire);
            if write.wrapping_sub(read) >= N as u32 {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            match self.write_idx.compare_exchange_weak(
                write,
                write.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => write = current,
            }
        }

        let len = msg.len().min(MAX_MSG_LEN);
        let mut entry = LogEntry {
            timestamp_us,
            level,
            len: len as u8,
            msg: [0; MAX_MSG_LEN],
        };
        entry.msg[..len].copy_from_slice(&msg[..len]);

        let idx = (write as usize) & Self::MASK;

        // SAFETY: The CAS above gave this producer exclusive ownership of
        // `idx` until it is published and drained.
        unsafe {
            (self.entries.get() as *mut LogEntry).add(idx).write(entry);
        }

        self.published[idx].store(write.wrapping_add(1), Ordering::Release);
        true
    }

    /// Drain next log entry (single consumer).
    ///
    /// Returns `None` if no published entry is available.
    pub fn drain(&self) -> Option<LogEntry> {
        let read = self.read_idx.load(Ordering::Relaxed);
        let idx = (read as usize) & Self::MASK;

        if self.published[idx].load(Ordering::Acquire) != read.wrapping_add(1) {
            return None;
        }

        // SAFETY: Slot published for sequence `read`; producers cannot reuse
        // it until `read_idx` moves past it below.
        let entry = unsafe { (self.entries.get() as *const LogEntry).add(idx).read() };

        self.read_idx.store(read.wrapping_add(1), Ordering::Release);
        Some(entry)
    }

    /// Get count of dropped messages.
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Reset dropped counter (e.g., after reporting).
    #[inline]
    pub fn reset_dropped(&self) {
        self.dropped.store(0, Ordering::Relaxed);
    }

    /// Get number of entries reserved but not yet drained.
    #[inline]
    pub fn pending(&self) -> u32 {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

impl<const N: usize> Default for LogStream<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a message into a buffer.
///
/// Returns the number of bytes written. Output longer than the buffer is
/// truncated.
#[inline]
pub fn format_to_buffer(buf: &mut [u8], args: core::fmt::Arguments<'_>) -> usize {
    let mut writer = BufWriter { buf, pos: 0 };
    let _ = core::fmt::write(&mut writer, args);
    writer.pos
}

/// Truncating `fmt::Write` over a byte slice.
pub(crate) struct BufWriter<'a> {
    pub(crate) buf: &'a mut [u8],
    pub(crate) pos: usize,
}

impl core::fmt::Write for BufWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len() - self.pos;
        let to_write = bytes.len().min(remaining);
        self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
        self.pos += to_write;
        Ok(())
    }
}

/// Microseconds since boot.
#[cfg(target_os = "espidf")]
#[inline]
pub fn now_us() -> i64 {
    // SAFETY: esp_timer_get_time is always safe to call after boot
    unsafe { esp_idf_svc::sys::esp_timer_get_time() }
}

/// Microseconds since the first call (host builds).
#[cfg(not(target_os = "espidf"))]
#[inline]
pub fn now_us() -> i64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}

/// Non-blocking log macro.
///
/// Formats on the stack and pushes into `$stream`, timestamped with
/// [`now_us`](crate::logging::now_us).
///
/// # Example
///
/// ```ignore
/// link_log!(LogLevel::Info, LINK_LOG, "Sensor data received: {}", lumens);
/// ```
#[macro_export]
macro_rules! link_log {
    ($level:expr, $stream:expr, $($arg:tt)*) => {{
        let level = $level;
        if $stream.enabled(level) {
            let mut buf = [0u8; $crate::logging::MAX_MSG_LEN];
            let len = $crate::logging::format_to_buffer(&mut buf, format_args!($($arg)*));
            $stream.push($crate::logging::now_us(), level, &buf[..len]);
        }
    }};
}

/// Info log.
#[macro_export]
macro_rules! link_info {
    ($stream:expr, $($arg:tt)*) => {
        $crate::link_log!($crate::logging::LogLevel::Info, $stream, $($arg)*)
    };
}

/// Warning log.
#[macro_export]
macro_rules! link_warn {
    ($stream:expr, $($arg:tt)*) => {
        $crate::link_log!($crate::logging::LogLevel::Warn, $stream, $($arg)*)
    };
}

/// Error log.
#[macro_export]
macro_rules! link_error {
    ($stream:expr, $($arg:tt)*) => {
        $crate::link_log!($crate::logging::LogLevel::Error, $stream, $($arg)*)
    };
}

/// Debug log.
#[macro_export]
macro_rules! link_debug {
    ($stream:expr, $($arg:tt)*) => {
        $crate::link_log!($crate::logging::LogLevel::Debug, $stream, $($arg)*)
    };
}
