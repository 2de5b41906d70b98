//! Module: sample
//!
//! Purpose: SensorSample record produced on each trigger edge and carried,
//! by value, from the trigger task to the indication sender.
//!
//! Architecture:
//! - Fixed 4-byte record, `Copy`, immutable once enqueued
//! - Wire form is the little-endian `lumens` value (the record's in-memory
//!   layout on the target), sent as the characteristic value
//! - TestPattern stands in for the light sensor: a counter bumped per trigger
//!
//! Safety: Safe. No unsafe blocks.

use core::sync::atomic::{AtomicU32, Ordering};

/// Characteristic value length of one sample.
pub const SAMPLE_WIRE_LEN: usize = 4;

/// First value emitted by [`TestPattern`].
pub const TEST_PATTERN_START: u32 = 0x1234_5600;

/// One light measurement.
///
/// Memory layout:
/// ```text
/// [lumens:4] = 4 bytes
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SensorSample {
    /// Light intensity (raw sensor units).
    pub lumens: u32,
}

impl SensorSample {
    /// All-zero sample.
    pub const EMPTY: Self = Self { lumens: 0 };

    pub const fn new(lumens: u32) -> Self {
        Self { lumens }
    }

    /// Characteristic value bytes.
    #[inline]
    pub const fn to_bytes(self) -> [u8; SAMPLE_WIRE_LEN] {
        self.lumens.to_le_bytes()
    }

    /// Decode a characteristic value (peer side, tests).
    #[inline]
    pub const fn from_bytes(bytes: [u8; SAMPLE_WIRE_LEN]) -> Self {
        Self {
            lumens: u32::from_le_bytes(bytes),
        }
    }
}

impl From<u32> for SensorSample {
    fn from(lumens: u32) -> Self {
        Self::new(lumens)
    }
}

/// Synthetic measurement source.
///
/// Each call to [`TestPattern::next_sample`] returns the current counter and
/// advances it by one, wrapping at `u32::MAX`. Shared by reference between
/// the trigger task and diagnostics, so the counter is atomic.
pub struct TestPattern {
    next: AtomicU32,
}

impl TestPattern {
    /// Pattern starting at [`TEST_PATTERN_START`].
    pub const fn new() -> Self {
        Self::starting_at(TEST_PATTERN_START)
    }

    pub const fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Produce the next sample.
    #[inline]
    pub fn next_sample(&self) -> SensorSample {
        SensorSample::new(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Value the next sample will carry (does not advance).
    #[inline]
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for TestPattern {
    fn default() -> Self {
        Self::new()
    }
}
