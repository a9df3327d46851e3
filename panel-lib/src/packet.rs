//! Decoding of validated frames into [Record]s.
//!
//! The flags byte is laid out as follows:
//!
//! | Bits | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 7..6 | format version, must be 0                            |
//! | 5    | set if this is an idle (no-trigger) return           |
//! | 4..3 | reserved, must be 0                                  |
//! | 2..0 | ADC prescaler, sample rate is `8e6 / 13.5 / 2^x`     |
use chrono::{DateTime, Local};
use tracing::debug;

use crate::framing::Frame;
use crate::{Error, Result};

/// The only supported format version.
pub const FORMAT_VERSION: u8 = 0;

/// Flag bit set when the panel returns data without having triggered.
pub const FLAG_IDLE: u8 = 1 << 5;
/// Flag bits holding the ADC prescaler.
pub const FLAG_PRESCALER: u8 = 0x07;
/// Flag bits this decoder understands. Anything else is a version mismatch.
pub const FLAGS_KNOWN: u8 = FLAG_IDLE | FLAG_PRESCALER;

/// Smallest prescaler exponent; lower values are clamped to this.
pub const MIN_PRESCALER: u8 = 2;
/// ADC clock, Hz.
pub const ADC_CLOCK_HZ: f64 = 8e6;
/// ADC clock cycles per conversion.
pub const ADC_CYCLES_PER_SAMPLE: f64 = 13.5;
/// Volts per sample unit, given the 1.1V reference.
pub const VOLTAGE_SCALE: f64 = 1.1 / 128.0;

/// Wall clock time a record was decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTime {
    /// Seconds since the Unix epoch.
    pub epoch: f64,
    /// Local time formatted as `%F %T`.
    pub local: String,
}

impl CaptureTime {
    #[must_use]
    pub fn now() -> Self {
        Self::from(Local::now())
    }
}

impl From<DateTime<Local>> for CaptureTime {
    fn from(value: DateTime<Local>) -> Self {
        CaptureTime {
            epoch: value.timestamp_micros() as f64 / 1e6,
            local: value.format("%F %T").to_string(),
        }
    }
}

/// A single decoded panel capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub captured_at: CaptureTime,
    pub format_version: u8,
    /// Trigger threshold, the panel triggers on `abs(sample) > threshold`.
    pub threshold: u8,
    pub adc_offset: i8,
    pub reserved: u8,
    pub triggered: bool,
    /// Index of the trigger sample, only for triggered captures with data.
    pub trigger_sample_index: Option<usize>,
    pub divisor: u32,
    pub sample_rate_hz: f64,
    pub voltage_scale: f64,
    /// Samples with the ADC offset removed.
    pub samples: Vec<i16>,
}

impl Record {
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Smallest and largest sample, or `None` if there are no samples.
    #[must_use]
    pub fn sample_range(&self) -> Option<(i16, i16)> {
        let min = self.samples.iter().min()?;
        let max = self.samples.iter().max()?;
        Some((*min, *max))
    }
}

/// Divisor for the prescaler bits of `flags`.
#[must_use]
pub fn divisor(flags: u8) -> u32 {
    1 << (flags & FLAG_PRESCALER).max(MIN_PRESCALER)
}

/// Sample rate in Hz for `divisor`.
#[must_use]
pub fn sample_rate_hz(divisor: u32) -> f64 {
    ADC_CLOCK_HZ / ADC_CYCLES_PER_SAMPLE / f64::from(divisor)
}

/// The trigger sample for a capture with `sample_count` samples. The panel places
/// the trigger at the end of the first quarter of the buffer.
#[must_use]
pub fn trigger_sample_index(sample_count: usize) -> Option<usize> {
    (sample_count / 4).checked_sub(1)
}

/// Decode a frame that has already passed [crate::framing::validate], stamping it with
/// the current time.
///
/// # Errors
/// [Error::UnsupportedVersion] if any flag bit outside [FLAGS_KNOWN] is set. This is
/// fatal; no partial record is produced.
pub fn decode(frame: &Frame) -> Result<Record> {
    decode_at(frame, CaptureTime::now())
}

/// Same as [decode] with an explicit capture time.
///
/// # Errors
/// See [decode].
pub fn decode_at(frame: &Frame, captured_at: CaptureTime) -> Result<Record> {
    let header = frame.header();
    if header.flags & !FLAGS_KNOWN != 0 {
        return Err(Error::UnsupportedVersion {
            flags: header.flags,
        });
    }

    let samples: Vec<i16> = frame
        .payload()
        .iter()
        .map(|b| i16::from(*b as i8) - i16::from(header.adc_offset))
        .collect();
    let triggered = header.flags & FLAG_IDLE == 0;
    let trigger_sample_index = if triggered {
        trigger_sample_index(samples.len())
    } else {
        None
    };
    let divisor = divisor(header.flags);
    debug!(
        flags = header.flags,
        samples = samples.len(),
        triggered,
        divisor,
        "decoded record"
    );

    Ok(Record {
        captured_at,
        format_version: FORMAT_VERSION,
        threshold: header.threshold,
        adc_offset: header.adc_offset,
        reserved: header.reserved,
        triggered,
        trigger_sample_index,
        divisor,
        sample_rate_hz: sample_rate_hz(divisor),
        voltage_scale: VOLTAGE_SCALE,
        samples,
    })
}
