//! Line oriented persistence of [Record]s.
//!
//! Each record is a single JSON object on its own line. Keys are written in sorted
//! order so logs are stable and diffable:
//!
//! ```text
//! {"adc_offset":-2,"divisor":4,"format_version":0,"reserved":0,"sample_count":4,...}
//! ```
use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::packet::{self, CaptureTime, Record, FORMAT_VERSION};
use crate::Result;

/// Reasons a log line cannot be turned back into a [Record].
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

// On-disk form of a record. Field order is the key order on disk and must remain
// sorted.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Entry {
    adc_offset: i8,
    divisor: u32,
    format_version: u8,
    reserved: u8,
    sample_count: usize,
    sample_rate_hz: f64,
    samples: Vec<i16>,
    threshold: u8,
    time: f64,
    time_str: String,
    trigger_sample_index: Option<usize>,
    triggered: bool,
    voltage_scale: f64,
}

impl From<&Record> for Entry {
    fn from(rec: &Record) -> Self {
        Entry {
            adc_offset: rec.adc_offset,
            divisor: rec.divisor,
            format_version: rec.format_version,
            reserved: rec.reserved,
            sample_count: rec.sample_count(),
            sample_rate_hz: rec.sample_rate_hz,
            samples: rec.samples.clone(),
            threshold: rec.threshold,
            time: rec.captured_at.epoch,
            time_str: rec.captured_at.local.clone(),
            trigger_sample_index: rec.trigger_sample_index,
            triggered: rec.triggered,
            voltage_scale: rec.voltage_scale,
        }
    }
}

impl TryFrom<Entry> for Record {
    type Error = DecodeError;

    fn try_from(entry: Entry) -> std::result::Result<Self, Self::Error> {
        if entry.format_version != FORMAT_VERSION {
            return Err(DecodeError::Invalid(format!(
                "unsupported format_version {}",
                entry.format_version
            )));
        }
        if entry.sample_count != entry.samples.len() {
            return Err(DecodeError::Invalid(format!(
                "sample_count {} does not match {} samples",
                entry.sample_count,
                entry.samples.len()
            )));
        }
        if entry.sample_count % 4 != 0 {
            return Err(DecodeError::Invalid(format!(
                "sample_count {} is not a multiple of 4",
                entry.sample_count
            )));
        }
        let expected = if entry.triggered {
            packet::trigger_sample_index(entry.sample_count)
        } else {
            None
        };
        if entry.trigger_sample_index != expected {
            return Err(DecodeError::Invalid(format!(
                "trigger_sample_index {:?} does not match {:?} for triggered={} with {} samples",
                entry.trigger_sample_index, expected, entry.triggered, entry.sample_count
            )));
        }
        if !entry.divisor.is_power_of_two() {
            return Err(DecodeError::Invalid(format!(
                "divisor {} is not a power of two",
                entry.divisor
            )));
        }

        Ok(Record {
            captured_at: CaptureTime {
                epoch: entry.time,
                local: entry.time_str,
            },
            format_version: entry.format_version,
            threshold: entry.threshold,
            adc_offset: entry.adc_offset,
            reserved: entry.reserved,
            triggered: entry.triggered,
            trigger_sample_index: entry.trigger_sample_index,
            divisor: entry.divisor,
            sample_rate_hz: entry.sample_rate_hz,
            voltage_scale: entry.voltage_scale,
            samples: entry.samples,
        })
    }
}

/// Encode `rec` as a single log line, without the trailing newline.
///
/// # Errors
/// [crate::Error::Json] if the record cannot be serialized.
pub fn encode(rec: &Record) -> Result<String> {
    Ok(serde_json::to_string(&Entry::from(rec))?)
}

/// Decode a single log line.
///
/// # Errors
/// [DecodeError] if the line is not valid JSON, has missing or unknown keys, or
/// describes a record that could not have been decoded from a frame.
pub fn decode(line: &str) -> std::result::Result<Record, DecodeError> {
    let entry: Entry = serde_json::from_str(line)?;
    Record::try_from(entry)
}

/// Destination for every record decoded from a live link.
pub trait RecordSink {
    /// Persist `rec`. The record must be durable when this returns.
    fn write_record(&mut self, rec: &Record) -> Result<()>;
}

/// Writes records as log lines, flushing after each one.
pub struct LogWriter<W>
where
    W: Write,
{
    writer: W,
    count: usize,
}

impl<W> LogWriter<W>
where
    W: Write,
{
    pub fn new(writer: W) -> Self {
        LogWriter { writer, count: 0 }
    }

    /// Number of records written.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> RecordSink for LogWriter<W>
where
    W: Write,
{
    fn write_record(&mut self, rec: &Record) -> Result<()> {
        let line = encode(rec)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.count += 1;
        trace!(count = self.count, "wrote record");
        Ok(())
    }
}
