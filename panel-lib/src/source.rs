//! Sources of [Record]s: a live instrument link or a previously persisted log.
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::framing::{validate, FrameSynchronizer, SyncStats, DEFAULT_TIMEOUT};
use crate::logcodec::{self, RecordSink};
use crate::packet::{self, Record};
use crate::{Error, Result};

/// Outcome of a single [PacketSource::read].
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Record(Record),
    /// No record is available yet. Only produced by live sources; try again.
    Idle,
    /// The source is exhausted. Only produced by replay sources.
    End,
}

/// Anything that produces decoded [Record]s.
pub trait PacketSource {
    /// Fetch the next record.
    ///
    /// # Errors
    /// Errors are terminal for the source, e.g., [Error::UnsupportedVersion] on a live
    /// link or [Error::MalformedLogLine] on a replay.
    fn read(&mut self) -> Result<Next>;
}

/// Options for a [LiveLink].
#[derive(TypedBuilder)]
pub struct LinkOpts {
    /// Max time to wait for link bytes on each phase of frame assembly.
    #[builder(default = DEFAULT_TIMEOUT)]
    timeout: Duration,
    /// Sink receiving every decoded record before it is returned.
    #[builder(default, setter(strip_option))]
    sink: Option<Box<dyn RecordSink>>,
}

impl Default for LinkOpts {
    fn default() -> Self {
        LinkOpts::builder().build()
    }
}

/// Counters for a [LiveLink] session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub frames: usize,
    pub records: usize,
    pub discarded_bytes: usize,
    pub incomplete_frames: usize,
    pub checksum_errors: usize,
}

/// Decodes records from a live byte stream.
///
/// Junk bytes, incomplete frames and checksum failures are routine on the link; they
/// are logged, counted and skipped, and surface only as [Next::Idle].
///
/// # Example
/// ```
/// use panel::framing::{encode_frame, Header};
/// use panel::source::{LinkOpts, LiveLink, Next, PacketSource};
///
/// let header = Header { flags: 0x02, threshold: 30, adc_offset: 0, reserved: 0 };
/// let dat = encode_frame(&header, &[1, 2, 3, 4]).unwrap();
///
/// let mut link = LiveLink::new(&dat[..], LinkOpts::default());
/// let Next::Record(rec) = link.read().unwrap() else {
///     panic!("expected a record");
/// };
/// assert_eq!(rec.samples, vec![1, 2, 3, 4]);
/// ```
pub struct LiveLink<R>
where
    R: Read,
{
    sync: FrameSynchronizer<R>,
    timeout: Duration,
    sink: Option<Box<dyn RecordSink>>,
    records: usize,
    checksum_errors: usize,
}

impl<R> LiveLink<R>
where
    R: Read,
{
    pub fn new(reader: R, opts: LinkOpts) -> Self {
        LiveLink {
            sync: FrameSynchronizer::new(reader),
            timeout: opts.timeout,
            sink: opts.sink,
            records: 0,
            checksum_errors: 0,
        }
    }

    #[must_use]
    pub fn stats(&self) -> LinkStats {
        let SyncStats {
            frames,
            discarded_bytes,
            incomplete_frames,
        } = self.sync.stats;
        LinkStats {
            frames,
            records: self.records,
            discarded_bytes,
            incomplete_frames,
            checksum_errors: self.checksum_errors,
        }
    }
}

impl<R> PacketSource for LiveLink<R>
where
    R: Read,
{
    fn read(&mut self) -> Result<Next> {
        let Some(frame) = self.sync.next_frame(self.timeout)? else {
            return Ok(Next::Idle);
        };

        if !validate(frame.as_bytes()) {
            let dat = frame.as_bytes();
            warn!(
                computed = crate::framing::checksum(&dat[..dat.len() - 1]),
                expected = frame.checksum(),
                "discarding frame with bad checksum"
            );
            self.checksum_errors += 1;
            return Ok(Next::Idle);
        }

        let rec = packet::decode(&frame)?;
        if let Some(ref mut sink) = self.sink {
            sink.write_record(&rec)?;
        }
        self.records += 1;
        Ok(Next::Record(rec))
    }
}

/// Replays records from a log written by [logcodec::LogWriter].
///
/// Records are trusted as-is; no frame level checks are repeated. The first line that
/// cannot be decoded ends the replay; every later read returns [Next::End].
pub struct ReplayLog<R>
where
    R: BufRead,
{
    reader: R,
    line: Vec<u8>,
    lineno: usize,
    finished: bool,
}

impl ReplayLog<Box<dyn BufRead>> {
    /// Open the log at `path`, where `-` is stdin.
    ///
    /// # Errors
    /// If the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader: Box<dyn BufRead> = if path == Path::new("-") {
            Box::new(BufReader::new(io::stdin()))
        } else {
            Box::new(BufReader::new(File::open(path)?))
        };
        debug!("replaying {path:?}");
        Ok(ReplayLog::new(reader))
    }
}

impl<R> ReplayLog<R>
where
    R: BufRead,
{
    pub fn new(reader: R) -> Self {
        ReplayLog {
            reader,
            line: Vec::new(),
            lineno: 0,
            finished: false,
        }
    }

    /// 1-based number of the last line read.
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.lineno
    }

    fn next_line(&mut self) -> Result<Next> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(Next::End);
            }
            self.lineno += 1;
            let line = std::str::from_utf8(&self.line).map_err(|err| Error::MalformedLogLine {
                line: self.lineno,
                reason: err.to_string(),
            })?;
            if line.trim().is_empty() {
                debug!(line = self.lineno, "skipping blank line");
                continue;
            }
            return match logcodec::decode(line.trim_end()) {
                Ok(rec) => Ok(Next::Record(rec)),
                Err(err) => Err(Error::MalformedLogLine {
                    line: self.lineno,
                    reason: err.to_string(),
                }),
            };
        }
    }
}

impl<R> PacketSource for ReplayLog<R>
where
    R: BufRead,
{
    fn read(&mut self) -> Result<Next> {
        if self.finished {
            return Ok(Next::End);
        }
        let zult = self.next_line();
        if !matches!(zult, Ok(Next::Record(_))) {
            self.finished = true;
        }
        zult
    }
}

impl<R> Iterator for ReplayLog<R>
where
    R: BufRead,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read() {
            Ok(Next::Record(rec)) => Some(Ok(rec)),
            Ok(Next::Idle | Next::End) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{encode_frame, Header};
    use crate::packet::{CaptureTime, FLAG_IDLE};

    const TIMEOUT: Duration = Duration::from_millis(20);

    fn frame(flags: u8, samples: &[i8]) -> Vec<u8> {
        let header = Header {
            flags,
            threshold: 20,
            adc_offset: 3,
            reserved: 0,
        };
        encode_frame(&header, samples).unwrap()
    }

    fn opts() -> LinkOpts {
        LinkOpts::builder().timeout(TIMEOUT).build()
    }

    #[test]
    fn live_link_decodes_frames() {
        let dat = [frame(0x02, &[4, 5, 6, 7]), frame(FLAG_IDLE, &[3; 8])].concat();
        let mut link = LiveLink::new(&dat[..], opts());

        let Next::Record(rec) = link.read().unwrap() else {
            panic!("expected first record");
        };
        assert_eq!(rec.samples, vec![1, 2, 3, 4]);
        assert!(rec.triggered);
        assert_eq!(rec.trigger_sample_index, Some(0));

        let Next::Record(rec) = link.read().unwrap() else {
            panic!("expected second record");
        };
        assert_eq!(rec.samples, vec![0; 8]);
        assert!(!rec.triggered);

        assert_eq!(link.read().unwrap(), Next::Idle);
        assert_eq!(link.read().unwrap(), Next::Idle, "idle is not terminal");

        let stats = link.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.records, 2);
    }

    #[test]
    fn live_link_skips_bad_checksum() {
        let mut bad = frame(0x02, &[1, 1, 1, 1]);
        let last = bad.len() - 1;
        bad[last] = bad[last].wrapping_add(1);
        let dat = [bad, frame(0x02, &[9, 9, 9, 9])].concat();
        let mut link = LiveLink::new(&dat[..], opts());

        assert_eq!(link.read().unwrap(), Next::Idle);
        let Next::Record(rec) = link.read().unwrap() else {
            panic!("expected record after bad checksum");
        };
        assert_eq!(rec.samples, vec![6; 4]);
        assert_eq!(link.stats().checksum_errors, 1);
    }

    #[test]
    fn live_link_unsupported_version_is_fatal() {
        let dat = frame(0x42, &[1, 2, 3, 4]);
        let mut link = LiveLink::new(&dat[..], opts());

        let zult = link.read();
        assert!(
            matches!(zult, Err(Error::UnsupportedVersion { flags: 0x42 })),
            "got {zult:?}"
        );
    }

    struct Collect(std::rc::Rc<std::cell::RefCell<Vec<Record>>>);

    impl RecordSink for Collect {
        fn write_record(&mut self, rec: &Record) -> Result<()> {
            self.0.borrow_mut().push(rec.clone());
            Ok(())
        }
    }

    #[test]
    fn live_link_tees_to_sink() {
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let opts = LinkOpts::builder()
            .timeout(TIMEOUT)
            .sink(Box::new(Collect(seen.clone())))
            .build();
        let mut bad = frame(0x02, &[0; 4]);
        bad[9] = 1;
        let dat = [frame(0x02, &[1, 2, 3, 4]), bad, frame(0x03, &[5; 4])].concat();
        let mut link = LiveLink::new(&dat[..], opts);

        let mut got = Vec::new();
        loop {
            match link.read().unwrap() {
                Next::Record(rec) => got.push(rec),
                Next::Idle if link.stats().frames == 3 => break,
                Next::Idle => (),
                Next::End => unreachable!(),
            }
        }

        assert_eq!(got.len(), 2);
        assert_eq!(*seen.borrow(), got, "sink sees exactly the returned records");
    }

    fn log_line(n: i16) -> String {
        let rec = Record {
            captured_at: CaptureTime {
                epoch: 1_600_000_000.5 + f64::from(n),
                local: "2020-09-13 12:26:40".to_string(),
            },
            format_version: 0,
            threshold: 30,
            adc_offset: 0,
            reserved: 0,
            triggered: false,
            trigger_sample_index: None,
            divisor: 8,
            sample_rate_hz: crate::packet::sample_rate_hz(8),
            voltage_scale: crate::packet::VOLTAGE_SCALE,
            samples: vec![n; 4],
        };
        logcodec::encode(&rec).unwrap()
    }

    #[test]
    fn replay_reads_until_end() {
        let dat = format!("{}\n\n{}\n", log_line(1), log_line(2));
        let mut replay = ReplayLog::new(dat.as_bytes());

        let Next::Record(rec) = replay.read().unwrap() else {
            panic!("expected first record");
        };
        assert_eq!(rec.samples, vec![1; 4]);
        let Next::Record(rec) = replay.read().unwrap() else {
            panic!("expected second record");
        };
        assert_eq!(rec.samples, vec![2; 4]);
        assert_eq!(replay.line_number(), 3);

        assert_eq!(replay.read().unwrap(), Next::End);
    }

    #[test]
    fn replay_last_line_without_newline() {
        let dat = log_line(7);
        let recs: Vec<Record> = ReplayLog::new(dat.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(recs.len(), 1);
    }

    #[test]
    fn replay_malformed_line_is_terminal() {
        let dat = format!("{}\nnot json\n{}\n", log_line(1), log_line(2));
        let mut replay = ReplayLog::new(dat.as_bytes());

        assert!(matches!(replay.read().unwrap(), Next::Record(_)));
        let zult = replay.read();
        assert!(
            matches!(zult, Err(Error::MalformedLogLine { line: 2, .. })),
            "got {zult:?}"
        );
        assert_eq!(replay.read().unwrap(), Next::End, "nothing after a bad line");
        assert_eq!(replay.read().unwrap(), Next::End);
        assert_eq!(replay.line_number(), 2);
    }

    #[test]
    fn replay_iterator_stops_at_malformed_line() {
        let dat = format!("not json\n{}\n", log_line(1));
        let items: Vec<Result<Record>> = ReplayLog::new(dat.as_bytes()).collect();

        assert_eq!(items.len(), 1, "got {items:?}");
        assert!(matches!(
            items[0],
            Err(Error::MalformedLogLine { line: 1, .. })
        ));
    }

    #[test]
    fn replay_invalid_utf8_is_malformed() {
        let mut dat = format!("{}\n", log_line(1)).into_bytes();
        dat.extend_from_slice(&[0xff, 0xfe, b'{', b'\n']);
        dat.extend_from_slice(format!("{}\n", log_line(2)).as_bytes());
        let mut replay = ReplayLog::new(&dat[..]);

        assert!(matches!(replay.read().unwrap(), Next::Record(_)));
        let zult = replay.read();
        assert!(
            matches!(zult, Err(Error::MalformedLogLine { line: 2, .. })),
            "got {zult:?}"
        );
        assert!(zult.unwrap_err().is_fatal());
        assert_eq!(replay.read().unwrap(), Next::End);
    }

    #[test]
    fn replay_end_is_sticky() {
        let dat = format!("{}\n", log_line(1));
        let mut replay = ReplayLog::new(dat.as_bytes());

        assert!(matches!(replay.read().unwrap(), Next::Record(_)));
        assert_eq!(replay.read().unwrap(), Next::End);
        assert_eq!(replay.read().unwrap(), Next::End);
    }
}
