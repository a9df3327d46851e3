use super::{frame_len, Frame, MAGIC, PREAMBLE_LEN};
use crate::Result;
use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default time to wait for link bytes, the read timeout used for the panel's
/// 57600 baud serial line.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

// Max bytes requested from the reader at once.
const READ_CHUNK: usize = 256;
// Pause between polls of a reader that returned no data.
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// Counters for the recoverable conditions seen while synchronizing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames extracted.
    pub frames: usize,
    /// Bytes dropped as junk or as part of incomplete frames.
    pub discarded_bytes: usize,
    /// Frames abandoned because they could not be completed in time.
    pub incomplete_frames: usize,
}

/// Offset of the first full marker in `dat`.
fn find_marker(dat: &[u8]) -> Option<usize> {
    dat.windows(MAGIC.len()).position(|w| w == MAGIC)
}

/// Length of the longest suffix of `dat` that could be the start of a marker.
fn partial_marker_len(dat: &[u8]) -> usize {
    (1..MAGIC.len())
        .rev()
        .find(|&k| dat.ends_with(&MAGIC[..k]))
        .unwrap_or(0)
}

/// FrameSynchronizer recovers [Frame]s from an unframed byte stream.
///
/// Bytes are accumulated in an owned buffer. Anything before a [MAGIC] marker is
/// discarded, and a frame that cannot be completed before the timeout is dropped
/// entirely rather than resumed on the next call.
///
/// The reader is expected to block for a bounded time on each read, as a serial port
/// with a read timeout does. A read returning 0 bytes, [ErrorKind::TimedOut] or
/// [ErrorKind::WouldBlock] is treated as "no data yet".
pub struct FrameSynchronizer<R>
where
    R: Read,
{
    reader: R,
    // Bytes read but not yet returned as part of a frame
    buf: Vec<u8>,
    /// Recoverable condition counters.
    pub stats: SyncStats,
}

impl<R> FrameSynchronizer<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        FrameSynchronizer {
            reader,
            buf: Vec::with_capacity(frame_len(u8::MAX)),
            stats: SyncStats::default(),
        }
    }

    /// Bytes currently buffered and not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    #[must_use]
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Return the next complete frame, or `None` if one could not be assembled within
    /// `timeout`. `None` is not terminal; the caller should simply try again.
    ///
    /// The checksum of the returned frame is not verified.
    ///
    /// # Errors
    /// Any reader error other than a timeout.
    pub fn next_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut polled = false;

        let len = loop {
            self.discard_junk();
            if self.buf.len() < PREAMBLE_LEN {
                if polled && Instant::now() >= deadline {
                    return Ok(None);
                }
                polled = true;
                if !self.fill(PREAMBLE_LEN, deadline)? {
                    return Ok(None);
                }
                continue;
            }
            match self.buf[MAGIC.len()] {
                0 => {
                    debug!("zero length after marker; assuming false sync");
                    self.stats.discarded_bytes += 1;
                    self.buf.drain(..1);
                }
                len => break len,
            }
        };

        let need = frame_len(len);
        let deadline = Instant::now() + timeout;
        if !self.fill(need, deadline)? {
            warn!(
                have = self.buf.len(),
                need, "discarded incomplete frame"
            );
            self.stats.incomplete_frames += 1;
            self.stats.discarded_bytes += self.buf.len();
            self.buf.clear();
            return Ok(None);
        }

        let data: Vec<u8> = self.buf.drain(..need).collect();
        self.stats.frames += 1;
        trace!(len = need, remaining = self.buf.len(), "frame");
        Frame::from_bytes(data).map(Some)
    }

    /// Drop everything before the first marker. If there is no marker keep only the
    /// trailing bytes that may be the start of one.
    fn discard_junk(&mut self) {
        let start = match find_marker(&self.buf) {
            Some(idx) => idx,
            None => self.buf.len() - partial_marker_len(&self.buf),
        };
        if start == 0 {
            return;
        }

        let junk = &self.buf[..start];
        if junk == [0x00] {
            // the panel pulls the line low when it registers a hit
            debug!("saw 0x00 byte, probably the hit marker");
        } else {
            warn!(
                bytes = start,
                junk = ?&junk[..junk.len().min(16)],
                "discarding junk"
            );
        }
        self.stats.discarded_bytes += start;
        self.buf.drain(..start);
    }

    /// Read until at least `min_len` bytes are buffered. Returns `false` if the
    /// deadline passes first.
    fn fill(&mut self, min_len: usize, deadline: Instant) -> Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.buf.len() < min_len {
            // never read past what is needed so trailing data stays on the link
            let want = (min_len - self.buf.len()).min(READ_CHUNK);
            match self.reader.read(&mut chunk[..want]) {
                Ok(0) => (),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
                Err(err) => return Err(err.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(IDLE_BACKOFF.min(deadline - now));
        }
        Ok(true)
    }
}
