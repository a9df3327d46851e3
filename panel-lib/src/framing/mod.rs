//! Panel frame synchronization and integrity.
//!
//! Wire layout of a single frame:
//!
//! | Offset | Size       | Field                                      |
//! |--------|------------|--------------------------------------------|
//! | 0      | 4          | magic marker [MAGIC]                       |
//! | 4      | 1          | length field `L`, frame length is `6 + 4L` |
//! | 5      | 1          | flags                                      |
//! | 6      | 1          | threshold (unsigned)                       |
//! | 7      | 1          | ADC offset (signed)                        |
//! | 8      | 1          | reserved                                   |
//! | 9      | `4(L - 1)` | signed samples                             |
//! | last   | 1          | checksum, sum of all preceding bytes       |
mod checksum;
mod synchronizer;

pub use checksum::*;
pub use synchronizer::*;

use crate::{Error, Result};

/// Marker preceding every frame on the link.
pub const MAGIC: [u8; 4] = [0xff, 0x36, 0xb0, 0xd4];

/// Bytes needed before the frame length can be known, i.e., marker plus length field.
pub const PREAMBLE_LEN: usize = MAGIC.len() + 1;

/// Largest number of samples a frame can carry given the single byte length field.
pub const MAX_SAMPLES: usize = 4 * (u8::MAX as usize - 1);

/// Total frame length in bytes for length field `len`.
#[must_use]
pub fn frame_len(len: u8) -> usize {
    6 + 4 * len as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: u8,
    pub threshold: u8,
    pub adc_offset: i8,
    pub reserved: u8,
}

impl Header {
    /// Header length in bytes
    pub const LEN: usize = 4;
    /// Offset of the header from the start of the frame
    pub const OFFSET: usize = PREAMBLE_LEN;

    /// Construct from the provided bytes, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        Some(Header {
            flags: dat[0],
            threshold: dat[1],
            adc_offset: dat[2] as i8,
            reserved: dat[3],
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        [
            self.flags,
            self.threshold,
            self.adc_offset as u8,
            self.reserved,
        ]
    }
}

/// A single length-delimited frame, including marker and checksum.
///
/// A `Frame` is only constructed with a consistent length, but its checksum is not
/// guaranteed to be valid; see [validate].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: Header,
    data: Vec<u8>,
}

impl Frame {
    /// Construct a frame from raw bytes.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if there are fewer bytes than the length field requires and
    /// [Error::InvalidFrame] if the marker is missing, `L` is zero or there are extra bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() < PREAMBLE_LEN {
            return Err(Error::NotEnoughData {
                actual: data.len(),
                minimum: PREAMBLE_LEN,
            });
        }
        if data[..MAGIC.len()] != MAGIC {
            return Err(Error::InvalidFrame(format!(
                "bad marker {:02x?}",
                &data[..MAGIC.len()]
            )));
        }
        let len = data[MAGIC.len()];
        if len == 0 {
            return Err(Error::InvalidFrame("zero length field".to_string()));
        }
        let expected = frame_len(len);
        if data.len() < expected {
            return Err(Error::NotEnoughData {
                actual: data.len(),
                minimum: expected,
            });
        }
        if data.len() > expected {
            return Err(Error::InvalidFrame(format!(
                "expected {expected} bytes, got {}",
                data.len()
            )));
        }
        let header =
            Header::decode(&data[Header::OFFSET..]).ok_or(Error::NotEnoughData {
                actual: data.len(),
                minimum: Header::OFFSET + Header::LEN,
            })?;
        Ok(Frame { header, data })
    }

    /// The length field `L`.
    #[must_use]
    pub fn len_field(&self) -> u8 {
        self.data[MAGIC.len()]
    }

    #[must_use]
    pub fn header(&self) -> Header {
        self.header
    }

    /// Raw sample bytes between the header and the checksum.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[Header::OFFSET + Header::LEN..self.data.len() - 1]
    }

    /// The trailing checksum byte as received.
    #[must_use]
    pub fn checksum(&self) -> u8 {
        self.data[self.data.len() - 1]
    }

    /// All frame bytes, marker through checksum.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Build the wire bytes for a frame carrying `header` and `samples`, as the panel
/// firmware would send it.
///
/// # Errors
/// [Error::InvalidFrame] if the number of samples is not a multiple of 4 or exceeds
/// [MAX_SAMPLES].
pub fn encode_frame(header: &Header, samples: &[i8]) -> Result<Vec<u8>> {
    if samples.len() % 4 != 0 {
        return Err(Error::InvalidFrame(format!(
            "sample count {} is not a multiple of 4",
            samples.len()
        )));
    }
    if samples.len() > MAX_SAMPLES {
        return Err(Error::InvalidFrame(format!(
            "sample count {} exceeds {MAX_SAMPLES}",
            samples.len()
        )));
    }
    let len = u8::try_from(samples.len() / 4 + 1)
        .map_err(|_| Error::InvalidFrame("length field overflow".to_string()))?;

    let mut dat = Vec::with_capacity(frame_len(len));
    dat.extend_from_slice(&MAGIC);
    dat.push(len);
    dat.extend_from_slice(&header.encode());
    dat.extend(samples.iter().map(|s| *s as u8));
    dat.push(checksum(&dat));
    Ok(dat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header {
            flags: 0x22,
            threshold: 30,
            adc_offset: -3,
            reserved: 0,
        }
    }

    #[test]
    fn encode_frame_layout() {
        let dat = encode_frame(&header(), &[1, -1, 2, -2]).unwrap();

        assert_eq!(dat.len(), frame_len(2));
        assert_eq!(dat[..4], MAGIC);
        assert_eq!(dat[4], 2, "length field");
        assert_eq!(dat[5..9], [0x22, 30, 0xfd, 0]);
        assert_eq!(dat[9..13], [0x01, 0xff, 0x02, 0xfe]);
        assert_eq!(dat[13], checksum(&dat[..13]));
    }

    #[test]
    fn encode_frame_rejects_partial_sample_groups() {
        let zult = encode_frame(&header(), &[1, 2, 3]);
        assert!(matches!(zult, Err(Error::InvalidFrame(_))), "got {zult:?}");
    }

    #[test]
    fn encode_frame_rejects_too_many_samples() {
        let samples = vec![0i8; MAX_SAMPLES + 4];
        let zult = encode_frame(&header(), &samples);
        assert!(matches!(zult, Err(Error::InvalidFrame(_))), "got {zult:?}");

        let samples = vec![0i8; MAX_SAMPLES];
        let dat = encode_frame(&header(), &samples).unwrap();
        assert_eq!(dat[4], 255);
        assert_eq!(dat.len(), frame_len(255));
    }

    #[test]
    fn frame_accessors() {
        let dat = encode_frame(&header(), &[5, 6, 7, 8]).unwrap();
        let sum = dat[dat.len() - 1];
        let frame = Frame::from_bytes(dat).unwrap();

        assert_eq!(frame.len_field(), 2);
        assert_eq!(frame.header(), header());
        assert_eq!(frame.payload(), &[5, 6, 7, 8]);
        assert_eq!(frame.checksum(), sum);
    }

    #[test]
    fn frame_from_bytes_errors() {
        let zult = Frame::from_bytes(vec![0xff, 0x36]);
        assert!(matches!(
            zult,
            Err(Error::NotEnoughData {
                actual: 2,
                minimum: 5
            })
        ));

        let zult = Frame::from_bytes(vec![0, 0, 0, 0, 1, 0, 0, 0, 0, 0]);
        assert!(matches!(zult, Err(Error::InvalidFrame(_))), "bad marker");

        let zult = Frame::from_bytes(vec![0xff, 0x36, 0xb0, 0xd4, 0, 0]);
        assert!(matches!(zult, Err(Error::InvalidFrame(_))), "zero length");

        let zult = Frame::from_bytes(vec![0xff, 0x36, 0xb0, 0xd4, 2, 0, 0, 0, 0, 0]);
        assert!(matches!(
            zult,
            Err(Error::NotEnoughData {
                actual: 10,
                minimum: 14
            })
        ));

        let mut dat = encode_frame(&header(), &[]).unwrap();
        dat.push(0);
        let zult = Frame::from_bytes(dat);
        assert!(matches!(zult, Err(Error::InvalidFrame(_))), "extra bytes");
    }

    #[test]
    fn header_decode_too_short() {
        assert!(Header::decode(&[1, 2, 3]).is_none());
        let hdr = Header::decode(&[0x21, 30, 0xfe, 7]).unwrap();
        assert_eq!(hdr.adc_offset, -2);
        assert_eq!(hdr.encode(), [0x21, 30, 0xfe, 7]);
    }
}
