/// Simple 8-bit sum of `dat`, wrapping on overflow.
#[must_use]
pub fn checksum(dat: &[u8]) -> u8 {
    dat.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Returns true if the last byte of `frame` equals the sum of all bytes before it.
///
/// Empty input is never valid.
#[must_use]
pub fn validate(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((expected, dat)) => checksum(dat) == *expected,
        None => false,
    }
}
