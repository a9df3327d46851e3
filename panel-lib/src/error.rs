#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The producer sent a flags byte with version or reserved bits set. This is a
    /// protocol mismatch, not link noise, and must stop the read loop.
    #[error("unsupported packet version or flags (flags=0x{flags:02x})")]
    UnsupportedVersion { flags: u8 },

    /// A persisted record could not be decoded. Terminal for a replay session.
    #[error("malformed log line {line}: {reason}")]
    MalformedLogLine { line: usize, reason: String },
}

impl Error {
    /// True for conditions that signal a producer/consumer protocol mismatch rather
    /// than an environmental failure.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedVersion { .. } | Error::MalformedLogLine { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
