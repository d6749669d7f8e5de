/// Errors that can occur while encoding or decoding packets and link frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The input ended before a complete field could be read.
    #[error("truncated input ({available} bytes, need {needed})")]
    Truncated { needed: usize, available: usize },

    /// The declared length does not match the bytes present.
    #[error("length mismatch (declared {declared}, actual {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// CRC-16 over header and payload did not match the trailer.
    #[error("crc mismatch (expected 0x{expected:04x}, computed 0x{actual:04x})")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Minimal-style 4-bit checksum did not match.
    #[error("checksum mismatch (expected 0x{expected:x}, computed 0x{actual:x})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// The packet style cannot be encoded or decoded.
    #[error("unsupported packet style: {0}")]
    UnsupportedStyle(&'static str),

    /// The packet type does not fit the chosen style.
    #[error("packet type 0x{0:04x} out of range for this style")]
    TypeOutOfRange(u16),

    /// The payload exceeds what the header can describe.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A frame-sync marker was missing or unrecognized.
    #[error("frame sync marker mismatch (got {0:02x?})")]
    MarkerMismatch([u8; 4]),

    /// SLIP escaping was malformed.
    #[error("invalid slip encoding: {0}")]
    Slip(&'static str),

    /// AX.25 address field was malformed.
    #[error("invalid ax.25 header: {0}")]
    Ax25(&'static str),

    /// A file could not be opened for checksumming.
    #[error("failed to open {path}: {source}")]
    FileOpen {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Reading a file failed part way through.
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Fail with [`FrameError::Truncated`] unless `buf` holds at least `needed` bytes.
pub(crate) fn ensure_len(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}
