use std::fmt;
use std::io;

use spacelink_frame::FrameError;
use spacelink_transfer::TransferError;
use spacelink_transport::TransportError;

// sysexits-style process exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Open { source, .. }
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source)
        | FrameError::FileOpen { source, .. }
        | FrameError::FileRead { source, .. } => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn transfer_error(context: &str, err: TransferError) -> CliError {
    match err {
        TransferError::Io(source) => io_error(context, source),
        TransferError::Frame(err) => frame_error(context, err),
        TransferError::TooFewNodes(_)
        | TransferError::UnknownNode(_)
        | TransferError::NodeTable { .. }
        | TransferError::InvalidName { .. }
        | TransferError::PacketSize { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TransferError::MetaCorrupt { .. }
        | TransferError::FileCrcMismatch { .. }
        | TransferError::Payload { .. }
        | TransferError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_usage_errors() {
        let err = transfer_error("init", TransferError::UnknownNode("mars".into()));
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains("mars"));
    }

    #[test]
    fn io_errors_keep_their_kind() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(transfer_error("open", TransferError::Io(denied)).code, PERMISSION_DENIED);
        let corrupt = FrameError::CrcMismatch {
            expected: 1,
            actual: 2,
        };
        assert_eq!(frame_error("decode", corrupt).code, DATA_INVALID);
    }
}
