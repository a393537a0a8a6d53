//! Error types for EasyLase DAC communication.

use std::io;

use thiserror::Error;

/// Errors that can occur while talking to an EasyLase DAC.
#[derive(Error, Debug)]
pub enum Error {
    /// The transport could not be opened.
    #[error("cannot connect to EasyLase device {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The transport is exclusively owned by another session.
    #[error("EasyLase device {target} is busy (opened elsewhere)")]
    Busy { target: String },

    /// A command was issued without an open transport.
    #[error("{command}: device is not connected")]
    NotConnected { command: &'static str },

    /// The transport accepted fewer bytes than the command needs.
    #[error("{command}: short write ({written} of {expected} bytes)")]
    ShortWrite {
        command: &'static str,
        written: usize,
        expected: usize,
    },

    /// The transport reported an I/O failure.
    #[error("{command}: {source}")]
    Io {
        command: &'static str,
        #[source]
        source: io::Error,
    },

    /// The status byte could not be read.
    #[error("read status: no status byte received")]
    StatusRead,

    /// The device answered a status request with an unknown byte.
    #[error("funny status code: 0x{0:02x}")]
    UnexpectedStatus(u8),

    /// A frame exceeds the configured or encodable point limit.
    #[error("too many points: {len} (max {max})")]
    TooManyPoints { len: usize, max: usize },
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Opening or owning the transport failed.
    Transport,
    /// The byte exchange with the device went wrong.
    Protocol,
    /// The caller asked for something the protocol cannot express.
    Caller,
}

impl Error {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { .. } | Error::Busy { .. } | Error::NotConnected { .. } => {
                ErrorKind::Transport
            }
            Error::ShortWrite { .. }
            | Error::Io { .. }
            | Error::StatusRead
            | Error::UnexpectedStatus(_) => ErrorKind::Protocol,
            Error::TooManyPoints { .. } => ErrorKind::Caller,
        }
    }

    /// Whether this error latches the session and tears down the connection.
    pub fn is_device_fault(&self) -> bool {
        self.kind() != ErrorKind::Caller
    }
}

/// Result type alias for EasyLase DAC operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let open = Error::Open {
            target: "/dev/easylase0".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(open.kind(), ErrorKind::Transport);
        assert_eq!(Error::StatusRead.kind(), ErrorKind::Protocol);
        assert_eq!(Error::UnexpectedStatus(1).kind(), ErrorKind::Protocol);
        let too_many = Error::TooManyPoints { len: 9000, max: 8190 };
        assert_eq!(too_many.kind(), ErrorKind::Caller);
        assert!(!too_many.is_device_fault());
        assert!(open.is_device_fault());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::ShortWrite {
            command: "laser data",
            written: 3,
            expected: 20,
        };
        assert_eq!(err.to_string(), "laser data: short write (3 of 20 bytes)");
        assert_eq!(
            Error::UnexpectedStatus(0x42).to_string(),
            "funny status code: 0x42"
        );
    }
}
