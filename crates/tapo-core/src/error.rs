//! Error types for tapo-core.
//!
//! [`Error`] is returned by every fallible operation in the library. Device
//! reported failures (a non-zero `error_code` in a decrypted response) are
//! carried as a [`DeviceError`] so callers can inspect the numeric code.

use thiserror::Error;

use crate::transport::EncryptionType;

/// Error code devices return once a session has expired.
pub const SESSION_TIMEOUT_CODE: i32 = 9999;

/// Error type for tapo-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The host/IP string was rejected before any network call.
    #[error("invalid host: {0}")]
    InvalidHost(String),

    /// Connection to the device failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The device answered with a non-success HTTP status.
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// The KLAP handshake1 response had the wrong length.
    #[error("invalid handshake response length: {actual} bytes (expected {expected})")]
    InvalidHandshakeLength {
        /// Length the protocol requires.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// Server hash verification failed during the handshake.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A response could not be decrypted, unpadded or decoded.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Device returned a non-zero `error_code`.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A request was attempted without an authenticated session.
    #[error("no authenticated session; login required")]
    NotAuthenticated,

    /// Protocol error (unexpected response format, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failed to parse device response.
    #[error("parse error: {0}")]
    ParseError(String),

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl Error {
    /// Returns `true` for transport-level failures: the device could not be
    /// reached or did not answer with a success status.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_) | Error::Timeout(_) | Error::HttpStatus(_)
        )
    }

    /// Returns `true` when the session is unusable and the caller has to run
    /// a fresh login (e.g. via [`Plug::refresh_session`](crate::Plug::refresh_session)).
    pub fn requires_login(&self) -> bool {
        match self {
            Error::Device(e) => e.is_session_timeout(),
            Error::NotAuthenticated | Error::DecryptionFailed(_) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ParseError(err.to_string())
    }
}

impl From<crate::crypto::CipherError> for Error {
    fn from(err: crate::crypto::CipherError) -> Self {
        Error::DecryptionFailed(err.to_string())
    }
}

/// A non-zero `error_code` reported by a device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device error {code}: {message}")]
pub struct DeviceError {
    /// Raw code from the response.
    pub code: i32,
    /// Human readable description from the protocol's code table.
    pub message: String,
}

impl DeviceError {
    /// Builds an error using the message table of the given protocol.
    pub fn new(protocol: EncryptionType, code: i32) -> Self {
        Self {
            code,
            message: error_message(protocol, code),
        }
    }

    /// Returns `true` if the device reported that the session expired.
    pub fn is_session_timeout(&self) -> bool {
        self.code == SESSION_TIMEOUT_CODE
    }
}

/// Maps a device error code to a message. KLAP and Passthrough firmware use
/// different tables for the same numbers.
pub fn error_message(protocol: EncryptionType, code: i32) -> String {
    let known = match protocol {
        EncryptionType::Klap => match code {
            0 => Some("Success"),
            -1002 => Some("Invalid Request"),
            -1003 => Some("Malformed Request"),
            -1008 => Some("Invalid Parameters"),
            -1501 => Some("Invalid Credentials"),
            SESSION_TIMEOUT_CODE => Some("Session Timeout"),
            _ => None,
        },
        EncryptionType::Passthrough => match code {
            0 => Some("Success"),
            -1010 => Some("Invalid Public Key Length"),
            -1012 => Some("Invalid terminalUUID"),
            -1501 => Some("Invalid Request or Credentials"),
            1002 => Some("Incorrect Request"),
            -1003 => Some("JSON formatting error"),
            SESSION_TIMEOUT_CODE => Some("Session Timeout"),
            _ => None,
        },
    };

    match known {
        Some(message) => message.to_string(),
        None => format!("Unknown error code: {}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_credentials_message_per_protocol() {
        let klap = DeviceError::new(EncryptionType::Klap, -1501);
        assert_eq!(klap.message, "Invalid Credentials");

        let passthrough = DeviceError::new(EncryptionType::Passthrough, -1501);
        assert_eq!(passthrough.message, "Invalid Request or Credentials");
    }

    #[test]
    fn test_klap_table() {
        assert_eq!(error_message(EncryptionType::Klap, -1002), "Invalid Request");
        assert_eq!(error_message(EncryptionType::Klap, -1003), "Malformed Request");
        assert_eq!(error_message(EncryptionType::Klap, -1008), "Invalid Parameters");
        assert_eq!(error_message(EncryptionType::Klap, 9999), "Session Timeout");
    }

    #[test]
    fn test_passthrough_table() {
        assert_eq!(
            error_message(EncryptionType::Passthrough, -1010),
            "Invalid Public Key Length"
        );
        assert_eq!(
            error_message(EncryptionType::Passthrough, -1012),
            "Invalid terminalUUID"
        );
        assert_eq!(error_message(EncryptionType::Passthrough, 1002), "Incorrect Request");
        assert_eq!(
            error_message(EncryptionType::Passthrough, -1003),
            "JSON formatting error"
        );
    }

    #[test]
    fn test_unknown_code_has_generic_message() {
        for protocol in [EncryptionType::Klap, EncryptionType::Passthrough] {
            let err = DeviceError::new(protocol, 4242);
            assert_eq!(err.code, 4242);
            assert!(!err.message.is_empty());
            assert!(err.message.contains("4242"));
        }
    }

    #[test]
    fn test_session_timeout_requires_login() {
        let err = Error::from(DeviceError::new(EncryptionType::Klap, 9999));
        assert!(err.requires_login());
        assert!(!err.is_unreachable());

        let err = Error::from(DeviceError::new(EncryptionType::Klap, -1008));
        assert!(!err.requires_login());
    }

    #[test]
    fn test_unreachable_kinds() {
        assert!(Error::ConnectionFailed("refused".into()).is_unreachable());
        assert!(Error::Timeout("read".into()).is_unreachable());
        assert!(Error::HttpStatus(500).is_unreachable());
        assert!(!Error::InvalidHost("x".into()).is_unreachable());
        assert!(
            !Error::InvalidHandshakeLength {
                expected: 48,
                actual: 12
            }
            .is_unreachable()
        );
    }

    #[test]
    fn test_device_error_display() {
        let err = Error::from(DeviceError::new(EncryptionType::Klap, -1501));
        assert_eq!(err.to_string(), "device error -1501: Invalid Credentials");
    }
}
