//! Error types for linegate-plc

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlcError {
    /// Connection refused, reset or otherwise unusable socket
    #[error("Transport error: {0}")]
    Transport(String),

    /// The device answered with an exception for this register
    #[error("Protocol error at register {address}: {reason}")]
    Protocol { address: u16, reason: String },

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Not connected")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PlcError {
    /// Whether the session is gone after this error
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, PlcError::Transport(_) | PlcError::Timeout(_) | PlcError::NotConnected)
    }
}

impl From<std::io::Error> for PlcError {
    fn from(err: std::io::Error) -> Self {
        PlcError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_names_address() {
        let err = PlcError::Protocol {
            address: 22001,
            reason: "IllegalDataAddress".to_string(),
        };
        assert!(err.to_string().contains("22001"));
        assert!(!err.is_fatal_to_session());
    }

    #[test]
    fn test_io_error_is_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: PlcError = io.into();
        assert!(matches!(err, PlcError::Transport(_)));
        assert!(err.is_fatal_to_session());
    }
}
