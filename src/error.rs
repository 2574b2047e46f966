use std::num::ParseIntError;
use thiserror::Error;

/// Everything that can go wrong on an RTSP control connection.
#[derive(Error, Debug)]
pub enum RtspError {
    /// The server URL could not be used.
    #[error("malformed url: {0}")]
    MalformedUrl(String),

    /// The TCP connection could not be opened.
    #[error("failed to connect to {addr}: {reason}")]
    ConnectFailed {
        /// `host:port` that was dialled.
        addr: String,
        /// Error reported by the socket.
        reason: String,
    },

    /// Writing a request to the socket failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Reading from the socket failed.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// A response had a bad `CSeq` or `Content-Length`, or broke framing.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A session-level command was issued before SETUP established a session.
    #[error("no active session for {0}")]
    NoActiveSession(&'static str),

    /// The `Transport:` header of a SETUP reply was missing or unusable.
    #[error("transport negotiation failed: {0}")]
    TransportNegotiationFailed(String),

    /// A 401 could not be answered, or the answer was rejected.
    #[error("authentication exhausted: {0}")]
    AuthenticationExhausted(String),

    /// A subsession could not prepare to receive its stream.
    #[error("subsession initiate failed: {0}")]
    SubsessionInitiateFailed(String),

    /// The server answered with a non-2xx status.
    #[error("{code} {reason}")]
    Status {
        /// Status code, e.g. 454.
        code: u16,
        /// Reason phrase as sent.
        reason: String,
    },

    /// The request will never be answered: the server answered a later
    /// one first, or the bounded queue gave up on it.
    #[error("request {cseq} abandoned without a response")]
    RequestAbandoned {
        /// CSeq the request was sent with.
        cseq: u32,
    },

    /// The connection went away before the request was answered.
    #[error("connection closed")]
    ConnectionClosed,

    /// No response arrived within [`crate::config::ClientConfig::response_timeout`].
    #[error("timed out waiting for response")]
    Timeout,

    /// Any other protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A numeric field did not parse.
    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

impl RtspError {
    /// Result code seen by continuations: the server status for `Status`,
    /// zero for failures detected locally.
    pub fn code(&self) -> u16 {
        match self {
            RtspError::Status { code, .. } => *code,
            _ => 0,
        }
    }

    /// Returns true for failures that end the connection.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            RtspError::ConnectFailed { .. }
                | RtspError::ReadFailed(_)
                | RtspError::WriteFailed(_)
                | RtspError::ConnectionClosed
                | RtspError::Io(_)
        )
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, RtspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let err = RtspError::Status {
            code: 454,
            reason: "Session Not Found".into(),
        };
        assert_eq!(err.code(), 454);
        assert_eq!(err.to_string(), "454 Session Not Found");
        assert_eq!(RtspError::NoActiveSession("PLAY").code(), 0);
    }

    #[test]
    fn test_connection_level_classification() {
        assert!(RtspError::ReadFailed("reset".into()).is_connection_level());
        assert!(RtspError::ConnectionClosed.is_connection_level());
        assert!(!RtspError::TransportNegotiationFailed("x".into()).is_connection_level());
    }
}
