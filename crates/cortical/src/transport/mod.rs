//! Transport seam between the orchestrator and the wire.
//!
//! A transport is split once per session into a reader half, owned by the
//! read loop, and a writer half, owned by the write loop. Both halves report
//! failures as [`TransportError`], which the loops classify with
//! [`TransportError::is_terminal`].

pub mod memory;
pub mod websocket;

use std::fmt;

use async_trait::async_trait;

use crate::Message;

/// WebSocket close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: Self = Self(1000);
    pub const GOING_AWAY: Self = Self(1001);
    pub const PROTOCOL_ERROR: Self = Self(1002);
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    pub const NO_STATUS: Self = Self(1005);
    pub const ABNORMAL: Self = Self(1006);
    pub const INVALID_PAYLOAD: Self = Self(1007);
    pub const POLICY_VIOLATION: Self = Self(1008);
    pub const MESSAGE_TOO_BIG: Self = Self(1009);
    pub const MANDATORY_EXTENSION: Self = Self(1010);
    pub const INTERNAL_ERROR: Self = Self(1011);
    pub const SERVICE_RESTART: Self = Self(1012);
    pub const TRY_AGAIN_LATER: Self = Self(1013);
    pub const TLS_HANDSHAKE: Self = Self(1015);

    /// Codes that end a session. Anything else (reserved 1004/1014,
    /// application-defined 4xxx) is treated like a transient error.
    const RECOGNIZED: [Self; 14] = [
        Self::NORMAL,
        Self::GOING_AWAY,
        Self::PROTOCOL_ERROR,
        Self::UNSUPPORTED_DATA,
        Self::NO_STATUS,
        Self::ABNORMAL,
        Self::INVALID_PAYLOAD,
        Self::POLICY_VIOLATION,
        Self::MESSAGE_TOO_BIG,
        Self::MANDATORY_EXTENSION,
        Self::INTERNAL_ERROR,
        Self::SERVICE_RESTART,
        Self::TRY_AGAIN_LATER,
        Self::TLS_HANDSHAKE,
    ];

    pub fn is_recognized(self) -> bool {
        Self::RECOGNIZED.contains(&self)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One frame read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Dispatchable payload.
    Text(Message),
    /// Unsupported payload; answered with a structured error.
    Binary(Message),
    /// Ping/pong, already answered by the transport.
    Control,
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed with code {0}")]
    Closed(CloseCode),

    #[error("send attempted after the connection was closed")]
    CloseSent,

    #[error("transient I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether this error ends the session rather than being retried.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Closed(code) => code.is_recognized(),
            Self::CloseSent => true,
            Self::Io(_) => false,
        }
    }
}

/// A bidirectional connection that can be split into independent halves.
pub trait Transport: Send + 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Read half: blocks until the next frame or failure.
#[async_trait]
pub trait FrameReader: Send + 'static {
    async fn read_frame(&mut self) -> Result<Frame, TransportError>;
}

/// Write half: one text message per call.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn write_text(&mut self, message: Message) -> Result<(), TransportError>;

    /// Attempt a close handshake with the given code.
    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_codes_are_recognized() {
        for code in [1000, 1001, 1002, 1003, 1005, 1006, 1011, 1015] {
            assert!(CloseCode(code).is_recognized(), "{code} should be recognized");
        }
    }

    #[test]
    fn reserved_and_application_codes_are_not_recognized() {
        for code in [1004, 1014, 3000, 4000, 4999] {
            assert!(!CloseCode(code).is_recognized(), "{code} should not be recognized");
        }
    }

    #[test]
    fn terminal_classification() {
        assert!(TransportError::Closed(CloseCode::GOING_AWAY).is_terminal());
        assert!(TransportError::CloseSent.is_terminal());
        assert!(!TransportError::Closed(CloseCode(4001)).is_terminal());
        assert!(!TransportError::Io("timed out".into()).is_terminal());
    }

    #[test]
    fn close_code_displays_number() {
        assert_eq!(CloseCode::GOING_AWAY.to_string(), "1001");
    }
}
