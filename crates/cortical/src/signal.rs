//! Session close signalling.
//!
//! Every task that can end a session (read loop, write loop, receive
//! adapters, the server shutdown path) shares one [`CloseOnce`]. The first
//! [`CloseOnce::fire`] records the reason and wakes the orchestrator; later
//! calls are no-ops.

use std::fmt;
use std::sync::OnceLock;

use tokio_util::sync::CancellationToken;

use crate::transport::{CloseCode, TransportError};

/// Which I/O loop exhausted its transient-error budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent (or the connection reported) a recognized close code.
    Peer(CloseCode),
    /// A write was attempted after the connection had already closed.
    CloseSent,
    /// A cortex consumer failed under the end-session policy.
    CortexFailed { cortex: String },
    /// Too many consecutive transient errors on one loop.
    TransientErrors { direction: Direction, count: u32 },
    /// The server is shutting down.
    Shutdown,
    /// An internal stage stopped unexpectedly.
    EngineFault(&'static str),
}

impl CloseReason {
    /// Code to send in the closing handshake.
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Self::Peer(_) => CloseCode::NORMAL,
            Self::Shutdown => CloseCode::GOING_AWAY,
            Self::CloseSent
            | Self::CortexFailed { .. }
            | Self::TransientErrors { .. }
            | Self::EngineFault(_) => CloseCode::INTERNAL_ERROR,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(code) => write!(f, "peer closed ({code})"),
            Self::CloseSent => f.write_str("connection already closed"),
            Self::CortexFailed { cortex } => write!(f, "cortex {cortex} failed"),
            Self::TransientErrors { direction, count } => {
                write!(f, "{count} consecutive {direction} errors")
            }
            Self::Shutdown => f.write_str("server shutdown"),
            Self::EngineFault(stage) => write!(f, "{stage} stopped unexpectedly"),
        }
    }
}

impl From<TransportError> for CloseReason {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed(code) => Self::Peer(code),
            TransportError::CloseSent => Self::CloseSent,
            TransportError::Io(_) => Self::EngineFault("transport"),
        }
    }
}

/// One-shot close signal shared by all session tasks.
#[derive(Debug, Default)]
pub struct CloseOnce {
    reason: OnceLock<CloseReason>,
    notify: CancellationToken,
}

impl CloseOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reason` and wake waiters. Returns `true` only for the call
    /// that won.
    pub fn fire(&self, reason: CloseReason) -> bool {
        let won = self.reason.set(reason).is_ok();
        if won {
            self.notify.cancel();
        }
        won
    }

    pub fn is_fired(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<&CloseReason> {
        self.reason.get()
    }

    /// Wait until some task fires, then return the winning reason.
    pub async fn wait(&self) -> CloseReason {
        self.notify.cancelled().await;
        // set() completes before cancel(), so the reason is always present here
        self.reason.get().cloned().unwrap_or(CloseReason::Shutdown)
    }
}
