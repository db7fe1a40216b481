use std::fmt;

use tokio::sync::watch;
use tracing::{debug, warn};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Draining,
    Closed,
}

impl SessionState {
    /// Forward-only transitions: Handshaking -> Active -> Draining -> Closed,
    /// plus Handshaking -> Closed when the upgrade fails.
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Handshaking, Self::Active | Self::Closed)
                | (Self::Active, Self::Draining)
                | (Self::Draining, Self::Closed)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshaking => "handshaking",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable session state.
///
/// The orchestrator owns the sender; anyone can [`subscribe`](Self::subscribe)
/// to follow transitions.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<SessionState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Handshaking);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn advance(&self, next: SessionState) -> bool {
        let mut from = next;
        let moved = self.tx.send_if_modified(|state| {
            from = *state;
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(%from, to = %next, "Session state changed");
        } else {
            warn!(%from, to = %next, "Rejected session state transition");
        }
        moved
    }
}
