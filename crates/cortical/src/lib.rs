//! Per-connection dispatch hub.
//!
//! Each accepted WebSocket becomes a session: inbound text messages are
//! fanned out to every registered cortex consumer, and the output of every
//! cortex producer is merged back into the connection. See
//! [`orchestrator`] for the session lifecycle.

pub mod cortex;
pub mod error;
pub mod fanout;
pub mod hub;
pub mod merge;
pub mod orchestrator;
pub mod receiver;
pub mod routes;
pub mod session;
pub mod signal;
pub mod transport;

/// Opaque message payload. The hub never inspects content.
pub type Message = bytes::Bytes;

pub use cortex::{Binding, Consumer, Cortex, CortexError, CortexRegistry, FnConsumer, Producer};
pub use error::ApiError;
pub use hub::{Hub, LifecycleHook};
pub use orchestrator::{Orchestrator, SessionSummary};
pub use routes::{HealthResponse, build_router};
pub use session::{Lifecycle, SESSION_ID_KEY, SessionContext, SessionId, SessionState};
pub use signal::{CloseOnce, CloseReason};
pub use transport::{CloseCode, Transport, TransportError};
