//! Per-session identity and lifecycle.

mod context;
mod state;

pub use context::{SESSION_ID_KEY, SessionContext, SessionId};
pub use state::{Lifecycle, SessionState};
