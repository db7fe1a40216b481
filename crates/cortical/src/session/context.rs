use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Key under which [`SessionContext::get`] exposes the session identity.
pub const SESSION_ID_KEY: &str = "uuid";

/// Opaque, immutable session identity (UUID v4, hyphenated).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

/// Read-only view of a session handed to every cortex.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: SessionId,
}

impl SessionContext {
    /// Mint a context with a fresh identity.
    pub fn mint() -> Self {
        Self::with_id(SessionId::generate())
    }

    pub const fn with_id(id: SessionId) -> Self {
        Self { id }
    }

    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Keyed lookup. Only [`SESSION_ID_KEY`] is defined.
    pub fn get(&self, key: &str) -> Option<&str> {
        (key == SESSION_ID_KEY).then(|| self.id.as_str())
    }
}
