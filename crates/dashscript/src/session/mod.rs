//! Named script buffers and the active-session pointer.
//!
//! A [`SessionManager`] always holds at least one [`ScriptSession`]. It starts
//! out seeded with the built-in templates; editing or renaming a template
//! turns it into an ordinary session.

mod manager;
mod templates;

use serde::{Deserialize, Serialize};

pub use manager::SessionManager;
pub use templates::{Template, builtin_templates};

/// Identifier of a session, unique within its manager and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One named, independently editable script buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSession {
    /// Immutable identifier.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Script source.
    pub code: String,
    /// Still an unmodified built-in template.
    pub is_template: bool,
}

/// Errors from session manager operations. A failed operation changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session has this id.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The operation would break a manager invariant.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The requested name is not usable.
    #[error("invalid session name: {0:?}")]
    InvalidName(String),
}
