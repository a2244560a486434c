use super::templates::builtin_templates;
use super::{ScriptSession, SessionError, SessionId};

/// Placeholder source for new sessions.
pub(crate) const NEW_SESSION_CODE: &str = "// Your code here\nlog(\"Hello\");";

/// Ordered collection of sessions with one active session.
///
/// Invariant: never empty, and `active` always indexes an existing session.
#[derive(Debug, Clone)]
pub struct SessionManager {
    sessions: Vec<ScriptSession>,
    active: usize,
    next_custom: u64,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// A manager seeded with the built-in templates, the first one active.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: builtin_templates().iter().map(|t| t.to_session()).collect(),
            active: 0,
            next_custom: 1,
        }
    }

    /// All sessions, in display order.
    #[must_use]
    pub fn sessions(&self) -> &[ScriptSession] {
        &self.sessions
    }

    /// Number of sessions (always at least one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&ScriptSession> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    /// The active session.
    #[must_use]
    pub fn active(&self) -> &ScriptSession {
        &self.sessions[self.active]
    }

    fn index_of(&self, id: &SessionId) -> Result<usize, SessionError> {
        self.sessions
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    fn unique_name(&self) -> String {
        let mut n = self.sessions.len();
        loop {
            let candidate = format!("Script {n}");
            if !self.sessions.iter().any(|s| s.name == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Append a new session with placeholder code and make it active.
    pub fn create_session(&mut self) -> SessionId {
        let id = SessionId::new(format!("custom-{}", self.next_custom));
        self.next_custom += 1;

        let session = ScriptSession {
            id: id.clone(),
            name: self.unique_name(),
            code: NEW_SESSION_CODE.to_string(),
            is_template: false,
        };
        tracing::debug!(session = %id, name = %session.name, "session created");
        self.sessions.push(session);
        self.active = self.sessions.len() - 1;
        id
    }

    /// Rename a session. Renaming a template demotes it.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidName`] for a blank name,
    /// [`SessionError::NotFound`] for an unknown id.
    pub fn rename_session(&mut self, id: &SessionId, name: &str) -> Result<(), SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidName(name.to_string()));
        }
        let index = self.index_of(id)?;
        let session = &mut self.sessions[index];
        session.name = name.to_string();
        session.is_template = false;
        tracing::debug!(session = %id, name, "session renamed");
        Ok(())
    }

    /// Delete a session. If it was active, the first remaining session
    /// becomes active.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidOperation`] when it is the last session,
    /// [`SessionError::NotFound`] for an unknown id.
    pub fn delete_session(&mut self, id: &SessionId) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        if self.sessions.len() == 1 {
            return Err(SessionError::InvalidOperation(
                "cannot delete the last session".to_string(),
            ));
        }

        self.sessions.remove(index);
        if index == self.active {
            self.active = 0;
        } else if index < self.active {
            self.active -= 1;
        }
        tracing::debug!(session = %id, remaining = self.sessions.len(), "session deleted");
        Ok(())
    }

    /// Make a session active.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] for an unknown id.
    pub fn set_active_session(&mut self, id: &SessionId) -> Result<(), SessionError> {
        self.active = self.index_of(id)?;
        Ok(())
    }

    /// Replace a session's code. Editing a template demotes it.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] for an unknown id.
    pub fn update_code(&mut self, id: &SessionId, code: impl Into<String>) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        let session = &mut self.sessions[index];
        session.code = code.into();
        session.is_template = false;
        Ok(())
    }
}
