//! The script console: sessions, a dataset provider and a sandbox.

use std::sync::Arc;

use crate::dataset::SnapshotProvider;
use crate::error::Error;
use crate::sandbox::{ExecuteResult, Sandbox};
use crate::session::{SessionId, SessionManager};

/// Ties the session list to a sandbox and the live dataset.
///
/// Runs are one at a time: [`ScriptConsole::run_active`] borrows the console
/// for the duration of the run.
pub struct ScriptConsole {
    sessions: SessionManager,
    sandbox: Sandbox,
    provider: Arc<dyn SnapshotProvider>,
}

impl std::fmt::Debug for ScriptConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptConsole")
            .field("sessions", &self.sessions.len())
            .field("active", &self.sessions.active().id)
            .field("sandbox", &self.sandbox)
            .finish_non_exhaustive()
    }
}

impl ScriptConsole {
    /// A console with the built-in templates.
    #[must_use]
    pub fn new(sandbox: Sandbox, provider: Arc<dyn SnapshotProvider>) -> Self {
        Self {
            sessions: SessionManager::new(),
            sandbox,
            provider,
        }
    }

    /// The session list.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Mutable access to the session list.
    pub fn sessions_mut(&mut self) -> &mut SessionManager {
        &mut self.sessions
    }

    /// The sandbox runs go through.
    #[must_use]
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Run the active session against a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error only if the engine could not run at all.
    pub async fn run_active(&self) -> Result<ExecuteResult, Error> {
        let session = self.sessions.active();
        let snapshot = self.provider.snapshot();
        tracing::info!(session = %session.id, name = %session.name, "running session");
        self.sandbox.execute(&session.code, &snapshot).await
    }

    /// Run a specific session against a fresh snapshot.
    ///
    /// # Errors
    ///
    /// [`Error::Session`] for an unknown id, otherwise as [`Self::run_active`].
    pub async fn run(&self, id: &SessionId) -> Result<ExecuteResult, Error> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| crate::session::SessionError::NotFound(id.clone()))?;
        let snapshot = self.provider.snapshot();
        tracing::info!(session = %session.id, name = %session.name, "running session");
        self.sandbox.execute(&session.code, &snapshot).await
    }
}
