//! Host-level error types.

use crate::callback::CallbackError;

/// Errors that prevent the host from running a script at all.
///
/// Anything a script does wrong (syntax errors, thrown exceptions, invalid
/// capability arguments, timeouts) is reported through
/// [`ExecuteResult`](crate::ExecuteResult) instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine thread could not be started.
    #[error("failed to spawn script thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine thread ended without reporting an outcome.
    #[error("script engine aborted: {0}")]
    EngineAborted(String),

    /// Too many timed-out runs are still executing on their threads.
    #[error("{0} timed-out script runs are still executing")]
    Saturated(usize),

    /// The engine could not be prepared for a run.
    #[error("script engine setup failed: {0}")]
    EngineSetup(String),

    /// A capability could not be constructed.
    #[error("capability setup failed: {0}")]
    Capability(#[from] CallbackError),

    /// The dataset snapshot could not be serialized for the script.
    #[error("dataset serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A session manager operation was rejected.
    #[error(transparent)]
    Session(#[from] crate::session::SessionError),
}
