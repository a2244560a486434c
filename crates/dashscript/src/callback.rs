//! Callback trait and error types for host-provided capabilities.
//!
//! Every function a script can call (`log`, `addWidget`, `networkCall`, ...)
//! is a [`Callback`]. The engine hands each invocation to the host as a JSON
//! array of the positional arguments, and the returned JSON value is handed
//! back to the script.

use std::{future::Future, pin::Pin};

/// Boxed future returned by [`Callback::invoke`].
pub type CallbackFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, CallbackError>> + Send + 'a>>;

/// A host capability that script code can invoke.
///
/// # Example
///
/// ```rust,ignore
/// use dashscript::{Callback, CallbackError, CallbackFuture};
/// use serde_json::{json, Value};
///
/// struct Now;
///
/// impl Callback for Now {
///     fn name(&self) -> &str {
///         "now"
///     }
///
///     fn description(&self) -> &str {
///         "Returns the current Unix timestamp"
///     }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "array", "items": [] })
///     }
///
///     fn invoke(&self, _args: Value) -> CallbackFuture<'_> {
///         Box::pin(async move { Ok(json!(chrono::Utc::now().timestamp())) })
///     }
/// }
/// ```
pub trait Callback: Send + Sync {
    /// Name the function is bound under in the script scope (e.g. `addWidget`).
    fn name(&self) -> &str;

    /// Human-readable description, shown in editor help.
    fn description(&self) -> &str;

    /// JSON Schema for the positional argument array.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether arguments JSON cannot represent (`undefined`, functions,
    /// symbols, non-finite numbers) arrive as their text form instead of
    /// `null`.
    fn text_arguments(&self) -> bool {
        false
    }

    /// Whether calls are charged against
    /// [`ResourceLimits::max_callback_invocations`](crate::ResourceLimits).
    /// Console output is free so that logging never fails.
    fn counts_toward_budget(&self) -> bool {
        true
    }

    /// Execute the callback.
    ///
    /// `args` is always a JSON array holding the positional arguments of the
    /// script call. A `null` return value is surfaced to the script as
    /// `undefined`.
    fn invoke(&self, args: serde_json::Value) -> CallbackFuture<'_>;
}

/// Errors that can occur during callback execution.
///
/// These are thrown into the script as exceptions, so a script may catch
/// them. Uncaught, they end the run as a runtime error.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// The provided arguments don't match the expected shape.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The callback execution failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The requested callback was not found.
    #[error("callback not found: {0}")]
    NotFound(String),

    /// The callback execution timed out.
    #[error("timeout")]
    Timeout,

    /// The per-run invocation budget is spent.
    #[error("callback limit exceeded ({0} invocations)")]
    LimitExceeded(u32),

    /// The run was cancelled (its deadline passed) while the script kept going.
    #[error("execution cancelled")]
    Cancelled,
}

impl CallbackError {
    /// Whether the script should see this as a `TypeError` rather than a plain `Error`.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidArguments(_))
    }
}

/// Positional argument `index` from an invocation payload, or `Null`.
pub(crate) fn positional(args: &serde_json::Value, index: usize) -> &serde_json::Value {
    args.get(index).unwrap_or(&serde_json::Value::Null)
}
