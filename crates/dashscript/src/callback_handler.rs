//! Dispatch of script host calls to registered callbacks.
//!
//! The script engine runs on its own thread and calls into the host
//! synchronously. [`CallbackDispatcher`] applies the per-run limits
//! (invocation budget, per-call timeout, cancellation) and drives the async
//! callback to completion on the caller's Tokio runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::callback::{Callback, CallbackError};
use crate::sandbox::ResourceLimits;

/// Routes host calls from one run to its bound callbacks.
pub(crate) struct CallbackDispatcher {
    callbacks: HashMap<String, Arc<dyn Callback>>,
    resource_limits: ResourceLimits,
    cancel: CancellationToken,
    runtime: Handle,
    /// Every host call, including free ones.
    invocations: AtomicU32,
    /// Calls charged against the invocation budget.
    charged: AtomicU32,
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field(
                "callbacks",
                &format!("[{} callbacks]", self.callbacks.len()),
            )
            .field("resource_limits", &self.resource_limits)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("invocations", &self.invocation_count())
            .finish_non_exhaustive()
    }
}

impl CallbackDispatcher {
    pub(crate) fn new(
        callbacks: HashMap<String, Arc<dyn Callback>>,
        resource_limits: ResourceLimits,
        cancel: CancellationToken,
        runtime: Handle,
    ) -> Self {
        Self {
            callbacks,
            resource_limits,
            cancel,
            runtime,
            invocations: AtomicU32::new(0),
            charged: AtomicU32::new(0),
        }
    }

    /// Invoke `name` with the JSON-encoded positional arguments.
    ///
    /// Blocks the calling thread, which must not be a runtime worker.
    pub(crate) fn dispatch(&self, name: &str, arguments_json: &str) -> Result<Value, CallbackError> {
        if self.cancel.is_cancelled() {
            return Err(CallbackError::Cancelled);
        }

        let callback = self
            .callbacks
            .get(name)
            .cloned()
            .ok_or_else(|| CallbackError::NotFound(name.to_string()))?;

        self.invocations.fetch_add(1, Ordering::SeqCst);
        if callback.counts_toward_budget() {
            let charged = self.charged.fetch_add(1, Ordering::SeqCst);
            if let Some(max) = self.resource_limits.max_callback_invocations
                && charged >= max
            {
                return Err(CallbackError::LimitExceeded(max));
            }
        }

        let args: Value = serde_json::from_str(arguments_json)
            .map_err(|e| CallbackError::InvalidArguments(format!("invalid arguments JSON: {e}")))?;

        tracing::trace!(callback = name, "dispatching host call");

        let timeout = self.resource_limits.callback_timeout;
        let cancel = self.cancel.clone();
        self.runtime.block_on(async move {
            let invoke_future = callback.invoke(args);
            let guarded = async {
                if let Some(timeout) = timeout {
                    tokio::time::timeout(timeout, invoke_future)
                        .await
                        .map_or(Err(CallbackError::Timeout), |r| r)
                } else {
                    invoke_future.await
                }
            };
            tokio::select! {
                () = cancel.cancelled() => Err(CallbackError::Cancelled),
                result = guarded => result,
            }
        })
    }

    /// Number of host calls to known callbacks so far, including ones
    /// rejected by the budget.
    pub(crate) fn invocation_count(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}
