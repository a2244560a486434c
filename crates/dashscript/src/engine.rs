//! Script evaluation on the embedded Boa JavaScript engine.
//!
//! Each run gets a brand-new [`Context`] on the calling thread; contexts are
//! not `Send`, so the sandbox spawns a dedicated thread per run and calls
//! [`evaluate`] there. The only native function the script can reach is the
//! host entry point, which is handed to the binding factory as an argument
//! and never placed on the global object.
//!
//! A promise that is still rejected with no handler once the job queue is
//! drained fails the run, the same as an uncaught synchronous throw.

use std::cell::RefCell;
use std::sync::Arc;

use boa_engine::builtins::promise::{OperationType, PromiseState};
use boa_engine::context::HostHooks;
use boa_engine::object::JsObject;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{Context, JsError, JsNativeError, JsString, JsValue, NativeFunction, Source};

use crate::callback::CallbackError;
use crate::callback_handler::CallbackDispatcher;
use crate::sandbox::{ScriptError, ScriptErrorKind};

/// Everything the engine thread needs for one run.
#[derive(Debug)]
pub(crate) struct Job {
    /// Compiles the script into the entry function.
    pub(crate) entry_source: String,
    /// Builds the bindings and the runner.
    pub(crate) factory_source: String,
    pub(crate) max_loop_iterations: u64,
    pub(crate) max_recursion_depth: usize,
}

/// Why evaluation did not complete.
#[derive(Debug)]
pub(crate) enum EngineError {
    /// The script failed to compile or threw.
    Script(ScriptError),
    /// The engine itself could not be prepared.
    Setup(String),
}

/// Promises rejected while no handler was attached.
#[derive(Default)]
struct RejectionTracker {
    unhandled: RefCell<Vec<JsObject>>,
}

impl RejectionTracker {
    /// Reason of the first promise that is still unhandled and rejected.
    fn first_unhandled(&self) -> Option<JsValue> {
        self.unhandled.borrow().iter().find_map(|promise| {
            match JsPromise::from_object(promise.clone()).ok()?.state() {
                PromiseState::Rejected(reason) => Some(reason),
                _ => None,
            }
        })
    }
}

impl HostHooks for RejectionTracker {
    fn promise_rejection_tracker(
        &self,
        promise: &JsObject,
        operation: OperationType,
        _context: &mut Context,
    ) {
        let mut unhandled = self.unhandled.borrow_mut();
        match operation {
            OperationType::Reject => unhandled.push(promise.clone()),
            OperationType::Handle => unhandled.retain(|seen| !JsObject::equals(seen, promise)),
        }
    }
}

/// Compile and run one script to completion on the current thread.
pub(crate) fn evaluate(job: Job, dispatcher: Arc<CallbackDispatcher>) -> Result<(), EngineError> {
    // boa 0.20 takes host hooks as `&'static`; the tracker is leaked per run.
    let tracker: &'static RejectionTracker = Box::leak(Box::new(RejectionTracker::default()));
    let mut context = Context::builder()
        .host_hooks(tracker)
        .build()
        .map_err(|e| EngineError::Setup(e.to_string()))?;
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(job.max_loop_iterations);
    context
        .runtime_limits_mut()
        .set_recursion_limit(job.max_recursion_depth);

    let entry = context
        .eval(Source::from_bytes(&job.entry_source))
        .map_err(|e| EngineError::Script(script_error(ScriptErrorKind::Compile, &e, &mut context)))?;

    let factory = context
        .eval(Source::from_bytes(&job.factory_source))
        .map_err(|e| EngineError::Setup(format!("binding factory: {e}")))?;
    let host = JsValue::from(host_function(dispatcher).to_js_function(context.realm()));
    let runner = callable(&factory)?
        .call(&JsValue::undefined(), &[host], &mut context)
        .map_err(|e| EngineError::Setup(format!("binding factory: {e}")))?;

    let result = callable(&runner)?.call(&JsValue::undefined(), &[entry], &mut context);
    if let Err(e) = result {
        return Err(EngineError::Script(script_error(
            ScriptErrorKind::Runtime,
            &e,
            &mut context,
        )));
    }

    // Settle promise reactions queued by the script.
    let _ = context.run_jobs();
    if let Some(reason) = tracker.first_unhandled() {
        tracing::debug!("script left a rejected promise unhandled");
        return Err(EngineError::Script(script_error(
            ScriptErrorKind::Runtime,
            &JsError::from_opaque(reason),
            &mut context,
        )));
    }
    Ok(())
}

fn callable(value: &JsValue) -> Result<&JsObject, EngineError> {
    value
        .as_callable()
        .ok_or_else(|| EngineError::Setup("binding factory did not produce a function".to_string()))
}

/// The native function behind every capability wrapper:
/// `host(name, argumentsJson) -> resultJson`.
#[allow(unsafe_code)]
fn host_function(dispatcher: Arc<CallbackDispatcher>) -> NativeFunction {
    // SAFETY: the closure captures only an `Arc` to host-side state, which
    // holds no garbage-collected values that would need tracing.
    unsafe {
        NativeFunction::from_closure(move |_this, args, _context| {
            let name = string_argument(args, 0);
            let payload = string_argument(args, 1);
            match dispatcher.dispatch(&name, &payload) {
                Ok(value) => {
                    let reply = serde_json::to_string(&value)
                        .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
                    Ok(JsValue::from(JsString::from(reply.as_str())))
                }
                Err(err) => {
                    tracing::debug!(callback = %name, error = %err, "host call failed");
                    Err(thrown(&err))
                }
            }
        })
    }
}

fn string_argument(args: &[JsValue], index: usize) -> String {
    args.get(index)
        .and_then(|value| value.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default()
}

/// Map a capability failure to the exception the script observes.
fn thrown(err: &CallbackError) -> JsError {
    let native = if err.is_validation() {
        JsNativeError::typ()
    } else {
        JsNativeError::error()
    };
    native.with_message(err.to_string()).into()
}

/// Extract message and trace from an uncaught exception.
fn script_error(kind: ScriptErrorKind, err: &JsError, context: &mut Context) -> ScriptError {
    if let Some(native) = err.as_native() {
        // Rendered as "<Kind>: <message>", or just "<Kind>" without a message.
        let trace = native.to_string();
        let message = trace
            .split_once(": ")
            .map_or_else(|| trace.clone(), |(_, message)| message.to_string());
        return ScriptError {
            kind,
            message,
            trace: Some(trace),
        };
    }

    let Some(value) = err.as_opaque() else {
        return ScriptError {
            kind,
            message: err.to_string(),
            trace: None,
        };
    };

    if let Some(text) = value.as_string() {
        return ScriptError {
            kind,
            message: text.to_std_string_escaped(),
            trace: None,
        };
    }

    if let Some(object) = value.as_object()
        && let Some(message) = string_property(object, "message", context)
    {
        let trace = string_property(object, "stack", context).or_else(|| {
            let name = string_property(object, "name", context).unwrap_or_else(|| "Error".to_string());
            Some(format!("{name}: {message}"))
        });
        return ScriptError {
            kind,
            message,
            trace,
        };
    }

    ScriptError {
        kind,
        message: value.display().to_string(),
        trace: None,
    }
}

fn string_property(object: &JsObject, key: &str, context: &mut Context) -> Option<String> {
    let value = object.get(JsString::from(key), context).ok()?;
    value.as_string().map(|s| s.to_std_string_escaped())
}
