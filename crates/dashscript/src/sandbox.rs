//! Sandboxed script execution.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::binding::BindingSet;
use crate::callback::Callback;
use crate::callback_handler::CallbackDispatcher;
use crate::capabilities::{
    AddInsightCallback, AddMetricCallback, AddWidgetCallback, ExportDataCallback, LogCallback,
};
use crate::dataset::DatasetSnapshot;
use crate::engine::{self, EngineError, Job};
use crate::error::Error;
use crate::export::{AuditOnlyExport, ExportSink};
use crate::network::{DisabledNetwork, NetworkCallback, NetworkConfig};
use crate::output::{OutputChannel, OutputHandler};
use crate::registry::{InsightRegistry, MetricRegistry, WidgetRegistry};

/// Runs scripts against dataset snapshots with the dashboard capabilities.
pub struct Sandbox {
    /// `networkCall` implementation, shared across runs.
    network: Arc<dyn Callback>,
    /// Receives `exportData` requests.
    export_sink: Arc<dyn ExportSink>,
    /// Handler for streaming output lines.
    output_handler: Option<Arc<dyn OutputHandler>>,
    widgets: Arc<WidgetRegistry>,
    insights: Arc<InsightRegistry>,
    metrics: Arc<MetricRegistry>,
    /// Resource limits for execution.
    resource_limits: ResourceLimits,
    /// Engine threads of timed-out runs that may still be executing.
    abandoned: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("network", &self.network.description())
            .field("has_output_handler", &self.output_handler.is_some())
            .field("widgets", &self.widgets.len())
            .field("insights", &self.insights.len())
            .field("metrics", &self.metrics.len())
            .field("resource_limits", &self.resource_limits)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Create a sandbox builder.
    #[must_use]
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::new()
    }

    /// The registry `addWidget` appends to.
    #[must_use]
    pub fn widgets(&self) -> &Arc<WidgetRegistry> {
        &self.widgets
    }

    /// The registry `addInsight` appends to.
    #[must_use]
    pub fn insights(&self) -> &Arc<InsightRegistry> {
        &self.insights
    }

    /// The registry `addMetric` appends to.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricRegistry> {
        &self.metrics
    }

    /// Limits applied to every run.
    #[must_use]
    pub fn resource_limits(&self) -> &ResourceLimits {
        &self.resource_limits
    }

    /// Number of timed-out runs whose engine threads are still executing.
    ///
    /// A timed-out script is only interrupted at its next capability call or
    /// when it hits the loop or recursion limit; pure computation keeps its
    /// thread busy until then.
    #[must_use]
    pub fn abandoned_runs(&self) -> usize {
        let mut abandoned = self.abandoned.lock().unwrap_or_else(PoisonError::into_inner);
        abandoned.retain(|handle| !handle.is_finished());
        abandoned.len()
    }

    /// The standard binding set for one run over `snapshot`, with a fresh
    /// output channel.
    #[must_use]
    pub fn bindings(&self, snapshot: &DatasetSnapshot) -> BindingSet {
        let output = Arc::new(OutputChannel::with_handler(self.output_handler.clone()));
        let snapshot = Arc::new(snapshot.clone());
        BindingSet::new(Arc::clone(&output), Arc::clone(&snapshot))
            .with_callback(Arc::new(LogCallback::new(Arc::clone(&output))))
            .with_callback(Arc::new(AddWidgetCallback::new(
                Arc::clone(&self.widgets),
                Arc::clone(&output),
            )))
            .with_callback(Arc::new(AddInsightCallback::new(
                Arc::clone(&self.insights),
                Arc::clone(&output),
            )))
            .with_callback(Arc::new(AddMetricCallback::new(
                Arc::clone(&self.metrics),
                Arc::clone(&output),
            )))
            .with_callback(Arc::new(ExportDataCallback::new(
                Arc::clone(&self.export_sink),
                snapshot,
                Arc::clone(&output),
            )))
            .with_callback(Arc::clone(&self.network))
    }

    /// Run `code` against `snapshot` with the standard bindings.
    ///
    /// # Errors
    ///
    /// See [`Sandbox::run`].
    pub async fn execute(
        &self,
        code: &str,
        snapshot: &DatasetSnapshot,
    ) -> Result<ExecuteResult, Error> {
        self.run(code, self.bindings(snapshot)).await
    }

    /// Run `code` as the body of a function whose parameters are exactly
    /// `bindings`, with `dataset` and `filters` taken from the bindings'
    /// snapshot.
    ///
    /// Completes when the script returns, throws, or exceeds
    /// [`ResourceLimits::execution_timeout`]. Script failures are reported in
    /// the result; side effects made before a failure are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine could not run at all, or
    /// [`Error::Saturated`] while [`ResourceLimits::max_abandoned_runs`]
    /// timed-out runs are still executing.
    #[tracing::instrument(
        skip_all,
        fields(
            code_len = code.len(),
            records = bindings.snapshot().record_count(),
        )
    )]
    pub async fn run(&self, code: &str, bindings: BindingSet) -> Result<ExecuteResult, Error> {
        let start = Instant::now();
        let output = Arc::clone(bindings.output());
        let limits = self.resource_limits.clone();

        if code.len() > limits.max_code_bytes {
            let error = ScriptError {
                kind: ScriptErrorKind::Compile,
                message: format!(
                    "script is {} bytes, larger than the {} byte limit",
                    code.len(),
                    limits.max_code_bytes
                ),
                trace: None,
            };
            return Ok(ExecuteResult::finish(&output, Some(error), start, 0));
        }

        let busy = self.abandoned_runs();
        if busy >= limits.max_abandoned_runs {
            tracing::warn!(busy, "refusing run while timed-out runs are still executing");
            return Err(Error::Saturated(busy));
        }

        let job = Job {
            entry_source: bindings.entry_source(code)?,
            factory_source: bindings.factory_source()?,
            max_loop_iterations: limits.max_loop_iterations,
            max_recursion_depth: limits.max_recursion_depth,
        };
        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(CallbackDispatcher::new(
            bindings.callback_map(),
            limits.clone(),
            cancel.clone(),
            Handle::current(),
        ));

        let (tx, rx) = oneshot::channel();
        let engine_dispatcher = Arc::clone(&dispatcher);
        let handle = std::thread::Builder::new()
            .name("dashscript-run".to_string())
            .spawn(move || {
                let _ = tx.send(engine::evaluate(job, engine_dispatcher));
            })
            .map_err(Error::Spawn)?;

        let outcome = match limits.execution_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(received) => received,
                Err(_) => {
                    cancel.cancel();
                    tracing::warn!(?timeout, "script timed out");
                    self.abandoned
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(handle);
                    let error = ScriptError {
                        kind: ScriptErrorKind::Timeout,
                        message: format!("execution timed out after {timeout:?}"),
                        trace: None,
                    };
                    return Ok(ExecuteResult::finish(
                        &output,
                        Some(error),
                        start,
                        dispatcher.invocation_count(),
                    ));
                }
            },
            None => rx.await,
        };

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(EngineError::Script(error))) => Some(error),
            Ok(Err(EngineError::Setup(message))) => return Err(Error::EngineSetup(message)),
            Err(_) => {
                return Err(Error::EngineAborted(
                    "engine thread exited without a result".to_string(),
                ));
            }
        };

        let result = ExecuteResult::finish(&output, error, start, dispatcher.invocation_count());
        tracing::debug!(
            lines = result.log_lines.len(),
            success = result.is_success(),
            duration = ?result.stats.duration,
            "script finished"
        );
        Ok(result)
    }
}

/// Builder for constructing a [`Sandbox`].
#[derive(Default)]
pub struct SandboxBuilder {
    network: Option<NetworkConfig>,
    export_sink: Option<Arc<dyn ExportSink>>,
    output_handler: Option<Arc<dyn OutputHandler>>,
    widgets: Option<Arc<WidgetRegistry>>,
    insights: Option<Arc<InsightRegistry>>,
    metrics: Option<Arc<MetricRegistry>>,
    resource_limits: ResourceLimits,
}

impl std::fmt::Debug for SandboxBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxBuilder")
            .field("network", &self.network)
            .field("has_export_sink", &self.export_sink.is_some())
            .field("has_output_handler", &self.output_handler.is_some())
            .field("resource_limits", &self.resource_limits)
            .finish_non_exhaustive()
    }
}

impl SandboxBuilder {
    /// Create a new sandbox builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable `networkCall` with the given policy.
    #[must_use]
    pub fn with_network(mut self, config: NetworkConfig) -> Self {
        self.network = Some(config);
        self
    }

    /// Set where `exportData` sends the dataset.
    #[must_use]
    pub fn with_export_sink<S: ExportSink + 'static>(mut self, sink: S) -> Self {
        self.export_sink = Some(Arc::new(sink));
        self
    }

    /// Set an output handler for streaming log lines.
    #[must_use]
    pub fn with_output_handler<H: OutputHandler + 'static>(mut self, handler: H) -> Self {
        self.output_handler = Some(Arc::new(handler));
        self
    }

    /// Share an existing widget registry.
    #[must_use]
    pub fn with_widget_registry(mut self, registry: Arc<WidgetRegistry>) -> Self {
        self.widgets = Some(registry);
        self
    }

    /// Share an existing insight registry.
    #[must_use]
    pub fn with_insight_registry(mut self, registry: Arc<InsightRegistry>) -> Self {
        self.insights = Some(registry);
        self
    }

    /// Share an existing metric registry.
    #[must_use]
    pub fn with_metric_registry(mut self, registry: Arc<MetricRegistry>) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Set resource limits.
    #[must_use]
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    /// Build the sandbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the network client cannot be created.
    pub fn build(self) -> Result<Sandbox, Error> {
        let network: Arc<dyn Callback> = match self.network {
            Some(config) => Arc::new(NetworkCallback::new(config)?),
            None => Arc::new(DisabledNetwork),
        };

        Ok(Sandbox {
            network,
            export_sink: self.export_sink.unwrap_or_else(|| Arc::new(AuditOnlyExport)),
            output_handler: self.output_handler,
            widgets: self.widgets.unwrap_or_default(),
            insights: self.insights.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
            resource_limits: self.resource_limits,
            abandoned: Mutex::new(Vec::new()),
        })
    }
}

/// Category of a script failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    /// The script text did not compile.
    Compile,
    /// The script threw.
    Runtime,
    /// The script ran past the execution deadline.
    Timeout,
}

/// A script-level failure, reported as data rather than `Err`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    /// Category.
    pub kind: ScriptErrorKind,
    /// The error's message.
    pub message: String,
    /// Stack or trace text, if the engine provided one.
    pub trace: Option<String>,
}

/// Result of one run.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    /// One entry per `log` call or audit echo, in order.
    pub log_lines: Vec<String>,
    /// Set when the script failed to compile, threw, or timed out.
    pub error: Option<ScriptError>,
    /// Execution statistics.
    pub stats: ExecuteStats,
}

impl ExecuteResult {
    fn finish(
        output: &OutputChannel,
        error: Option<ScriptError>,
        start: Instant,
        callback_invocations: u32,
    ) -> Self {
        Self {
            log_lines: output.lines(),
            error,
            stats: ExecuteStats {
                duration: start.elapsed(),
                callback_invocations,
            },
        }
    }

    /// Whether the script ran to completion.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The error message, if the run failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// The error trace, if the run failed and one is available.
    #[must_use]
    pub fn error_trace(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.trace.as_deref())
    }

    /// Text for the output pane.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = self.log_lines.join("\n");
        match &self.error {
            None if text.is_empty() => "(no output)".to_string(),
            None => text,
            Some(error) => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str("Error: ");
                text.push_str(&error.message);
                if let Some(trace) = &error.trace {
                    text.push_str("\n\n");
                    text.push_str(trace);
                }
                text
            }
        }
    }
}

/// Statistics about one run.
#[derive(Debug, Clone)]
pub struct ExecuteStats {
    /// Wall-clock time until the result was produced.
    pub duration: Duration,
    /// Number of host calls the script made.
    pub callback_invocations: u32,
}

/// Resource limits for sandbox execution.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum wall-clock time for the entire script.
    pub execution_timeout: Option<Duration>,
    /// Maximum time for a single capability call.
    pub callback_timeout: Option<Duration>,
    /// Maximum number of capability calls per run. `log` is not counted.
    pub max_callback_invocations: Option<u32>,
    /// Maximum iterations of any single loop.
    pub max_loop_iterations: u64,
    /// Maximum call depth.
    pub max_recursion_depth: usize,
    /// Maximum script size.
    pub max_code_bytes: usize,
    /// Timed-out runs that may still be executing before new runs are
    /// refused.
    pub max_abandoned_runs: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            execution_timeout: Some(Duration::from_secs(30)),
            callback_timeout: Some(Duration::from_secs(10)),
            max_callback_invocations: Some(1000),
            max_loop_iterations: 10_000_000,
            max_recursion_depth: 512,
            max_code_bytes: 1024 * 1024,
            max_abandoned_runs: 1,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn result(lines: &[&str], error: Option<ScriptError>) -> ExecuteResult {
        ExecuteResult {
            log_lines: lines.iter().map(ToString::to_string).collect(),
            error,
            stats: ExecuteStats {
                duration: Duration::ZERO,
                callback_invocations: 0,
            },
        }
    }

    fn boom(trace: Option<&str>) -> Option<ScriptError> {
        Some(ScriptError {
            kind: ScriptErrorKind::Runtime,
            message: "boom".to_string(),
            trace: trace.map(ToString::to_string),
        })
    }

    #[test]
    fn render_empty_success() {
        assert_eq!(result(&[], None).render(), "(no output)");
    }

    #[test]
    fn render_joins_lines() {
        assert_eq!(result(&["a", "b"], None).render(), "a\nb");
    }

    #[test]
    fn render_appends_error_and_trace() {
        let rendered = result(&["x"], boom(Some("Error: boom"))).render();
        assert_eq!(rendered, "x\nError: boom\n\nError: boom");
        assert_eq!(result(&[], boom(None)).render(), "Error: boom");
    }

    #[test]
    fn error_accessors() {
        let r = result(&["x"], boom(Some("trace")));
        assert!(!r.is_success());
        assert_eq!(r.error_message(), Some("boom"));
        assert_eq!(r.error_trace(), Some("trace"));
    }

    #[test]
    fn default_limits() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.execution_timeout, Some(Duration::from_secs(30)));
        assert_eq!(limits.max_callback_invocations, Some(1000));
        assert_eq!(limits.max_code_bytes, 1024 * 1024);
        assert_eq!(limits.max_abandoned_runs, 1);
    }

    #[tokio::test]
    async fn oversized_script_is_rejected_before_running() {
        let sandbox = Sandbox::builder()
            .with_resource_limits(ResourceLimits {
                max_code_bytes: 8,
                ..ResourceLimits::default()
            })
            .build()
            .unwrap();
        let result = sandbox
            .execute("log('this is too long')", &DatasetSnapshot::new())
            .await
            .unwrap();
        assert_eq!(result.error.unwrap().kind, ScriptErrorKind::Compile);
        assert!(result.log_lines.is_empty());
    }
}
