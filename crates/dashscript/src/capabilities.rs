//! The built-in capabilities bound into every run.
//!
//! Each side-effecting capability appends exactly one audit echo to the
//! run's output when it succeeds, and nothing when it fails.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::callback::{Callback, CallbackError, CallbackFuture, positional};
use crate::dataset::DatasetSnapshot;
use crate::export::{ExportFormat, ExportSink};
use crate::output::{OutputChannel, format_log_values};
use crate::registry::{
    InsightRegistry, InsightSpec, MetricRegistry, MetricSpec, WidgetRegistry, WidgetSpec,
};

/// Schema for a call taking one object argument of type `T`.
fn single_argument_schema<T: JsonSchema>() -> Value {
    let item = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();
    json!({
        "type": "array",
        "prefixItems": [item],
        "minItems": 1,
    })
}

/// Decode the first positional argument into a descriptor.
fn descriptor<T: DeserializeOwned>(capability: &str, args: &Value) -> Result<T, CallbackError> {
    let raw = positional(args, 0);
    if !raw.is_object() {
        return Err(CallbackError::InvalidArguments(format!(
            "{capability} expects a descriptor object"
        )));
    }
    serde_json::from_value(raw.clone())
        .map_err(|e| CallbackError::InvalidArguments(format!("{capability}: {e}")))
}

fn validated(capability: &str, check: Result<(), String>) -> Result<(), CallbackError> {
    check.map_err(|message| CallbackError::InvalidArguments(format!("{capability}: {message}")))
}

/// `log(...values)`: one output line per call.
#[derive(Debug)]
pub struct LogCallback {
    output: Arc<OutputChannel>,
}

impl LogCallback {
    /// Log into `output`.
    #[must_use]
    pub fn new(output: Arc<OutputChannel>) -> Self {
        Self { output }
    }
}

impl Callback for LogCallback {
    fn name(&self) -> &str {
        "log"
    }

    fn description(&self) -> &str {
        "Append one line to the console output. Arguments are joined with a space; objects are pretty-printed."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "array" })
    }

    fn text_arguments(&self) -> bool {
        true
    }

    fn counts_toward_budget(&self) -> bool {
        false
    }

    fn invoke(&self, args: Value) -> CallbackFuture<'_> {
        Box::pin(async move {
            let line = match &args {
                Value::Array(values) => format_log_values(values),
                other => format_log_values(std::slice::from_ref(other)),
            };
            self.output.push(line).await;
            Ok(Value::Null)
        })
    }
}

/// `addWidget(descriptor)`: register a chart widget.
#[derive(Debug)]
pub struct AddWidgetCallback {
    registry: Arc<WidgetRegistry>,
    output: Arc<OutputChannel>,
}

impl AddWidgetCallback {
    /// Register into `registry`, echoing into `output`.
    #[must_use]
    pub fn new(registry: Arc<WidgetRegistry>, output: Arc<OutputChannel>) -> Self {
        Self { registry, output }
    }
}

impl Callback for AddWidgetCallback {
    fn name(&self) -> &str {
        "addWidget"
    }

    fn description(&self) -> &str {
        "Add a chart widget ({title, type: line|bar|area|pie, data, dataKeys, description?}). Returns the widget id."
    }

    fn parameters_schema(&self) -> Value {
        single_argument_schema::<WidgetSpec>()
    }

    fn invoke(&self, args: Value) -> CallbackFuture<'_> {
        Box::pin(async move {
            let spec: WidgetSpec = descriptor(self.name(), &args)?;
            validated(self.name(), spec.validate())?;
            let widget = self.registry.register(spec);
            self.output
                .push(format!("[Widget Added] {}", widget.title))
                .await;
            Ok(json!(widget.id))
        })
    }
}

/// `addInsight(descriptor)`: append to the alert feed.
#[derive(Debug)]
pub struct AddInsightCallback {
    registry: Arc<InsightRegistry>,
    output: Arc<OutputChannel>,
}

impl AddInsightCallback {
    /// Register into `registry`, echoing into `output`.
    #[must_use]
    pub fn new(registry: Arc<InsightRegistry>, output: Arc<OutputChannel>) -> Self {
        Self { registry, output }
    }
}

impl Callback for AddInsightCallback {
    fn name(&self) -> &str {
        "addInsight"
    }

    fn description(&self) -> &str {
        "Add an insight ({severity?: info|warning|critical, title, body}). Returns the insight id."
    }

    fn parameters_schema(&self) -> Value {
        single_argument_schema::<InsightSpec>()
    }

    fn invoke(&self, args: Value) -> CallbackFuture<'_> {
        Box::pin(async move {
            let spec: InsightSpec = descriptor(self.name(), &args)?;
            validated(self.name(), spec.validate())?;
            let record = self.registry.register(spec);
            self.output
                .push(format!("[Insight Added] {}", record.title))
                .await;
            Ok(json!(record.id))
        })
    }
}

/// `addMetric(descriptor)`: add a KPI card.
#[derive(Debug)]
pub struct AddMetricCallback {
    registry: Arc<MetricRegistry>,
    output: Arc<OutputChannel>,
}

impl AddMetricCallback {
    /// Register into `registry`, echoing into `output`.
    #[must_use]
    pub fn new(registry: Arc<MetricRegistry>, output: Arc<OutputChannel>) -> Self {
        Self { registry, output }
    }
}

impl Callback for AddMetricCallback {
    fn name(&self) -> &str {
        "addMetric"
    }

    fn description(&self) -> &str {
        "Add a KPI card ({name, value, format?: number|currency|percent, description?}). Returns the metric id."
    }

    fn parameters_schema(&self) -> Value {
        single_argument_schema::<MetricSpec>()
    }

    fn invoke(&self, args: Value) -> CallbackFuture<'_> {
        Box::pin(async move {
            let spec: MetricSpec = descriptor(self.name(), &args)?;
            validated(self.name(), spec.validate())?;
            let card = self.registry.register(spec);
            self.output
                .push(format!("[Metric Added] {}", card.name))
                .await;
            Ok(json!(card.id))
        })
    }
}

/// `exportData(format)`: hand the run's snapshot to the export sink.
pub struct ExportDataCallback {
    sink: Arc<dyn ExportSink>,
    snapshot: Arc<DatasetSnapshot>,
    output: Arc<OutputChannel>,
}

impl std::fmt::Debug for ExportDataCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportDataCallback")
            .field("records", &self.snapshot.record_count())
            .finish_non_exhaustive()
    }
}

impl ExportDataCallback {
    /// Export `snapshot` through `sink`, echoing into `output`.
    #[must_use]
    pub fn new(
        sink: Arc<dyn ExportSink>,
        snapshot: Arc<DatasetSnapshot>,
        output: Arc<OutputChannel>,
    ) -> Self {
        Self {
            sink,
            snapshot,
            output,
        }
    }
}

impl Callback for ExportDataCallback {
    fn name(&self) -> &str {
        "exportData"
    }

    fn description(&self) -> &str {
        "Export the current dataset. Format is 'csv' or 'json'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [{ "type": "string", "enum": ["csv", "json"] }],
            "minItems": 1,
        })
    }

    fn invoke(&self, args: Value) -> CallbackFuture<'_> {
        Box::pin(async move {
            let raw = positional(&args, 0).as_str().ok_or_else(|| {
                CallbackError::InvalidArguments("exportData expects a format string".to_string())
            })?;
            let format: ExportFormat = raw
                .parse()
                .map_err(|e: crate::export::ExportError| {
                    CallbackError::InvalidArguments(format!("exportData: {e}"))
                })?;

            let receipt = self
                .sink
                .export(format, &self.snapshot)
                .await
                .map_err(|e| CallbackError::ExecutionFailed(format!("export failed: {e}")))?;
            tracing::info!(%format, ?receipt, "dataset exported");

            self.output
                .push(format!("[Export] Data exported as {format}"))
                .await;
            Ok(Value::Null)
        })
    }
}
