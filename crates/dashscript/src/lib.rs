//! # dashscript
//!
//! A capability-scoped JavaScript console for analytics dashboards.
//!
//! Scripts run on the embedded Boa engine against a point-in-time copy of
//! the dashboard's dataset. The only way a script can affect the host is
//! through the functions bound into its scope:
//!
//! - `dataset`, `filters` - the snapshot values
//! - `log(...values)` - console output
//! - `addWidget`, `addInsight`, `addMetric` - append to the registries
//! - `exportData(format)` - hand the snapshot to an export sink
//! - `networkCall(url, options?)` - allowlisted HTTP, disabled unless configured
//!
//! Every run is bounded by a wall-clock timeout plus loop and recursion
//! limits, and reports its output and any error as data.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dashscript::{Channel, DatasetSnapshot, Sandbox};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dashscript::Error> {
//!     let sandbox = Sandbox::builder().build()?;
//!     let snapshot = DatasetSnapshot::new()
//!         .with_channel(Channel::Shopify, vec![json!({"revenue": 1250.5})]);
//!
//!     let result = sandbox
//!         .execute("log('Revenue:', dataset.shopify[0].revenue)", &snapshot)
//!         .await?;
//!
//!     println!("{}", result.render());
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

mod binding;
mod callback;
mod callback_handler;
mod capabilities;
mod console;
mod dataset;
mod engine;
mod error;
mod export;
mod network;
mod output;
pub mod registry;
mod sandbox;
pub mod session;

pub use binding::{BindingInfo, BindingKind, BindingSet, VALUE_BINDINGS};
pub use callback::{Callback, CallbackError, CallbackFuture};
pub use capabilities::{
    AddInsightCallback, AddMetricCallback, AddWidgetCallback, ExportDataCallback, LogCallback,
};
pub use console::ScriptConsole;
pub use dataset::{Channel, DatasetSnapshot, InMemoryDataset, SnapshotProvider};
pub use error::Error;
pub use export::{AuditOnlyExport, DirectoryExport, ExportError, ExportFormat, ExportReceipt, ExportSink};
pub use network::{DisabledNetwork, HttpMethod, NetworkCallback, NetworkConfig, NetworkConfigBuilder, RequestOptions};
pub use output::{OutputChannel, OutputHandler, format_log_values};
pub use registry::{
    InsightRecord, InsightRegistry, MetricCard, MetricRegistry, RegistryError, Severity,
    WidgetDescriptor, WidgetRegistry,
};
pub use sandbox::{
    ExecuteResult, ExecuteStats, ResourceLimits, Sandbox, SandboxBuilder, ScriptError,
    ScriptErrorKind,
};
pub use session::{ScriptSession, SessionError, SessionId, SessionManager};
