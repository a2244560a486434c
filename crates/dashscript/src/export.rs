//! Export collaborator behind the `exportData` capability.
//!
//! The console hands the run's snapshot to an [`ExportSink`]. The default
//! [`AuditOnlyExport`] only acknowledges the request; [`DirectoryExport`]
//! writes files into a fresh timestamped directory per export.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::dataset::{Channel, DatasetSnapshot};

/// File format requested by a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// One comma-separated file per channel.
    Csv,
    /// One JSON document with every channel.
    Json,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => f.write_str("CSV"),
            Self::Json => f.write_str("JSON"),
        }
    }
}

/// Errors from export sinks.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The script asked for a format no sink supports.
    #[error("unsupported export format '{0}' (expected csv or json)")]
    UnsupportedFormat(String),

    /// Writing the export failed.
    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the export failed.
    #[error("failed to encode export: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What an export produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReceipt {
    /// Format written.
    pub format: ExportFormat,
    /// Number of records covered.
    pub records: usize,
    /// Where the files went, for sinks that write any.
    pub location: Option<PathBuf>,
}

/// Receives dataset exports triggered by scripts.
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Export `snapshot` in `format`.
    async fn export(
        &self,
        format: ExportFormat,
        snapshot: &DatasetSnapshot,
    ) -> Result<ExportReceipt, ExportError>;
}

/// Acknowledges exports without writing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditOnlyExport;

#[async_trait]
impl ExportSink for AuditOnlyExport {
    async fn export(
        &self,
        format: ExportFormat,
        snapshot: &DatasetSnapshot,
    ) -> Result<ExportReceipt, ExportError> {
        Ok(ExportReceipt {
            format,
            records: snapshot.record_count(),
            location: None,
        })
    }
}

/// Writes each export into `<root>/export-<timestamp>-<suffix>/`.
#[derive(Debug, Clone)]
pub struct DirectoryExport {
    root: PathBuf,
}

impl DirectoryExport {
    /// Export under `root`, which is created on first use.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory exports are written under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fresh_dir(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.root
            .join(format!("export-{stamp}-{}", &suffix[..8]))
    }
}

#[async_trait]
impl ExportSink for DirectoryExport {
    async fn export(
        &self,
        format: ExportFormat,
        snapshot: &DatasetSnapshot,
    ) -> Result<ExportReceipt, ExportError> {
        let dir = self.fresh_dir();
        tokio::fs::create_dir_all(&dir).await?;

        match format {
            ExportFormat::Csv => {
                for channel in Channel::ALL {
                    let records = snapshot.records(channel);
                    if records.is_empty() {
                        continue;
                    }
                    let path = dir.join(format!("{channel}.csv"));
                    tokio::fs::write(&path, render_csv(records)).await?;
                }
            }
            ExportFormat::Json => {
                let body = serde_json::to_vec_pretty(&snapshot.to_script_value())?;
                tokio::fs::write(dir.join("dataset.json"), body).await?;
            }
        }

        tracing::debug!(dir = %dir.display(), %format, "export written");
        Ok(ExportReceipt {
            format,
            records: snapshot.record_count(),
            location: Some(dir),
        })
    }
}

/// Render records as CSV. Columns are the union of record keys in
/// first-seen order; non-object records land in a `value` column.
fn render_csv(records: &[Value]) -> String {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        match record {
            Value::Object(map) => {
                for key in map.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
            _ => {
                if !columns.iter().any(|c| c == "value") {
                    columns.push("value".to_string());
                }
            }
        }
    }

    let mut out = columns
        .iter()
        .map(|c| csv_field(c))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');

    for record in records {
        let row = columns
            .iter()
            .map(|column| {
                let cell = match record {
                    Value::Object(map) => map.get(column),
                    other if column == "value" => Some(other),
                    _ => None,
                };
                cell.map_or_else(String::new, |v| csv_field(&cell_text(v)))
            })
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&row);
        out.push('\n');
    }
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}
