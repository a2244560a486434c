use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Identified, Ordered, RegistryError, fresh_id, require_text};

/// How urgent an insight is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    #[default]
    Info,
    /// Needs attention.
    Warning,
    /// Needs action now.
    Critical,
}

/// What a script passes to `addInsight`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InsightSpec {
    /// Defaults to `info`.
    #[serde(default)]
    pub severity: Severity,
    /// Headline.
    pub title: String,
    /// Detail text.
    pub body: String,
}

impl InsightSpec {
    /// Check the constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        require_text("title", &self.title)
    }
}

/// A registered insight in the alert feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    /// Host-assigned id.
    pub id: String,
    /// Urgency.
    pub severity: Severity,
    /// Headline.
    pub title: String,
    /// Detail text.
    pub body: String,
    /// When the script emitted it.
    pub timestamp: DateTime<Utc>,
    /// Hidden by the user.
    pub dismissed: bool,
    /// Temporarily hidden by the user.
    pub snoozed: bool,
    /// Pinned by the user.
    pub bookmarked: bool,
}

impl Identified for InsightRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Ordered alert feed. Scripts append; users dismiss, snooze and bookmark.
#[derive(Debug, Default)]
pub struct InsightRegistry {
    insights: Ordered<InsightRecord>,
}

impl InsightRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an insight stamped with the current time and cleared flags.
    pub fn register(&self, spec: InsightSpec) -> InsightRecord {
        let record = InsightRecord {
            id: fresh_id("insight"),
            severity: spec.severity,
            title: spec.title,
            body: spec.body,
            timestamp: Utc::now(),
            dismissed: false,
            snoozed: false,
            bookmarked: false,
        };
        tracing::debug!(id = %record.id, severity = ?record.severity, "insight registered");
        self.insights.push(record.clone());
        record
    }

    /// Mark an insight as dismissed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id.
    pub fn dismiss(&self, id: &str) -> Result<(), RegistryError> {
        self.insights.update(id, |record| record.dismissed = true)
    }

    /// Mark an insight as snoozed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id.
    pub fn snooze(&self, id: &str) -> Result<(), RegistryError> {
        self.insights.update(id, |record| record.snoozed = true)
    }

    /// Flip the bookmark flag, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id.
    pub fn toggle_bookmark(&self, id: &str) -> Result<bool, RegistryError> {
        self.insights.update(id, |record| {
            record.bookmarked = !record.bookmarked;
            record.bookmarked
        })
    }

    /// Remove an insight entirely.
    pub fn remove(&self, id: &str) -> Option<InsightRecord> {
        self.insights.remove(id)
    }

    /// Look up an insight by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<InsightRecord> {
        self.insights.get(id)
    }

    /// All insights in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<InsightRecord> {
        self.insights.list()
    }

    /// Insights that are neither dismissed nor snoozed.
    #[must_use]
    pub fn active(&self) -> Vec<InsightRecord> {
        self.list()
            .into_iter()
            .filter(|r| !r.dismissed && !r.snoozed)
            .collect()
    }

    /// Number of insights.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insights.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
