use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Identified, Ordered, fresh_id, require_text};

/// How a metric card renders its value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MetricFormat {
    /// Plain number.
    #[default]
    Number,
    /// Money amount.
    Currency,
    /// Percentage.
    Percent,
}

/// What a script passes to `addMetric`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MetricSpec {
    /// Card label.
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Defaults to `number`.
    #[serde(default)]
    pub format: MetricFormat,
    /// Optional caption.
    #[serde(default)]
    pub description: Option<String>,
}

impl MetricSpec {
    /// Check the constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        require_text("name", &self.name)?;
        if !self.value.is_finite() {
            return Err("`value` must be a finite number".to_string());
        }
        Ok(())
    }
}

/// A registered KPI card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCard {
    /// Host-assigned id.
    pub id: String,
    /// Card label.
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Rendering hint.
    pub format: MetricFormat,
    /// Optional caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Identified for MetricCard {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Ordered collection of custom KPI cards.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: Ordered<MetricCard>,
}

impl MetricRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a metric card under a fresh id.
    pub fn register(&self, spec: MetricSpec) -> MetricCard {
        let card = MetricCard {
            id: fresh_id("metric"),
            name: spec.name,
            value: spec.value,
            format: spec.format,
            description: spec.description,
        };
        self.metrics.push(card.clone());
        card
    }

    /// Remove a card (user action).
    pub fn remove(&self, id: &str) -> Option<MetricCard> {
        self.metrics.remove(id)
    }

    /// All cards in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<MetricCard> {
        self.metrics.list()
    }

    /// Number of cards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
