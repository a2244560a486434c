use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Identified, Ordered, fresh_id, require_text};

/// Chart type of a widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    /// Line chart.
    Line,
    /// Bar chart.
    Bar,
    /// Area chart.
    Area,
    /// Pie chart.
    Pie,
}

/// What a script passes to `addWidget`.
///
/// Unknown fields (including any caller-supplied `id`) are ignored.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSpec {
    /// Card title.
    pub title: String,
    /// Chart type.
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    /// Chart rows; each must be an object.
    pub data: Vec<Value>,
    /// Fields of each row to plot.
    pub data_keys: Vec<String>,
    /// Optional caption.
    #[serde(default)]
    pub description: Option<String>,
}

impl WidgetSpec {
    /// Check the constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        require_text("title", &self.title)?;
        if let Some(index) = self.data.iter().position(|row| !row.is_object()) {
            return Err(format!("`data[{index}]` must be an object"));
        }
        if let Some(index) = self.data_keys.iter().position(|k| k.trim().is_empty()) {
            return Err(format!("`dataKeys[{index}]` must not be empty"));
        }
        Ok(())
    }
}

/// A registered widget, as handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDescriptor {
    /// Host-assigned, registry-wide unique id.
    pub id: String,
    /// Card title.
    pub title: String,
    /// Chart type.
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    /// Chart rows.
    pub data: Vec<Value>,
    /// Fields of each row to plot.
    pub data_keys: Vec<String>,
    /// Optional caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Identified for WidgetDescriptor {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Ordered collection of widgets shown on the dashboard.
#[derive(Debug, Default)]
pub struct WidgetRegistry {
    widgets: Ordered<WidgetDescriptor>,
}

impl WidgetRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a widget under a freshly assigned id.
    ///
    /// `spec` must already be validated.
    pub fn register(&self, spec: WidgetSpec) -> WidgetDescriptor {
        let widget = WidgetDescriptor {
            id: fresh_id("widget"),
            title: spec.title,
            kind: spec.kind,
            data: spec.data,
            data_keys: spec.data_keys,
            description: spec.description,
        };
        tracing::debug!(id = %widget.id, title = %widget.title, "widget registered");
        self.widgets.push(widget.clone());
        widget
    }

    /// Remove a widget (user action).
    pub fn remove(&self, id: &str) -> Option<WidgetDescriptor> {
        self.widgets.remove(id)
    }

    /// Look up a widget by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<WidgetDescriptor> {
        self.widgets.get(id)
    }

    /// All widgets in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<WidgetDescriptor> {
        self.widgets.list()
    }

    /// Number of widgets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> Result<WidgetSpec, String> {
        let spec: WidgetSpec = serde_json::from_value(value).map_err(|e| e.to_string())?;
        spec.validate()?;
        Ok(spec)
    }

    #[test]
    fn accepts_well_formed_spec() {
        let spec = spec(json!({
            "title": "T",
            "type": "bar",
            "data": [{"a": 1}],
            "dataKeys": ["a"]
        }))
        .unwrap();
        assert_eq!(spec.kind, WidgetKind::Bar);
        assert!(spec.description.is_none());
    }

    #[test]
    fn rejects_unknown_type() {
        let err = spec(json!({"title": "T", "type": "scatter", "data": [], "dataKeys": []}))
            .unwrap_err();
        assert!(err.contains("scatter"), "{err}");
    }

    #[test]
    fn rejects_non_array_data() {
        let err = spec(json!({"title": "T", "type": "pie", "data": {}, "dataKeys": []}))
            .unwrap_err();
        assert!(err.contains("sequence"), "{err}");
    }

    #[test]
    fn rejects_missing_title() {
        let err = spec(json!({"type": "line", "data": [], "dataKeys": []})).unwrap_err();
        assert!(err.contains("title"), "{err}");
    }

    #[test]
    fn rejects_blank_title_and_scalar_rows() {
        let err = spec(json!({"title": " ", "type": "line", "data": [], "dataKeys": []}))
            .unwrap_err();
        assert!(err.contains("title"));

        let err = spec(json!({"title": "T", "type": "line", "data": [{"a": 1}, 3], "dataKeys": []}))
            .unwrap_err();
        assert!(err.contains("data[1]"));
    }

    #[test]
    fn caller_id_is_overwritten() {
        let registry = WidgetRegistry::new();
        let spec = spec(json!({
            "id": "mine",
            "title": "T",
            "type": "area",
            "data": [],
            "dataKeys": []
        }))
        .unwrap();
        let widget = registry.register(spec);
        assert_ne!(widget.id, "mine");
        assert!(widget.id.starts_with("widget-"));
    }

    #[test]
    fn remove_preserves_order_of_the_rest() {
        let registry = WidgetRegistry::new();
        let ids: Vec<String> = (0..3)
            .map(|i| {
                registry
                    .register(
                        spec(json!({"title": format!("w{i}"), "type": "line", "data": [], "dataKeys": []}))
                            .unwrap(),
                    )
                    .id
            })
            .collect();

        assert!(registry.remove(&ids[1]).is_some());
        assert!(registry.remove(&ids[1]).is_none());
        let titles: Vec<String> = registry.list().into_iter().map(|w| w.title).collect();
        assert_eq!(titles, vec!["w0", "w2"]);
    }

    #[test]
    fn serializes_type_field() {
        let registry = WidgetRegistry::new();
        let widget = registry.register(
            spec(json!({"title": "T", "type": "pie", "data": [], "dataKeys": ["v"]})).unwrap(),
        );
        let value = serde_json::to_value(&widget).unwrap();
        assert_eq!(value["type"], json!("pie"));
        assert_eq!(value["dataKeys"], json!(["v"]));
        assert!(value.get("description").is_none());
    }
}
