//! Per-run output capture.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

/// Receives output lines as they are produced, for streaming to a UI.
#[async_trait]
pub trait OutputHandler: Send + Sync {
    /// Called once per appended line, in order.
    async fn on_output(&self, line: &str);
}

/// Append-only, ordered log of one run.
///
/// Each `log` call and each audit echo is exactly one entry. Entries are
/// joined only when the result is rendered.
#[derive(Default)]
pub struct OutputChannel {
    lines: Mutex<Vec<String>>,
    handler: Option<Arc<dyn OutputHandler>>,
}

impl std::fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannel")
            .field("lines", &self.len())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl OutputChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty channel that also forwards every line to `handler`.
    #[must_use]
    pub fn with_handler(handler: Option<Arc<dyn OutputHandler>>) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            handler,
        }
    }

    /// Append one line.
    pub async fn push(&self, line: impl Into<String>) {
        let line = line.into();
        if let Some(handler) = &self.handler {
            handler.on_output(&line).await;
        }
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    /// Copy of every line appended so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of lines appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Format the arguments of one `log` call into a single output line.
///
/// Strings are written verbatim, other primitives by their text form, and
/// arrays, objects and `null` as two-space indented JSON. Arguments are
/// separated by a single space.
#[must_use]
pub fn format_log_values(values: &[Value]) -> String {
    values
        .iter()
        .map(format_value)
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_are_verbatim() {
        assert_eq!(format_log_values(&[json!("hello")]), "hello");
    }

    #[test]
    fn multiple_arguments_share_one_line() {
        assert_eq!(
            format_log_values(&[json!("Today Revenue:"), json!(1250.5), json!(true)]),
            "Today Revenue: 1250.5 true"
        );
    }

    #[test]
    fn composites_are_pretty_printed() {
        let line = format_log_values(&[json!({"a": [1]})]);
        assert_eq!(line, "{\n  \"a\": [\n    1\n  ]\n}");
    }

    #[test]
    fn null_is_json() {
        assert_eq!(format_log_values(&[Value::Null]), "null");
    }

    #[test]
    fn empty_call_is_empty_line() {
        assert_eq!(format_log_values(&[]), "");
    }

    #[tokio::test]
    async fn channel_preserves_order() {
        let channel = OutputChannel::new();
        channel.push("a").await;
        channel.push("b").await;
        assert_eq!(channel.lines(), vec!["a", "b"]);
        assert_eq!(channel.len(), 2);
    }

    #[tokio::test]
    async fn handler_sees_every_line() {
        struct Collect(Mutex<Vec<String>>);

        #[async_trait]
        impl OutputHandler for Collect {
            async fn on_output(&self, line: &str) {
                self.0.lock().unwrap().push(line.to_string());
            }
        }

        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        let channel = OutputChannel::with_handler(Some(collect.clone()));
        channel.push("x").await;
        assert_eq!(*collect.0.lock().unwrap(), vec!["x"]);
    }
}
