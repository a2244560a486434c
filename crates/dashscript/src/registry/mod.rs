//! Registries for script-emitted widgets, insights and metric cards.
//!
//! Scripts can only append (through the `addWidget`, `addInsight` and
//! `addMetric` capabilities); the host assigns every id. Removal and the
//! insight lifecycle are driven by the UI layer.
//!
//! Appends go through a lock so the registries stay consistent if runs are
//! ever executed concurrently.

mod insight;
mod metric;
mod widget;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use insight::{InsightRecord, InsightRegistry, InsightSpec, Severity};
pub use metric::{MetricCard, MetricFormat, MetricRegistry, MetricSpec};
pub use widget::{WidgetDescriptor, WidgetKind, WidgetRegistry, WidgetSpec};

/// Errors from registry lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No entry with this id.
    #[error("no entry with id '{0}'")]
    NotFound(String),
}

/// Items stored in a registry.
pub(crate) trait Identified {
    fn id(&self) -> &str;
}

/// Insertion-ordered collection shared by the registries.
#[derive(Debug)]
pub(crate) struct Ordered<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for Ordered<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Identified + Clone> Ordered<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, item: T) {
        self.lock().push(item);
    }

    pub(crate) fn remove(&self, id: &str) -> Option<T> {
        let mut items = self.lock();
        let index = items.iter().position(|item| item.id() == id)?;
        Some(items.remove(index))
    }

    pub(crate) fn get(&self, id: &str) -> Option<T> {
        self.lock().iter().find(|item| item.id() == id).cloned()
    }

    pub(crate) fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, RegistryError> {
        let mut items = self.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id() == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        Ok(f(item))
    }

    pub(crate) fn list(&self) -> Vec<T> {
        self.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Host-assigned id: `<prefix>-<uuid>`.
pub(crate) fn fresh_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// Reject empty or whitespace-only text fields.
pub(crate) fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("`{field}` must not be empty"))
    } else {
        Ok(())
    }
}
