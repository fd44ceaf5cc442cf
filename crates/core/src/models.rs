//! Domain value types shared by the documents, the diff and the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

/// A single key/value property. Property lists keep document order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Property {
    pub key: String,
    pub value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// First property with the given key.
pub fn find_property<'a>(properties: &'a [Property], key: &str) -> Option<&'a Property> {
    properties.iter().find(|p| p.key == key)
}

// ---------------------------------------------------------------------------
// Apply summaries
// ---------------------------------------------------------------------------

/// Outcome of draining the update queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Update entries applied (one per matched pair).
    pub records_updated: usize,
    pub names_changed: usize,
    pub properties_added: usize,
    pub properties_changed: usize,
}

/// Outcome of draining the add queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddSummary {
    pub records_added: usize,
    pub groups_created: usize,
}

// ---------------------------------------------------------------------------
// Sync statistics
// ---------------------------------------------------------------------------

/// Statistics from a single sync pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub updates: UpdateSummary,
    pub adds: AddSummary,
    /// Workers that have stopped after a fault since the pool started.
    pub worker_faults: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncStats {
    /// Whether the pass changed the target model at all.
    pub fn has_changes(&self) -> bool {
        self.updates.records_updated > 0 || self.adds.records_added > 0
    }
}
