//! Shared FIFO queues connecting the import feed, the diff workers and the
//! sync controller.
//!
//! The queues are unbounded and safe for any number of producers and
//! consumers. With several consumers racing on [`ChangeQueue::pop`], no
//! end-to-end ordering is guaranteed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::import_model::ImportRecord;

// ---------------------------------------------------------------------------
// Change records
// ---------------------------------------------------------------------------

/// Why a matched target record needs a write.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UpdateReason {
    NameChanged { old: String, new: String },
    PropertyAdded { key: String },
    PropertyChanged { key: String },
}

impl std::fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NameChanged { old, new } => write!(f, "name '{old}' -> '{new}'"),
            Self::PropertyAdded { key } => write!(f, "property '{key}' added"),
            Self::PropertyChanged { key } => write!(f, "property '{key}' changed"),
        }
    }
}

/// An import record with no counterpart in the target.
#[derive(Debug, Clone)]
pub struct AddChange {
    pub import: Arc<ImportRecord>,
}

/// A matched target record that has drifted from its import record.
#[derive(Debug, Clone)]
pub struct UpdateChange {
    pub target_id: String,
    pub target_name: String,
    pub import: Arc<ImportRecord>,
    pub reason: UpdateReason,
}

/// Outcome of diffing one import record against one target record (or
/// against none, for an add).
#[derive(Debug, Clone)]
pub enum ChangeRecord {
    Add(AddChange),
    Update(UpdateChange),
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

/// The two output queues of the diff workers.
#[derive(Debug, Default)]
pub struct ChangeQueues {
    pub adds: AddQueue,
    pub updates: UpdateQueue,
}

impl ChangeQueues {
    /// Route a change to the queue matching its kind.
    pub fn publish(&self, change: ChangeRecord) {
        match change {
            ChangeRecord::Add(add) => self.adds.push(add),
            ChangeRecord::Update(update) => self.updates.push(update),
        }
    }
}

/// Mutex-guarded FIFO queue.
#[derive(Debug)]
pub struct ChangeQueue<T> {
    items: Mutex<VecDeque<T>>,
}

pub type ImportQueue = ChangeQueue<Arc<ImportRecord>>;
pub type AddQueue = ChangeQueue<AddChange>;
pub type UpdateQueue = ChangeQueue<UpdateChange>;

impl<T> Default for ChangeQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> ChangeQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    // Each critical section is a single VecDeque call; a poisoned lock
    // still guards a consistent queue.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&self, items: I) {
        self.lock().extend(items);
    }

    /// Take the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T: Clone> ChangeQueue<T> {
    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }
}
