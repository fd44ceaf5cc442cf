//! Error types for the archisync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`.
//!
//! Propagation follows the phase the error occurs in:
//! - load-time errors ([`ConfigError`], [`ModelError`]) are fatal and returned
//!   to the caller immediately;
//! - per-record diff errors ([`DiffError`]) stay inside the worker pool;
//! - apply-phase errors ([`ApplyError`]) abort the rest of the sync pass and
//!   are returned to the caller, leaving already-applied changes in place.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and from the import document's
/// mandatory sections.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config or input file not found.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// A mandatory section of the import document is absent.
    #[error("import document is missing mandatory section '{0}'")]
    MissingSection(String),

    /// A section that must appear exactly once appears several times.
    #[error("import document section '{section}' must appear once, found {count}")]
    AmbiguousSection {
        section: String,
        count: usize,
    },

    /// An import element lacks a mandatory attribute.
    #[error("import element #{position} is invalid: {detail}")]
    InvalidElement {
        position: usize,
        detail: String,
    },

    /// The import document could not be read as XML.
    #[error("import document error: {0}")]
    Document(#[from] ModelError),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

/// Errors from the XML layer and from structural queries on the target tree.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The document is not well-formed XML.
    #[error("XML error: {0}")]
    Xml(String),

    /// The document has no root element.
    #[error("document has no root element")]
    EmptyDocument,

    /// An element lacks an attribute the model requires.
    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: String,
        attribute: String,
    },

    /// No top-level folder carries the requested partition name.
    #[error("partition '{0}' not found in target model")]
    PartitionNotFound(String),

    /// Several top-level folders carry the same partition name.
    #[error("partition '{name}' appears {count} times in target model")]
    DuplicatePartition {
        name: String,
        count: usize,
    },

    /// Several folders directly under a partition carry the same group name.
    #[error("group '{group}' appears {count} times under partition '{partition}'")]
    DuplicateGroup {
        partition: String,
        group: String,
        count: usize,
    },

    /// Generic I/O error reading a document.
    #[error("model I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Classifier errors
// ---------------------------------------------------------------------------

/// Errors from the element-type classifier.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The element type is not part of the known vocabulary.
    #[error("unknown element type '{0}'")]
    UnknownType(String),
}

// ---------------------------------------------------------------------------
// Diff errors
// ---------------------------------------------------------------------------

/// Errors raised while diffing a single import record.
///
/// [`DiffError::UnknownType`] skips the record and the worker carries on.
/// Every other variant is a worker fault: it is logged and ends that
/// worker's loop.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The record's type could not be classified.
    #[error(transparent)]
    UnknownType(#[from] ClassifyError),

    /// The target model could not answer the query.
    #[error("diff model error: {0}")]
    Model(#[from] ModelError),

    /// The target model lock was poisoned by a panicking writer.
    #[error("target model lock poisoned")]
    LockPoisoned,
}

impl DiffError {
    /// Whether this error ends the worker that hit it.
    pub fn is_worker_fault(&self) -> bool {
        !matches!(self, Self::UnknownType(_))
    }
}

// ---------------------------------------------------------------------------
// Apply errors
// ---------------------------------------------------------------------------

/// Errors from applying queued changes or persisting the target model.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A queued update refers to a record no longer in the model.
    #[error("target record '{0}' not found")]
    RecordNotFound(String),

    /// Structural failure in the target model.
    #[error("apply model error: {0}")]
    Model(#[from] ModelError),

    /// The record to add could not be classified.
    #[error("apply classify error: {0}")]
    Classify(#[from] ClassifyError),

    /// Writing the target document failed.
    #[error("failed to save target model to '{path}': {source}")]
    Save {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The target model lock was poisoned.
    #[error("target model lock poisoned")]
    LockPoisoned,
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the sync controller.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another sync pass is already running on this controller.
    #[error("sync already in progress (started at {started_at})")]
    AlreadyRunning {
        started_at: String,
    },

    /// Every diff worker has stopped while import records remain queued.
    #[error("all diff workers have stopped with {remaining} import records still queued")]
    PoolExhausted {
        remaining: usize,
    },

    /// Applying a change failed.
    #[error("sync apply error: {0}")]
    Apply(#[from] ApplyError),
}
