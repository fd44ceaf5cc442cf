//! archisync core library.
//!
//! This crate reconciles an ArchiMate target model with a flat import feed:
//! document loading, element classification, the concurrent diff worker
//! pool, the change queues, and the sync controller that applies and saves
//! the changes.

pub mod classifier;
pub mod config;
pub mod diff;
pub mod errors;
pub mod import_model;
pub mod models;
pub mod queue;
pub mod sync_controller;
pub mod target_model;
pub mod xml;

// Re-exports for convenience.
pub use classifier::{ElementClassifier, Partition};
pub use config::{AppConfig, SyncSettings};
pub use import_model::ImportSource;
pub use sync_controller::SyncController;
pub use target_model::TargetModel;
