//! Orchestration of one reconciliation pass.
//!
//! The [`SyncController`] owns the target model, the import feed, the three
//! queues and the diff worker pool. A pass runs strictly in this order:
//!
//! 1. drain: wait until every queued import record has been diffed;
//! 2. apply every queued update;
//! 3. apply every queued add, creating groups on demand;
//!
//! after which the caller persists the model with [`SyncController::save`].
//!
//! The target model sits behind an `RwLock`: workers take read locks while
//! diffing, and the apply phases take the write lock only after the drain,
//! so reads and writes never interleave. A lock mechanism prevents
//! concurrent passes on the same controller.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::classifier::ElementClassifier;
use crate::config::SyncSettings;
use crate::diff::pool::DiffWorkerPool;
use crate::errors::{ApplyError, SyncError};
use crate::import_model::ImportSource;
use crate::models::{AddSummary, SyncStats, UpdateSummary};
use crate::queue::{AddChange, ChangeQueues, ImportQueue, UpdateChange};
use crate::target_model::{type_uri_for, PropertyWrite, TargetModel, TargetRecord};

/// Copy of the change queues at one point in time.
#[derive(Debug, Clone, Default)]
pub struct PendingChanges {
    pub adds: Vec<AddChange>,
    pub updates: Vec<UpdateChange>,
}

/// Progress counters for reporting while a pass is draining.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PendingCounts {
    pub imports: usize,
    pub updates: usize,
    pub adds: usize,
    pub active_workers: usize,
}

pub struct SyncController {
    model: Arc<RwLock<TargetModel>>,
    source: ImportSource,
    import_queue: Arc<ImportQueue>,
    changes: Arc<ChangeQueues>,
    pool: DiffWorkerPool,
    settings: SyncSettings,
    running: Arc<AtomicBool>,
    pass_started: Mutex<Option<DateTime<Utc>>>,
}

impl SyncController {
    /// Queue every import record and start the diff workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(model: TargetModel, source: ImportSource, settings: SyncSettings) -> Self {
        let model = Arc::new(RwLock::new(model));
        let import_queue = Arc::new(ImportQueue::new());
        let changes = Arc::new(ChangeQueues::default());

        import_queue.extend(source.records().iter().cloned());
        info!(records = import_queue.len(), "import queue loaded");

        let pool = DiffWorkerPool::start(
            settings.worker_count,
            import_queue.clone(),
            model.clone(),
            source.settings().clone(),
            changes.clone(),
            Arc::new(AtomicBool::new(false)),
            settings.backoff,
        );

        Self {
            model,
            source,
            import_queue,
            changes,
            pool,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            pass_started: Mutex::new(None),
        }
    }

    /// Queue every import record again for a further diff pass.
    pub fn load_import_queue(&self) -> usize {
        let records = self.source.records();
        self.import_queue.extend(records.iter().cloned());
        info!(records = records.len(), "import queue reloaded");
        records.len()
    }

    /// Shared handle to the target model.
    pub fn model(&self) -> Arc<RwLock<TargetModel>> {
        self.model.clone()
    }

    pub fn source(&self) -> &ImportSource {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queued updates. Advisory only; not synchronized with the drain.
    pub fn pending_update_count(&self) -> usize {
        self.changes.updates.len()
    }

    /// Queued adds. Advisory only; not synchronized with the drain.
    pub fn pending_add_count(&self) -> usize {
        self.changes.adds.len()
    }

    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            imports: self.import_queue.len(),
            updates: self.pending_update_count(),
            adds: self.pending_add_count(),
            active_workers: self.pool.active_workers(),
        }
    }

    /// Snapshot of the queued changes, leaving the queues untouched.
    pub fn pending_changes(&self) -> PendingChanges {
        PendingChanges {
            adds: self.changes.adds.snapshot(),
            updates: self.changes.updates.snapshot(),
        }
    }

    pub fn active_workers(&self) -> usize {
        self.pool.active_workers()
    }

    pub fn worker_faults(&self) -> usize {
        self.pool.fault_count()
    }

    // -----------------------------------------------------------------------
    // Drain
    // -----------------------------------------------------------------------

    /// Wait until the import queue is empty and no record is still being
    /// diffed, polling at the configured interval.
    ///
    /// Fails with [`SyncError::PoolExhausted`] if every worker has stopped
    /// while import records are still queued.
    pub async fn drain(&self) -> Result<(), SyncError> {
        loop {
            let remaining = self.import_queue.len();
            if remaining == 0 && self.pool.in_flight() == 0 {
                debug!("import queue drained");
                return Ok(());
            }
            if self.pool.active_workers() == 0 {
                error!(remaining, "no diff workers left to drain the import queue");
                return Err(SyncError::PoolExhausted { remaining });
            }
            debug!(
                remaining,
                in_flight = self.pool.in_flight(),
                updates = self.pending_update_count(),
                adds = self.pending_add_count(),
                "waiting for diff workers"
            );
            tokio::time::sleep(self.settings.drain_poll).await;
        }
    }

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------

    fn write_model(&self) -> Result<RwLockWriteGuard<'_, TargetModel>, ApplyError> {
        self.model.write().map_err(|_| ApplyError::LockPoisoned)
    }

    fn read_model(&self) -> Result<RwLockReadGuard<'_, TargetModel>, ApplyError> {
        self.model.read().map_err(|_| ApplyError::LockPoisoned)
    }

    /// Apply every queued update to the target model.
    ///
    /// The name is written first, then every non-excluded import property is
    /// created or overwritten, whichever difference queued the update.
    pub fn apply_updates(&self) -> Result<UpdateSummary, ApplyError> {
        self.apply_updates_inner()
            .inspect_err(|e| error!(error = %e, "applying updates failed"))
    }

    fn apply_updates_inner(&self) -> Result<UpdateSummary, ApplyError> {
        let settings = self.source.settings();
        let mut model = self.write_model()?;
        let mut summary = UpdateSummary::default();

        while let Some(update) = self.changes.updates.pop() {
            let import = &update.import;
            let record = model
                .record_mut(&update.target_id)
                .ok_or_else(|| ApplyError::RecordNotFound(update.target_id.clone()))?;

            if record.name != import.name {
                info!(
                    record_id = record.id(),
                    old = %record.name,
                    new = %import.name,
                    "update element name"
                );
                record.name = import.name.clone();
                summary.names_changed += 1;
            }

            for property in import.compared_properties(settings) {
                match record.set_property(&property.key, &property.value) {
                    PropertyWrite::Added => {
                        info!(record_id = record.id(), key = %property.key, "add property");
                        summary.properties_added += 1;
                    }
                    PropertyWrite::Changed => {
                        info!(record_id = record.id(), key = %property.key, "update property");
                        summary.properties_changed += 1;
                    }
                    PropertyWrite::Unchanged => {}
                }
            }
            summary.records_updated += 1;
        }

        Ok(summary)
    }

    /// Create a target record for every queued add.
    ///
    /// Each record lands in the group named by its import record, directly
    /// under the partition its type classifies to; the group is created if
    /// absent. Partitions are never created.
    pub fn apply_adds(&self) -> Result<AddSummary, ApplyError> {
        self.apply_adds_inner()
            .inspect_err(|e| error!(error = %e, "applying adds failed"))
    }

    fn apply_adds_inner(&self) -> Result<AddSummary, ApplyError> {
        let settings = self.source.settings();
        let mut model = self.write_model()?;
        let mut summary = AddSummary::default();

        while let Some(add) = self.changes.adds.pop() {
            let import = &add.import;
            let partition = ElementClassifier::classify(&import.record_type)?;

            let mut record =
                TargetRecord::new(import.name.as_str(), type_uri_for(&import.record_type));
            for property in import.compared_properties(settings) {
                record.set_property(&property.key, &property.value);
            }
            // Without it the record would be added again on the next pass.
            if record.property(&settings.identity_key).is_none() {
                record.set_property(&settings.identity_key, &import.identity_value);
            }

            let (group, created) = model
                .partition_mut(partition.folder_name())?
                .ensure_group(&import.group)?;
            if created {
                info!(group = %import.group, partition = %partition, "add new folder");
                summary.groups_created += 1;
            }

            info!(
                record_id = record.id(),
                name = %record.name,
                group = %import.group,
                "add new element"
            );
            group.records.push(record);
            summary.records_added += 1;
        }

        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Drain, then apply updates, then apply adds.
    ///
    /// An apply failure aborts the rest of the pass; changes already applied
    /// stay in the model.
    pub async fn sync_changes(&self) -> Result<SyncStats, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let started_at = self
                .pass_started
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .map(DateTime::to_rfc3339)
                .unwrap_or_default();
            return Err(SyncError::AlreadyRunning { started_at });
        }
        let _guard = SyncLockGuard(self.running.clone());

        let started_at = Utc::now();
        *self
            .pass_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(started_at);

        let mut stats = SyncStats {
            started_at: Some(started_at),
            ..Default::default()
        };

        self.drain().await?;
        stats.updates = self.apply_updates()?;
        stats.adds = self.apply_adds()?;
        stats.worker_faults = self.pool.fault_count();
        stats.completed_at = Some(Utc::now());

        info!(
            updated = stats.updates.records_updated,
            added = stats.adds.records_added,
            groups_created = stats.adds.groups_created,
            worker_faults = stats.worker_faults,
            "sync pass complete"
        );
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Persistence & shutdown
    // -----------------------------------------------------------------------

    /// Overwrite `path` with the whole target model.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ApplyError> {
        let path = path.as_ref();
        let document = self.read_model()?.to_xml_string()?;

        std::fs::write(path, document)
            .map_err(|source| ApplyError::Save {
                path: path.display().to_string(),
                source,
            })
            .inspect_err(|e| error!(error = %e, "failed to save target model"))?;

        info!(path = %path.display(), "target model saved");
        Ok(())
    }

    /// Cancel the workers and wait a bounded time for them to stop.
    pub async fn shutdown(&mut self) -> bool {
        self.pool
            .shutdown(self.settings.shutdown_retries, self.settings.shutdown_poll)
            .await
    }
}

/// Drop guard that resets the `running` flag to `false`.
struct SyncLockGuard(Arc<AtomicBool>);

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
