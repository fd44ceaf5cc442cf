//! Fixed-size pool of diff workers.
//!
//! Every worker runs the same polling loop over the shared import queue:
//!
//! 1. stop if cancellation has been requested (checked only here, so the
//!    record a worker is holding is always finished first);
//! 2. take one import record, or sleep for the backoff interval when the
//!    queue is empty and go round again;
//! 3. diff the record against the target model under a read lock and publish
//!    the resulting changes.
//!
//! A record with an unknown type is logged and skipped. Any other diff error
//! stops the worker that hit it; stopped workers are not restarted, so the
//! pool shrinks. Faults are logged at error level and counted, and
//! [`DiffWorkerPool::active_workers`] reports how many workers remain.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::diff::detector::DiffDetector;
use crate::errors::DiffError;
use crate::import_model::{ImportRecord, ImportSettings};
use crate::queue::{ChangeQueues, ImportQueue};
use crate::target_model::TargetModel;

/// Shared cooperative cancellation flag.
pub type CancelFlag = Arc<AtomicBool>;

/// Why a worker loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    Faulted(String),
}

/// Marks one record as in flight for as long as it is alive.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State shared by every worker of one pool.
struct WorkerContext {
    import_queue: Arc<ImportQueue>,
    model: Arc<RwLock<TargetModel>>,
    settings: Arc<ImportSettings>,
    changes: Arc<ChangeQueues>,
    cancel: CancelFlag,
    in_flight: Arc<AtomicUsize>,
    faults: Arc<AtomicUsize>,
    backoff: Duration,
}

impl WorkerContext {
    /// Diff one record and publish its changes. Returns how many were published.
    fn process(&self, record: &Arc<ImportRecord>) -> Result<usize, DiffError> {
        let model = self.model.read().map_err(|_| DiffError::LockPoisoned)?;
        let changes = DiffDetector::diff_record(record, &model, &self.settings)?;
        drop(model);

        let published = changes.len();
        for change in changes {
            self.changes.publish(change);
        }
        Ok(published)
    }
}

async fn run_worker(ctx: Arc<WorkerContext>) -> WorkerExit {
    debug!("diff worker started");

    loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            debug!("cancellation observed, diff worker stopping");
            return WorkerExit::Cancelled;
        }

        // Counted before the pop so a drained queue never hides a record
        // that is still being diffed.
        let in_flight = InFlightGuard::enter(&ctx.in_flight);
        let Some(record) = ctx.import_queue.pop() else {
            drop(in_flight);
            tokio::time::sleep(ctx.backoff).await;
            continue;
        };

        let result = ctx.process(&record);
        drop(in_flight);

        match result {
            Ok(published) => {
                debug!(name = %record.name, published, "import record diffed");
            }
            Err(e) if !e.is_worker_fault() => {
                warn!(name = %record.name, error = %e, "import record skipped");
            }
            Err(e) => {
                ctx.faults.fetch_add(1, Ordering::SeqCst);
                error!(
                    name = %record.name,
                    error = %e,
                    "diff worker fault; worker stopped and will not be replaced"
                );
                return WorkerExit::Faulted(e.to_string());
            }
        }
    }
}

/// Handle to a running set of diff workers.
pub struct DiffWorkerPool {
    handles: Vec<JoinHandle<WorkerExit>>,
    cancel: CancelFlag,
    in_flight: Arc<AtomicUsize>,
    faults: Arc<AtomicUsize>,
}

impl DiffWorkerPool {
    /// Spawn `worker_count` workers on the current tokio runtime.
    pub fn start(
        worker_count: usize,
        import_queue: Arc<ImportQueue>,
        model: Arc<RwLock<TargetModel>>,
        settings: Arc<ImportSettings>,
        changes: Arc<ChangeQueues>,
        cancel: CancelFlag,
        backoff: Duration,
    ) -> Self {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let faults = Arc::new(AtomicUsize::new(0));
        let ctx = Arc::new(WorkerContext {
            import_queue,
            model,
            settings,
            changes,
            cancel: cancel.clone(),
            in_flight: in_flight.clone(),
            faults: faults.clone(),
            backoff,
        });

        let handles = (0..worker_count)
            .map(|worker| {
                let span = info_span!("diff_worker", worker);
                tokio::spawn(run_worker(ctx.clone()).instrument(span))
            })
            .collect();

        info!(
            workers = worker_count,
            backoff_ms = backoff.as_millis() as u64,
            "diff worker pool started"
        );

        Self {
            handles,
            cancel,
            in_flight,
            faults,
        }
    }

    /// Workers whose loop is still running.
    pub fn active_workers(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Workers that have stopped after a fault.
    pub fn fault_count(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }

    /// Records taken off the import queue whose changes are not yet published.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Ask every worker to stop at its next loop boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Cancel the workers and wait for them, polling up to `retries` times.
    ///
    /// Workers still running after the last poll are left detached. Returns
    /// whether every worker stopped in time.
    pub async fn shutdown(&mut self, retries: u32, poll: Duration) -> bool {
        self.cancel();

        let mut remaining = retries;
        while self.active_workers() > 0 && remaining > 0 {
            tokio::time::sleep(poll).await;
            remaining -= 1;
        }

        let still_running = self.active_workers();
        for (worker, handle) in self.handles.drain(..).enumerate() {
            if !handle.is_finished() {
                continue;
            }
            match handle.await {
                Ok(WorkerExit::Cancelled) => debug!(worker, "diff worker stopped"),
                Ok(WorkerExit::Faulted(reason)) => {
                    debug!(worker, %reason, "diff worker had stopped after a fault")
                }
                Err(e) => warn!(worker, error = %e, "diff worker panicked"),
            }
        }

        if still_running > 0 {
            debug!(still_running, "diff workers did not stop within the shutdown window");
        } else {
            info!("diff worker pool stopped");
        }
        still_running == 0
    }
}

impl Drop for DiffWorkerPool {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Property;

    const BACKOFF: Duration = Duration::from_millis(5);

    fn model() -> Arc<RwLock<TargetModel>> {
        let model = TargetModel::from_xml_str(
            r#"<model>
  <folder name="Technology &amp; Physical" id="f-1">
    <element xsi:type="archimate:Node" name="N1" id="e-1">
      <property key="idx" value="IDX1"/>
    </element>
  </folder>
</model>"#,
        )
        .unwrap();
        Arc::new(RwLock::new(model))
    }

    fn settings() -> Arc<ImportSettings> {
        Arc::new(ImportSettings {
            identity_key: "idx".into(),
            ..Default::default()
        })
    }

    fn record(record_type: &str, name: &str, identity: &str) -> Arc<ImportRecord> {
        Arc::new(ImportRecord {
            record_type: record_type.into(),
            name: name.into(),
            identity_value: identity.into(),
            group: "G".into(),
            properties: vec![Property::new("idx", identity)],
        })
    }

    async fn wait_until_idle(queue: &ImportQueue, pool: &DiffWorkerPool) {
        while !(queue.is_empty() && pool.in_flight() == 0) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn start(
        workers: usize,
        queue: &Arc<ImportQueue>,
        changes: &Arc<ChangeQueues>,
    ) -> DiffWorkerPool {
        DiffWorkerPool::start(
            workers,
            queue.clone(),
            model(),
            settings(),
            changes.clone(),
            Arc::new(AtomicBool::new(false)),
            BACKOFF,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_routes_adds_and_updates() {
        let queue = Arc::new(ImportQueue::new());
        let changes = Arc::new(ChangeQueues::default());
        queue.extend((0..20).map(|i| record("Node", &format!("new-{i}"), &format!("X{i}"))));
        queue.push(record("Node", "Renamed", "IDX1"));
        queue.push(record("Node", "N1", "IDX1"));

        let mut pool = start(3, &queue, &changes);
        wait_until_idle(&queue, &pool).await;

        assert_eq!(changes.adds.len(), 20);
        assert_eq!(changes.updates.len(), 1);
        assert_eq!(pool.active_workers(), 3);
        assert!(pool.shutdown(25, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_unknown_type_skips_record_only() {
        let queue = Arc::new(ImportQueue::new());
        let changes = Arc::new(ChangeQueues::default());
        queue.push(record("Starship", "S", "S1"));
        queue.push(record("Node", "N9", "IDX9"));

        let mut pool = start(1, &queue, &changes);
        wait_until_idle(&queue, &pool).await;

        assert_eq!(changes.adds.len(), 1);
        assert_eq!(pool.fault_count(), 0);
        assert_eq!(pool.active_workers(), 1);
        pool.shutdown(25, Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_fault_stops_only_that_worker() {
        let queue = Arc::new(ImportQueue::new());
        let changes = Arc::new(ChangeQueues::default());
        // Motivation is not a partition of the test model.
        queue.push(record("Goal", "G", "G1"));

        let mut pool = start(2, &queue, &changes);
        wait_until_idle(&queue, &pool).await;
        while pool.active_workers() > 1 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(pool.fault_count(), 1);
        assert_eq!(pool.active_workers(), 1);

        queue.push(record("Node", "N9", "IDX9"));
        wait_until_idle(&queue, &pool).await;
        assert_eq!(changes.adds.len(), 1, "surviving worker keeps draining");
        pool.shutdown(25, Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_cancellation_stops_idle_workers() {
        let queue = Arc::new(ImportQueue::new());
        let changes = Arc::new(ChangeQueues::default());
        let mut pool = start(3, &queue, &changes);

        assert!(pool.shutdown(50, Duration::from_millis(10)).await);
        assert!(pool.is_cancelled());
        assert_eq!(pool.active_workers(), 0);

        queue.push(record("Node", "late", "L1"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.len(), 1, "cancelled pool takes no more work");
    }
}
