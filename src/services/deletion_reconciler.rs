//! src/services/deletion_reconciler.rs
//!
//! DeletionReconciler: drains the `deleting` bucket against the backend,
//! oldest record first. It owns the `deleting → removed | failed`
//! transitions.

use crate::models::resource::{Bucket, ResourceRecord};
use crate::services::backend::{BackendResult, DatabaseBackend};
use crate::services::resource_store::ResourceStore;
use crate::services::retry::{RetryDecision, RetryPolicy, Sleeper};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Consecutive failures tolerated for one record before it is retired.
pub const DELETE_MAX_FAILURES: u32 = 3;

/// Outcome of one cleanup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: u32,
    /// Records retired to `failed`.
    pub failed: u32,
    /// Failed attempts that were retried.
    pub retries: u32,
}

pub struct DeletionReconciler {
    store: ResourceStore,
    backend: Arc<dyn DatabaseBackend>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl DeletionReconciler {
    pub fn new(
        store: ResourceStore,
        backend: Arc<dyn DatabaseBackend>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            store,
            backend,
            retry: RetryPolicy::linear(DELETE_MAX_FAILURES),
            sleeper,
        }
    }

    /// Delete queued databases until the `deleting` bucket is empty.
    pub async fn cleanup_cycle(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut retry = self.retry.start();

        loop {
            let record = match self.store.first(Bucket::Deleting).await {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) => {
                    error!("failed to read deletion queue: {}", err);
                    break;
                }
            };

            debug!("deleting database: {}", record);
            match self.delete_remote(&record).await {
                Ok(()) => {
                    if let Err(err) = self.store.remove(&record).await {
                        // The backend side is gone; the next pass deletes idempotently.
                        error!("failed to drop deleted record {}: {}", record, err);
                        break;
                    }
                    info!(id = ?record.remote_id, "database deleted");
                    retry.reset();
                    report.removed += 1;
                }
                Err(err) => {
                    error!("failed to delete database, check the backend for details: {}", err);
                    match retry.record_failure() {
                        RetryDecision::Backoff(delay) => {
                            report.retries += 1;
                            warn!(
                                id = ?record.remote_id,
                                failures = retry.failures(),
                                "retrying deletion in {:?}", delay
                            );
                            self.sleeper.sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            error!(id = ?record.remote_id, "failed to delete database, giving up");
                            if let Err(err) = self.store.move_to(&record, Bucket::Failed).await {
                                error!("failed to retire {}: {}", record, err);
                                break;
                            }
                            report.failed += 1;
                            retry.reset();
                        }
                    }
                }
            }
        }

        report
    }

    async fn delete_remote(&self, record: &ResourceRecord) -> BackendResult<()> {
        match record.remote_id.as_deref() {
            Some(id) => self.backend.delete_database(id).await,
            None => {
                warn!("{} has no backend id, nothing to delete remotely", record);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::remote::DatabaseStatus;
    use crate::models::resource::NewResource;
    use crate::testing::{FakeBackend, RecordingSleeper, memory_store, new_resource, remote_db};
    use std::time::Duration;

    fn queued(name: &str, id: &str) -> NewResource {
        NewResource {
            remote_id: Some(id.into()),
            ..new_resource(name)
        }
    }

    async fn reconciler() -> (
        DeletionReconciler,
        ResourceStore,
        Arc<FakeBackend>,
        Arc<RecordingSleeper>,
    ) {
        let store = memory_store().await;
        let backend = FakeBackend::new();
        let sleeper = RecordingSleeper::new();
        let reconciler = DeletionReconciler::new(store.clone(), backend.clone(), sleeper.clone());
        (reconciler, store, backend, sleeper)
    }

    #[tokio::test]
    async fn drains_queue_in_fifo_order() {
        let (reconciler, store, backend, sleeper) = reconciler().await;
        for (name, id) in [("a", "1"), ("b", "2"), ("c", "3")] {
            backend.add(remote_db(id, name, DatabaseStatus::Running));
            store.insert(Bucket::Deleting, &queued(name, id)).await.unwrap();
        }

        let report = reconciler.cleanup_cycle().await;

        assert_eq!(report.removed, 3);
        assert_eq!(backend.state().delete_calls, ["1", "2", "3"]);
        assert!(backend.state().databases.is_empty());
        assert!(sleeper.slept().is_empty());
        assert_eq!(store.count(Bucket::Deleting).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let (reconciler, store, backend, sleeper) = reconciler().await;
        store.insert(Bucket::Deleting, &queued("a", "1")).await.unwrap();
        backend.state().fail_deletes = 2;

        let report = reconciler.cleanup_cycle().await;

        assert_eq!(
            report,
            CleanupReport {
                removed: 1,
                failed: 0,
                retries: 2
            }
        );
        assert_eq!(
            sleeper.slept(),
            [Duration::from_secs(30), Duration::from_secs(60)]
        );
        assert_eq!(store.count(Bucket::Deleting).await.unwrap(), 0);
        assert_eq!(store.count(Bucket::Failed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn gives_up_after_repeated_failures_and_moves_on() {
        let (reconciler, store, backend, sleeper) = reconciler().await;
        store.insert(Bucket::Deleting, &queued("stuck", "1")).await.unwrap();
        store.insert(Bucket::Deleting, &queued("next", "2")).await.unwrap();
        backend.state().fail_deletes = DELETE_MAX_FAILURES + 1;

        let report = reconciler.cleanup_cycle().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(sleeper.slept().len(), DELETE_MAX_FAILURES as usize);
        let failed = store.list(Bucket::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "stuck");
        assert_eq!(store.count(Bucket::Deleting).await.unwrap(), 0);
        // The next record started with a fresh counter and succeeded first time.
        assert_eq!(backend.state().delete_calls.last().map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn cleanup_resets_backoff_after_success() {
        let (reconciler, store, backend, sleeper) = reconciler().await;
        store.insert(Bucket::Deleting, &queued("a", "1")).await.unwrap();
        store.insert(Bucket::Deleting, &queued("b", "2")).await.unwrap();
        // a: fail, fail, succeed. b: fails until retired.
        backend.state().delete_script = [false, false, true, false, false, false, false].into();

        let report = reconciler.cleanup_cycle().await;

        assert_eq!(
            report,
            CleanupReport {
                removed: 1,
                failed: 1,
                retries: 5
            }
        );
        let secs: Vec<u64> = sleeper.slept().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, [30, 60, 30, 60, 90]);
        assert_eq!(store.list(Bucket::Failed).await.unwrap()[0].name, "b");
    }

    #[tokio::test]
    async fn absent_remote_database_counts_as_deleted() {
        let (reconciler, store, backend, _) = reconciler().await;
        store.insert(Bucket::Deleting, &queued("gone", "404")).await.unwrap();
        store.insert(Bucket::Deleting, &queued("gone-again", "404")).await.unwrap();

        let report = reconciler.cleanup_cycle().await;
        assert_eq!(report.removed, 2);
        assert_eq!(backend.state().delete_calls, ["404", "404"]);
    }

    #[tokio::test]
    async fn record_without_remote_id_is_dropped_locally() {
        let (reconciler, store, backend, _) = reconciler().await;
        store.insert(Bucket::Deleting, &new_resource("orphan")).await.unwrap();

        let report = reconciler.cleanup_cycle().await;
        assert_eq!(report.removed, 1);
        assert!(backend.state().delete_calls.is_empty());
    }

    #[tokio::test]
    async fn empty_queue_is_a_noop() {
        let (reconciler, _, backend, _) = reconciler().await;
        assert_eq!(reconciler.cleanup_cycle().await, CleanupReport::default());
        assert!(backend.state().delete_calls.is_empty());
    }
}
