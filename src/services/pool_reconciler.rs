//! src/services/pool_reconciler.rs
//!
//! PoolReconciler: keeps a reserve of ready databases. It owns the
//! `creating → pooled | failed` transitions. Records in `creating` are
//! checked against the backend by name, so a creation interrupted by a
//! restart is picked up again instead of being forgotten.

use crate::models::remote::DatabaseStatus;
use crate::models::resource::{Bucket, NewResource, RemoteIds, ResourceRecord};
use crate::services::backend::{BackendError, DatabaseBackend};
use crate::services::resource_store::{ResourceStore, StoreError, StoreResult};
use crate::services::retry::{RetryDecision, RetryPolicy, Sleeper};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Owner account every pooled database is created with.
pub const POOL_DB_OWNER: &str = "cfapp";

/// Consecutive creation failures tolerated within one fill pass.
pub const CREATE_MAX_FAILURES: u32 = 5;

const PASSWORD_LEN: usize = 17;

/// Decides whether the pool needs another database.
pub trait FillPolicy: Send + Sync {
    fn needs_fill(&self, pooled: i64) -> bool;
}

/// Fill until a fixed number of databases is pooled.
#[derive(Debug, Clone, Copy)]
pub struct ReservePolicy {
    pub min_pool_size: i64,
}

impl FillPolicy for ReservePolicy {
    fn needs_fill(&self, pooled: i64) -> bool {
        pooled < self.min_pool_size
    }
}

#[derive(Debug, Error)]
enum CreateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Outcome of checking the `creating` bucket against the backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Found RUNNING remotely and moved to `pooled`.
    pub promoted: usize,
    /// Unknown to the backend and dropped.
    pub removed: usize,
    /// Found in a failure state and moved to `failed`.
    pub failed: usize,
    /// Still provisioning, or could not be checked this time.
    pub pending: usize,
}

impl ReconcileReport {
    pub fn resolved(&self) -> usize {
        self.promoted + self.removed + self.failed
    }
}

enum Resolution {
    Promoted,
    Removed,
    Failed,
}

/// Outcome of one fill pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FillReport {
    pub created: u32,
    pub failed: u32,
    pub recovered: usize,
    /// The pass stopped because creation kept failing.
    pub aborted: bool,
}

pub struct PoolReconciler {
    store: ResourceStore,
    backend: Arc<dyn DatabaseBackend>,
    policy: Arc<dyn FillPolicy>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl PoolReconciler {
    pub fn new(
        store: ResourceStore,
        backend: Arc<dyn DatabaseBackend>,
        policy: Arc<dyn FillPolicy>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            store,
            backend,
            policy,
            retry: RetryPolicy::linear(CREATE_MAX_FAILURES),
            sleeper,
        }
    }

    /// Resolve every `creating` record against what the backend reports for its name.
    ///
    /// A record that cannot be checked is left for the next pass.
    pub async fn reconcile_creating(&self) -> StoreResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for record in self.store.list(Bucket::Creating).await? {
            debug!("found previous creation: {}", record);
            let remote = match self.backend.find_by_name(&record.name).await {
                Ok(remote) => remote,
                Err(err) => {
                    warn!(name = %record.name, "could not look up creating database: {}", err);
                    report.pending += 1;
                    continue;
                }
            };

            let outcome = match remote {
                None => {
                    debug!(name = %record.name, "creation never reached the backend, dropping record");
                    self.store.remove(&record).await.map(|_| Resolution::Removed)
                }
                Some(db) => match db.status {
                    DatabaseStatus::Running => {
                        let ids = RemoteIds {
                            id: db.id,
                            uuid: db.uuid,
                        };
                        info!(name = %record.name, id = %ids.id, "recovered created database");
                        self.store
                            .promote(&record, &ids)
                            .await
                            .map(|_| Resolution::Promoted)
                    }
                    DatabaseStatus::Provisioning => {
                        debug!(name = %record.name, "database creation still in progress");
                        report.pending += 1;
                        continue;
                    }
                    status => {
                        warn!(name = %record.name, %status, "database creation failed");
                        self.store
                            .move_to(&record, Bucket::Failed)
                            .await
                            .map(|_| Resolution::Failed)
                    }
                },
            };

            match outcome {
                Ok(Resolution::Promoted) => report.promoted += 1,
                Ok(Resolution::Removed) => report.removed += 1,
                Ok(Resolution::Failed) => report.failed += 1,
                Err(err) => {
                    error!(name = %record.name, "failed to record creation outcome: {}", err);
                    report.pending += 1;
                }
            }
        }

        Ok(report)
    }

    /// One fill pass: recover in-flight creations first, then create until
    /// the policy is satisfied or creation keeps failing.
    pub async fn fill_cycle(&self) -> FillReport {
        let mut report = FillReport::default();
        let mut retry = self.retry.start();

        loop {
            match self.needs_fill().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    error!("failed to read pool state: {}", err);
                    break;
                }
            }

            match self.reconcile_creating().await {
                Ok(reconciled) if reconciled.resolved() > 0 => {
                    report.recovered += reconciled.resolved();
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    error!("failed to list creating databases: {}", err);
                    break;
                }
            }

            match self.create_one().await {
                Ok(record) => {
                    info!("created new pooled database: {}", record);
                    report.created += 1;
                    retry.reset();
                }
                Err(err) => {
                    error!("database creation failed, check the backend for details: {}", err);
                    report.failed += 1;
                    match retry.record_failure() {
                        RetryDecision::Backoff(delay) => {
                            warn!(
                                failures = retry.failures(),
                                "retrying database creation in {:?}", delay
                            );
                            self.sleeper.sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            error!(
                                failures = retry.failures(),
                                "giving up on filling the pool until the next cycle"
                            );
                            report.aborted = true;
                            break;
                        }
                    }
                }
            }
        }

        report
    }

    async fn needs_fill(&self) -> StoreResult<bool> {
        let counts = self.store.counts().await?;
        let mut pooled = 0;
        for c in &counts {
            debug!("number of {} databases: {}", c.bucket, c.count);
            if c.bucket == Bucket::Pooled {
                pooled = c.count;
            }
        }
        Ok(self.policy.needs_fill(pooled))
    }

    /// Checkpoint a `creating` record, create the database, then pool it.
    ///
    /// On backend failure the record already held is moved to `failed`.
    async fn create_one(&self) -> Result<ResourceRecord, CreateError> {
        let new = generate_resource();
        let record = self.store.insert(Bucket::Creating, &new).await?;

        match self
            .backend
            .create_database(&new.name, &new.username, &new.password)
            .await
        {
            Ok(ids) => Ok(self.store.promote(&record, &ids).await?),
            Err(err) => {
                if let Err(store_err) = self.store.move_to(&record, Bucket::Failed).await {
                    error!(name = %record.name, "failed to retire creation: {}", store_err);
                }
                Err(err.into())
            }
        }
    }
}

fn generate_resource() -> NewResource {
    let mut password = Uuid::new_v4().simple().to_string();
    password.truncate(PASSWORD_LEN);
    NewResource {
        name: Uuid::new_v4().to_string(),
        username: POOL_DB_OWNER.to_string(),
        password,
        remote_id: None,
        remote_uuid: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, RecordingSleeper, memory_store, new_resource, remote_db};
    use std::time::Duration;

    async fn reconciler(
        min_pool_size: i64,
    ) -> (PoolReconciler, ResourceStore, Arc<FakeBackend>, Arc<RecordingSleeper>) {
        let store = memory_store().await;
        let backend = FakeBackend::new();
        let sleeper = RecordingSleeper::new();
        let reconciler = PoolReconciler::new(
            store.clone(),
            backend.clone(),
            Arc::new(ReservePolicy { min_pool_size }),
            sleeper.clone(),
        );
        (reconciler, store, backend, sleeper)
    }

    async fn seed_pooled(store: &ResourceStore, name: &str) {
        let rec = store.insert(Bucket::Creating, &new_resource(name)).await.unwrap();
        store
            .promote(
                &rec,
                &RemoteIds {
                    id: format!("seed-{name}"),
                    uuid: None,
                },
            )
            .await
            .unwrap();
    }

    #[test]
    fn generated_credentials() {
        let r = generate_resource();
        assert_eq!(r.username, POOL_DB_OWNER);
        assert_eq!(r.password.len(), PASSWORD_LEN);
        assert!(r.password.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(Uuid::parse_str(&r.name).is_ok());
        assert!(r.remote_id.is_none() && r.remote_uuid.is_none());
    }

    #[tokio::test]
    async fn fills_missing_capacity_exactly() {
        let (reconciler, store, backend, _) = reconciler(3).await;
        seed_pooled(&store, "a").await;
        seed_pooled(&store, "b").await;

        let report = reconciler.fill_cycle().await;

        assert_eq!(report.created, 1);
        assert_eq!(backend.state().create_calls, 1);
        assert_eq!(store.count(Bucket::Pooled).await.unwrap(), 3);
        assert_eq!(store.count(Bucket::Creating).await.unwrap(), 0);
        let created = store.list(Bucket::Pooled).await.unwrap().pop().unwrap();
        assert_eq!(created.remote_id.as_deref(), Some("db-1"));
        assert_eq!(created.remote_uuid.as_deref(), Some("uuid-db-1"));
    }

    #[tokio::test]
    async fn full_pool_is_a_noop() {
        let (reconciler, store, backend, _) = reconciler(2).await;
        for name in ["a", "b", "c"] {
            seed_pooled(&store, name).await;
        }

        assert_eq!(reconciler.fill_cycle().await, FillReport::default());
        assert_eq!(backend.state().create_calls, 0);
        assert_eq!(store.count(Bucket::Pooled).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn reconcile_resolves_every_remote_state() {
        let (reconciler, store, backend, _) = reconciler(3).await;
        for name in ["running", "provisioning", "broken", "missing"] {
            store.insert(Bucket::Creating, &new_resource(name)).await.unwrap();
        }
        backend.add(remote_db("1", "running", DatabaseStatus::Running));
        backend.add(remote_db("2", "provisioning", DatabaseStatus::Provisioning));
        backend.add(remote_db("3", "broken", DatabaseStatus::Other("ERROR".into())));

        let report = reconciler.reconcile_creating().await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                promoted: 1,
                removed: 1,
                failed: 1,
                pending: 1
            }
        );
        let pooled = store.list(Bucket::Pooled).await.unwrap();
        assert_eq!(pooled.len(), 1);
        assert_eq!(pooled[0].remote_id.as_deref(), Some("1"));
        assert_eq!(pooled[0].remote_uuid.as_deref(), Some("uuid-1"));
        let creating = store.list(Bucket::Creating).await.unwrap();
        assert_eq!(creating.len(), 1);
        assert_eq!(creating[0].name, "provisioning");
        assert_eq!(store.list(Bucket::Failed).await.unwrap()[0].name, "broken");
    }

    #[tokio::test]
    async fn lookup_errors_leave_records_for_later() {
        let (reconciler, store, backend, _) = reconciler(3).await;
        store.insert(Bucket::Creating, &new_resource("x")).await.unwrap();
        backend.state().fail_lookups = true;

        let report = reconciler.reconcile_creating().await.unwrap();
        assert_eq!(report.pending, 1);
        assert_eq!(report.resolved(), 0);
        assert_eq!(store.count(Bucket::Creating).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn restart_recovery_runs_before_creation() {
        let (reconciler, store, backend, _) = reconciler(1).await;
        // Left behind by a crash after the backend created the database.
        store.insert(Bucket::Creating, &new_resource("orphan")).await.unwrap();
        backend.add(remote_db("42", "orphan", DatabaseStatus::Running));

        let report = reconciler.fill_cycle().await;

        assert_eq!(report.recovered, 1);
        assert_eq!(report.created, 0);
        assert_eq!(backend.state().create_calls, 0);
        let pooled = store.list(Bucket::Pooled).await.unwrap();
        assert_eq!(pooled[0].name, "orphan");
        assert_eq!(pooled[0].remote_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn failed_creation_is_retired_and_retried_with_backoff() {
        let (reconciler, store, backend, sleeper) = reconciler(1).await;
        backend.state().fail_creates = 2;

        let report = reconciler.fill_cycle().await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.created, 1);
        assert!(!report.aborted);
        assert_eq!(
            sleeper.slept(),
            [Duration::from_secs(30), Duration::from_secs(60)]
        );
        assert_eq!(store.count(Bucket::Failed).await.unwrap(), 2);
        assert_eq!(store.count(Bucket::Pooled).await.unwrap(), 1);
        assert_eq!(store.count(Bucket::Creating).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fill_resets_backoff_after_success() {
        let (reconciler, store, backend, sleeper) = reconciler(3).await;
        backend.state().create_script = [false, true, false, true, false, true].into();

        let report = reconciler.fill_cycle().await;

        assert_eq!(report.created, 3);
        assert_eq!(report.failed, 3);
        assert!(!report.aborted);
        assert_eq!(sleeper.slept(), [Duration::from_secs(30); 3]);
        assert_eq!(store.count(Bucket::Pooled).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn persistent_failures_abort_the_pass() {
        let (reconciler, store, backend, sleeper) = reconciler(3).await;
        backend.state().fail_creates = u32::MAX;

        let report = reconciler.fill_cycle().await;

        assert!(report.aborted);
        assert_eq!(report.failed, CREATE_MAX_FAILURES + 1);
        assert_eq!(backend.state().create_calls, CREATE_MAX_FAILURES + 1);
        assert_eq!(sleeper.slept().len(), CREATE_MAX_FAILURES as usize);
        assert_eq!(sleeper.slept().last(), Some(&Duration::from_secs(150)));
        assert_eq!(store.count(Bucket::Pooled).await.unwrap(), 0);
        assert_eq!(
            store.count(Bucket::Failed).await.unwrap(),
            i64::from(CREATE_MAX_FAILURES + 1)
        );

        // The next pass starts with a fresh budget.
        backend.state().fail_creates = 0;
        let report = reconciler.fill_cycle().await;
        assert_eq!(report.created, 3);
        assert!(!report.aborted);
    }

    #[tokio::test]
    async fn custom_policy_drives_the_fill() {
        struct Never;
        impl FillPolicy for Never {
            fn needs_fill(&self, _pooled: i64) -> bool {
                false
            }
        }

        let store = memory_store().await;
        let backend = FakeBackend::new();
        let reconciler = PoolReconciler::new(
            store.clone(),
            backend.clone(),
            Arc::new(Never),
            RecordingSleeper::new(),
        );

        reconciler.fill_cycle().await;
        assert_eq!(backend.state().create_calls, 0);
    }
}
