//! src/services/resource_store.rs
//!
//! ResourceStore: the persistent lifecycle table behind the pool. Every
//! record lives in exactly one bucket, and every mutation is a single SQL
//! statement so the fill loop, the cleanup loop and the façade can share the
//! pool without extra locking.

use crate::models::resource::{Bucket, NewResource, RemoteIds, ResourceRecord};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const COLUMNS: &str =
    "seq, name, username, password, remote_id, remote_uuid, bucket, created_at, updated_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record #{seq} is no longer in bucket `{expected}`")]
    NotInBucket { seq: i64, expected: Bucket },
    #[error("records cannot move from `{from}` to `{to}`")]
    IllegalMove { from: Bucket, to: Bucket },
    #[error("a record named `{name}` already exists in bucket `{bucket}`")]
    Duplicate { name: String, bucket: Bucket },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Count of records in one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BucketCount {
    pub bucket: Bucket,
    pub count: i64,
}

#[derive(Clone)]
pub struct ResourceStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl ResourceStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create the table and indexes if they are missing.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in statements {
            debug!("Executing schema SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Insert a record into `bucket`.
    ///
    /// Returns Duplicate when a live (`creating`/`pooled`) record already uses the name.
    pub async fn insert(&self, bucket: Bucket, new: &NewResource) -> StoreResult<ResourceRecord> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO resources (name, username, password, remote_id, remote_uuid, bucket, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ResourceRecord>(&sql)
            .bind(&new.name)
            .bind(&new.username)
            .bind(&new.password)
            .bind(&new.remote_id)
            .bind(&new.remote_uuid)
            .bind(bucket)
            .bind(now)
            .bind(now)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Duplicate {
                        name: new.name.clone(),
                        bucket,
                    }
                } else {
                    StoreError::Sqlx(err)
                }
            })
    }

    /// All records of a bucket, oldest first.
    pub async fn list(&self, bucket: Bucket) -> StoreResult<Vec<ResourceRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM resources WHERE bucket = ? ORDER BY seq ASC");
        Ok(sqlx::query_as::<_, ResourceRecord>(&sql)
            .bind(bucket)
            .fetch_all(&*self.db)
            .await?)
    }

    /// The oldest record of a bucket.
    pub async fn first(&self, bucket: Bucket) -> StoreResult<Option<ResourceRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM resources WHERE bucket = ? ORDER BY seq ASC LIMIT 1"
        );
        Ok(sqlx::query_as::<_, ResourceRecord>(&sql)
            .bind(bucket)
            .fetch_optional(&*self.db)
            .await?)
    }

    pub async fn count(&self, bucket: Bucket) -> StoreResult<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM resources WHERE bucket = ?")
                .bind(bucket)
                .fetch_one(&*self.db)
                .await?,
        )
    }

    /// Record counts for every bucket, in lifecycle order.
    pub async fn counts(&self) -> StoreResult<Vec<BucketCount>> {
        let mut counts = Vec::with_capacity(Bucket::ALL.len());
        for bucket in Bucket::ALL {
            counts.push(BucketCount {
                bucket,
                count: self.count(bucket).await?,
            });
        }
        Ok(counts)
    }

    /// Move a record to another bucket.
    ///
    /// The update only applies while the record is still in the bucket the
    /// caller saw it in, so a concurrent move or removal surfaces as NotInBucket.
    pub async fn move_to(&self, record: &ResourceRecord, to: Bucket) -> StoreResult<ResourceRecord> {
        self.transition(record, to, None).await
    }

    /// Move a `creating` record to `pooled`, recording the backend identifiers.
    ///
    /// Identifiers already present on the record are kept; they are never overwritten.
    pub async fn promote(
        &self,
        record: &ResourceRecord,
        remote: &RemoteIds,
    ) -> StoreResult<ResourceRecord> {
        self.transition(record, Bucket::Pooled, Some(remote)).await
    }

    async fn transition(
        &self,
        record: &ResourceRecord,
        to: Bucket,
        remote: Option<&RemoteIds>,
    ) -> StoreResult<ResourceRecord> {
        if !record.bucket.can_move_to(to) {
            return Err(StoreError::IllegalMove {
                from: record.bucket,
                to,
            });
        }

        let sql = format!(
            "UPDATE resources
             SET bucket = ?,
                 remote_id = COALESCE(remote_id, ?),
                 remote_uuid = COALESCE(remote_uuid, ?),
                 updated_at = ?
             WHERE seq = ? AND bucket = ?
             RETURNING {COLUMNS}"
        );
        let moved = sqlx::query_as::<_, ResourceRecord>(&sql)
            .bind(to)
            .bind(remote.map(|r| r.id.clone()))
            .bind(remote.and_then(|r| r.uuid.clone()))
            .bind(Utc::now())
            .bind(record.seq)
            .bind(record.bucket)
            .fetch_optional(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Duplicate {
                        name: record.name.clone(),
                        bucket: to,
                    }
                } else {
                    StoreError::Sqlx(err)
                }
            })?;

        moved.ok_or(StoreError::NotInBucket {
            seq: record.seq,
            expected: record.bucket,
        })
    }

    /// Delete a record that is still in the bucket the caller saw it in.
    pub async fn remove(&self, record: &ResourceRecord) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM resources WHERE seq = ? AND bucket = ?")
            .bind(record.seq)
            .bind(record.bucket)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotInBucket {
                seq: record.seq,
                expected: record.bucket,
            });
        }
        Ok(())
    }

    /// Atomically remove and return the oldest record of a bucket.
    pub async fn take_first(&self, bucket: Bucket) -> StoreResult<Option<ResourceRecord>> {
        let sql = format!(
            "DELETE FROM resources
             WHERE seq = (SELECT seq FROM resources WHERE bucket = ? ORDER BY seq ASC LIMIT 1)
             RETURNING {COLUMNS}"
        );
        Ok(sqlx::query_as::<_, ResourceRecord>(&sql)
            .bind(bucket)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Cheap connectivity probe used by readiness checks.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
