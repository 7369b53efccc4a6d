//! Contract between the reconcilers and the remote database backend.
//!
//! Every mutating call returns only once the backend task behind it reached a
//! terminal status, so callers see plain success or failure.

use crate::models::{remote::RemoteDatabase, resource::RemoteIds};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport failure or an HTTP status the client did not expect.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend task {location} ended with status {status}")]
    TaskFailed { location: String, status: String },
    #[error("backend task {location} did not finish within {timeout_secs}s")]
    TaskTimeout { location: String, timeout_secs: u64 },
    #[error("unexpected backend response: {0}")]
    Parse(String),
    #[error("no {kind} named `{name}` on the backend")]
    Unresolved { kind: &'static str, name: String },
}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Create a database owned by `owner` and wait until it exists.
    async fn create_database(&self, name: &str, owner: &str, password: &str)
    -> BackendResult<RemoteIds>;

    /// Delete a database, stopping it first when it is running.
    ///
    /// Deleting a database the backend does not know is a success.
    async fn delete_database(&self, id: &str) -> BackendResult<()>;

    async fn rename_database(&self, id: &str, new_name: &str) -> BackendResult<()>;

    async fn find_by_name(&self, name: &str) -> BackendResult<Option<RemoteDatabase>>;

    async fn find_by_id(&self, id: &str) -> BackendResult<Option<RemoteDatabase>>;

    /// Stop a running database. No-op when absent or not running.
    async fn stop_database(&self, id: &str) -> BackendResult<()>;
}
