//! Shared fixtures for unit tests: an in-memory store, a scripted backend and
//! a sleeper that only records what it was asked to wait.

use crate::models::remote::{DatabaseStatus, RemoteDatabase};
use crate::models::resource::{NewResource, RemoteIds};
use crate::services::backend::{BackendError, BackendResult, DatabaseBackend};
use crate::services::resource_store::ResourceStore;
use crate::services::retry::Sleeper;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub async fn memory_store() -> ResourceStore {
    // One connection: every `sqlite::memory:` connection is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = ResourceStore::new(Arc::new(pool));
    store.ensure_schema().await.unwrap();
    store
}

pub fn new_resource(name: &str) -> NewResource {
    NewResource {
        name: name.to_string(),
        username: "cfapp".into(),
        password: "secret".into(),
        remote_id: None,
        remote_uuid: None,
    }
}

pub fn remote_db(id: &str, name: &str, status: DatabaseStatus) -> RemoteDatabase {
    RemoteDatabase {
        id: id.to_string(),
        uuid: Some(format!("uuid-{id}")),
        name: name.to_string(),
        status,
    }
}

#[derive(Default, Debug)]
pub struct FakeState {
    pub databases: Vec<RemoteDatabase>,
    pub next_id: u64,
    /// Upcoming `create_database` calls that fail.
    pub fail_creates: u32,
    /// Upcoming `delete_database` calls that fail.
    pub fail_deletes: u32,
    /// Per-call create outcomes (`true` succeeds), consumed before `fail_creates`.
    pub create_script: VecDeque<bool>,
    /// Per-call delete outcomes (`true` succeeds), consumed before `fail_deletes`.
    pub delete_script: VecDeque<bool>,
    /// Every lookup fails while set.
    pub fail_lookups: bool,
    /// Rename calls fail while set.
    pub fail_renames: bool,
    pub create_calls: u32,
    pub delete_calls: Vec<String>,
    pub renames: Vec<(String, String)>,
}

/// In-process backend whose databases become RUNNING as soon as they are created.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add(&self, db: RemoteDatabase) {
        self.state().databases.push(db);
    }
}

#[async_trait]
impl DatabaseBackend for FakeBackend {
    async fn create_database(
        &self,
        name: &str,
        _owner: &str,
        _password: &str,
    ) -> BackendResult<RemoteIds> {
        let mut state = self.state();
        state.create_calls += 1;
        let fails = match state.create_script.pop_front() {
            Some(ok) => !ok,
            None if state.fail_creates > 0 => {
                state.fail_creates -= 1;
                true
            }
            None => false,
        };
        if fails {
            return Err(BackendError::TaskFailed {
                location: "/task/create".into(),
                status: "FAILED".into(),
            });
        }
        state.next_id += 1;
        let id = format!("db-{}", state.next_id);
        let db = remote_db(&id, name, DatabaseStatus::Running);
        let ids = RemoteIds {
            id: db.id.clone(),
            uuid: db.uuid.clone(),
        };
        state.databases.push(db);
        Ok(ids)
    }

    async fn delete_database(&self, id: &str) -> BackendResult<()> {
        let mut state = self.state();
        state.delete_calls.push(id.to_string());
        let fails = match state.delete_script.pop_front() {
            Some(ok) => !ok,
            None if state.fail_deletes > 0 => {
                state.fail_deletes -= 1;
                true
            }
            None => false,
        };
        if fails {
            return Err(BackendError::Unavailable("connection reset".into()));
        }
        state.databases.retain(|db| db.id != id);
        Ok(())
    }

    async fn rename_database(&self, id: &str, new_name: &str) -> BackendResult<()> {
        let mut state = self.state();
        if state.fail_renames {
            return Err(BackendError::Unavailable("rename refused".into()));
        }
        state.renames.push((id.to_string(), new_name.to_string()));
        if let Some(db) = state.databases.iter_mut().find(|db| db.id == id) {
            db.name = new_name.to_string();
        }
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> BackendResult<Option<RemoteDatabase>> {
        let state = self.state();
        if state.fail_lookups {
            return Err(BackendError::Unavailable("lookup failed".into()));
        }
        Ok(state.databases.iter().find(|db| db.name == name).cloned())
    }

    async fn find_by_id(&self, id: &str) -> BackendResult<Option<RemoteDatabase>> {
        let state = self.state();
        if state.fail_lookups {
            return Err(BackendError::Unavailable("lookup failed".into()));
        }
        Ok(state.databases.iter().find(|db| db.id == id).cloned())
    }

    async fn stop_database(&self, id: &str) -> BackendResult<()> {
        if let Some(db) = self.state().databases.iter_mut().find(|db| db.id == id) {
            db.status = DatabaseStatus::Stopped;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}
