//! src/services/director_client.rs
//!
//! DataDirectorClient: the Data Director REST API behind [`DatabaseBackend`].
//!
//! Mutating calls are answered with `202 Accepted` and a `Location` naming a
//! task. The client polls that task every [`TASK_POLL_INTERVAL`] until it
//! reaches a terminal status or the configured budget runs out.
//!
//! TLS certificates are not verified: the backend is reached over an
//! operator-controlled network and commonly uses self-signed certificates.

use crate::config::DirectorConfig;
use crate::models::remote::{DatabaseStatus, Link, NamedEntity, RemoteDatabase, Task, TaskStatus};
use crate::models::resource::RemoteIds;
use crate::services::backend::{BackendError, BackendResult, DatabaseBackend};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error, warn};

pub const TASK_POLL_INTERVAL: Duration = Duration::from_secs(5);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Identifiers every new database is placed with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub dbgroup_id: String,
    pub template_id: String,
    pub backup_template_id: String,
}

/// What a single API call answered.
#[derive(Debug)]
enum ApiResponse {
    /// Asynchronous operation; poll the task at this location.
    Accepted(String),
    Body(Value),
    Empty,
    NotFound,
}

#[derive(Clone, Debug)]
pub struct DataDirectorClient {
    http: reqwest::Client,
    base: Url,
    api_path: String,
    placement: Placement,
    poll_interval: Duration,
    task_timeout: Duration,
}

impl DataDirectorClient {
    /// Build a client for `base` (scheme, host and port) and resolve the
    /// configured placement names to identifiers.
    ///
    /// Identifiers given in the configuration are used as-is; a name that
    /// cannot be found is an error.
    pub async fn connect(base: Url, config: &DirectorConfig) -> BackendResult<Self> {
        let http = build_http_client(&config.username, &config.password)?;
        let mut client = Self {
            http,
            base,
            api_path: config.api_path.trim_end_matches('/').to_string(),
            placement: Placement {
                dbgroup_id: String::new(),
                template_id: String::new(),
                backup_template_id: String::new(),
            },
            poll_interval: TASK_POLL_INTERVAL,
            task_timeout: config.task_timeout,
        };
        client.placement = client.resolve_placement(config).await?;
        debug!(placement = ?client.placement, "resolved database placement");
        Ok(client)
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    async fn resolve_placement(&self, config: &DirectorConfig) -> BackendResult<Placement> {
        if let (Some(dbgroup_id), Some(template_id), Some(backup_template_id)) = (
            config.dbgroup_id.clone(),
            config.template_id.clone(),
            config.backup_template_id.clone(),
        ) {
            return Ok(Placement {
                dbgroup_id,
                template_id,
                backup_template_id,
            });
        }

        let org_id = self
            .resolve_by_name("org", &self.api("orgs"), &config.org)
            .await?;

        let dbgroup_id = match &config.dbgroup_id {
            Some(id) => id.clone(),
            None => {
                self.resolve_by_name(
                    "database group",
                    &self.api(&format!("org/{org_id}/dbgroups")),
                    &config.dbgroup,
                )
                .await?
            }
        };
        let template_id = match &config.template_id {
            Some(id) => id.clone(),
            None => {
                self.resolve_by_name(
                    "database template",
                    &self.api(&format!("org/{org_id}/databasetemplates")),
                    &config.template,
                )
                .await?
            }
        };
        let backup_template_id = match &config.backup_template_id {
            Some(id) => id.clone(),
            None => {
                self.resolve_by_name(
                    "backup template",
                    &self.api(&format!("org/{org_id}/backuptemplates")),
                    &config.backup_template,
                )
                .await?
            }
        };

        Ok(Placement {
            dbgroup_id,
            template_id,
            backup_template_id,
        })
    }

    /// Walk a collection and return the id of the member called `name`.
    async fn resolve_by_name(
        &self,
        kind: &'static str,
        collection: &str,
        name: &str,
    ) -> BackendResult<String> {
        let links: Vec<Link> = self.get_json(collection).await?.unwrap_or_default();
        for link in links {
            let entity: Option<NamedEntity> = self.get_json(&href_path(&link.href)).await?;
            if let Some(entity) = entity.filter(|e| e.name == name) {
                return Ok(entity.id);
            }
        }
        error!("can not find {} with name: {}", kind, name);
        Err(BackendError::Unresolved {
            kind,
            name: name.to_string(),
        })
    }

    fn api(&self, suffix: &str) -> String {
        format!("{}/{}", self.api_path, suffix)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> BackendResult<ApiResponse> {
        let url = self
            .base
            .join(path)
            .map_err(|e| BackendError::Parse(format!("invalid path {path}: {e}")))?;
        debug!("{} {}", method, url);

        let mut builder = self.http.request(method.clone(), url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("{method} {path}: {e}")))?;

        let status = response.status();
        debug!("{} {} -> {}", method, path, status);

        if status == StatusCode::ACCEPTED {
            return response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|location| ApiResponse::Accepted(location.to_string()))
                .ok_or_else(|| {
                    BackendError::Parse(format!("{method} {path}: accepted without a task location"))
                });
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(ApiResponse::NotFound);
        }

        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Unavailable(format!("{method} {path}: {e}")))?;
        if !status.is_success() {
            return Err(BackendError::Unavailable(format!(
                "{method} {path}: HTTP {status}: {text}"
            )));
        }
        if text.trim().is_empty() {
            return Ok(ApiResponse::Empty);
        }
        serde_json::from_str(&text).map(ApiResponse::Body).map_err(|e| {
            error!("failed to parse response from {}: {}", path, text);
            BackendError::Parse(format!("{method} {path}: {e}"))
        })
    }

    /// GET a JSON document. `None` when the backend answers 404.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BackendResult<Option<T>> {
        match self.request(Method::GET, path, None).await? {
            ApiResponse::NotFound => Ok(None),
            ApiResponse::Body(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| BackendError::Parse(format!("GET {path}: {e}"))),
            other => Err(BackendError::Parse(format!(
                "GET {path}: expected a JSON body, got {other:?}"
            ))),
        }
    }

    /// Issue a mutating call and wait for the task it started.
    async fn run_task(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> BackendResult<Task> {
        match self.request(method.clone(), path, body).await? {
            ApiResponse::Accepted(location) => self.wait_task(&location).await,
            ApiResponse::Body(value) => Ok(Task {
                status: TaskStatus::Success,
                location: value
                    .get("location")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            ApiResponse::Empty => Ok(Task {
                status: TaskStatus::Success,
                location: None,
            }),
            ApiResponse::NotFound => Err(BackendError::Unavailable(format!(
                "{method} {path}: not found"
            ))),
        }
    }

    /// Poll a task until it is terminal or the timeout budget is spent.
    async fn wait_task(&self, location: &str) -> BackendResult<Task> {
        let path = href_path(location);
        let mut budget = self.task_timeout;
        let mut last: Option<Task> = None;

        while !budget.is_zero() {
            let task: Task = self.get_json(&path).await?.ok_or_else(|| {
                BackendError::Parse(format!("task {location} disappeared while polling"))
            })?;
            if task.status.is_terminal() {
                last = Some(task);
                break;
            }
            if task.status == TaskStatus::ErrorWait {
                warn!("task {} is waiting on an error, cancelling it", location);
                self.cancel_task(&path);
            }
            last = Some(task);

            tokio::time::sleep(self.poll_interval).await;
            budget = budget.saturating_sub(self.poll_interval);
        }

        match last {
            Some(task) if task.status == TaskStatus::Success => Ok(task),
            Some(task) if task.status.is_terminal() => {
                error!("task failed: {} ({})", location, task.status);
                Err(BackendError::TaskFailed {
                    location: location.to_string(),
                    status: task.status.to_string(),
                })
            }
            _ => {
                error!("task timeout: {}", location);
                Err(BackendError::TaskTimeout {
                    location: location.to_string(),
                    timeout_secs: self.task_timeout.as_secs(),
                })
            }
        }
    }

    /// Ask the backend to cancel a task without waiting for the answer.
    fn cancel_task(&self, task_path: &str) {
        let client = self.clone();
        let path = format!("{task_path}?action=cancel");
        tokio::spawn(async move {
            if let Err(err) = client.request(Method::POST, &path, None).await {
                warn!("cancel request {} failed: {}", path, err);
            }
        });
    }

    /// Start a stopped database. No-op when absent or not stopped.
    ///
    /// Not part of [`DatabaseBackend`]: nothing in the pool lifecycle starts databases.
    #[allow(dead_code)]
    pub async fn start_database(&self, id: &str) -> BackendResult<()> {
        let Some(db) = self.find_by_id(id).await? else {
            return Ok(());
        };
        if db.status != DatabaseStatus::Stopped {
            return Ok(());
        }
        debug!("start_database {}", id);
        let path = self.api(&format!("database/{id}?action=start"));
        self.run_task(Method::POST, &path, None).await.map(|_| ())
    }
}

#[async_trait]
impl DatabaseBackend for DataDirectorClient {
    async fn create_database(
        &self,
        name: &str,
        owner: &str,
        password: &str,
    ) -> BackendResult<RemoteIds> {
        debug!("create_database {}, {}", name, owner);
        let spec = json!({
            "name": name,
            "description": "database created for the database pool broker",
            "dbgroupId": self.placement.dbgroup_id,
            "ownerName": owner,
            "ownerPassword": password,
            "dbConfigTemplateId": self.placement.template_id,
            "backupConfigTemplateId": self.placement.backup_template_id,
        });

        let task = self
            .run_task(Method::POST, &self.api("databases"), Some(&spec))
            .await?;
        let location = task.location.ok_or_else(|| {
            BackendError::Parse(format!("creation of {name} reported no database location"))
        })?;
        let db: RemoteDatabase = self
            .get_json(&href_path(&location))
            .await?
            .ok_or_else(|| BackendError::Parse(format!("created database {location} not found")))?;

        Ok(RemoteIds {
            id: db.id,
            uuid: db.uuid,
        })
    }

    async fn delete_database(&self, id: &str) -> BackendResult<()> {
        debug!("delete_database {}", id);
        if self.find_by_id(id).await?.is_none() {
            debug!("database {} already absent", id);
            return Ok(());
        }
        self.stop_database(id).await?;

        let path = self.api(&format!("database/{id}"));
        self.run_task(Method::DELETE, &path, None).await.map(|_| ())
    }

    async fn rename_database(&self, id: &str, new_name: &str) -> BackendResult<()> {
        debug!("rename_database {} -> {}", id, new_name);
        let spec = json!({
            "name": new_name,
            "description": "database in use through the database pool broker",
            "dbConfigTemplateId": self.placement.template_id,
            "backupConfigTemplateId": self.placement.backup_template_id,
            "restartIfNeeded": true,
        });
        let path = self.api(&format!("database/{id}"));
        self.run_task(Method::PUT, &path, Some(&spec))
            .await
            .map(|_| ())
    }

    async fn find_by_name(&self, name: &str) -> BackendResult<Option<RemoteDatabase>> {
        let links: Vec<Link> = self
            .get_json(&self.api("databases"))
            .await?
            .unwrap_or_default();
        for link in links {
            let db: Option<RemoteDatabase> = self.get_json(&href_path(&link.href)).await?;
            if let Some(db) = db.filter(|db| db.name == name) {
                return Ok(Some(db));
            }
        }
        Ok(None)
    }

    async fn find_by_id(&self, id: &str) -> BackendResult<Option<RemoteDatabase>> {
        self.get_json(&self.api(&format!("database/{id}"))).await
    }

    async fn stop_database(&self, id: &str) -> BackendResult<()> {
        match self.find_by_id(id).await? {
            Some(db) if db.status == DatabaseStatus::Running => {
                debug!("stop_database {}", id);
                let path = self.api(&format!("database/{id}?action=stop"));
                self.run_task(Method::POST, &path, None).await.map(|_| ())
            }
            _ => Ok(()),
        }
    }
}

fn build_http_client(username: &str, password: &str) -> BackendResult<reqwest::Client> {
    let credentials = general_purpose::STANDARD.encode(format!("{username}:{password}"));
    let mut auth = HeaderValue::from_str(&format!("Basic {credentials}"))
        .map_err(|e| BackendError::Parse(format!("invalid credentials header: {e}")))?;
    auth.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, auth);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .default_headers(headers)
        .danger_accept_invalid_certs(true)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| BackendError::Unavailable(format!("building HTTP client: {e}")))
}

/// Reduce an href to the path (and query) part.
///
/// The backend advertises hrefs with its own host name, which is not always
/// reachable; requests always go to the configured base instead.
fn href_path(href: &str) -> String {
    match Url::parse(href) {
        Ok(url) => match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        },
        Err(_) => href.to_string(),
    }
}
