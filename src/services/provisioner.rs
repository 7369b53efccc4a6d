//! src/services/provisioner.rs
//!
//! Provisioner: the synchronous façade callers use. It hands out pooled
//! databases, queues returned ones for deletion and keeps the in-memory
//! tables of provisioned services and their bindings.

use crate::models::resource::{Bucket, NewResource, ResourceRecord};
use crate::models::service::{
    Binding, Credentials, ProvisionRequest, ProvisionedService, ServiceConfiguration,
};
use crate::services::backend::DatabaseBackend;
use crate::services::resource_store::{BucketCount, ResourceStore, StoreError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no available database in pool")]
    PoolEmpty,
    #[error("service `{0}` not found")]
    UnknownService(String),
    #[error("binding `{0}` not found")]
    UnknownBinding(Uuid),
    #[error("pooled database `{0}` has no backend id")]
    MissingRemoteId(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Snapshot of the pool for operators.
#[derive(Debug, Serialize)]
pub struct PoolStatus {
    pub counts: Vec<BucketCount>,
    pub creating: Vec<ResourceRecord>,
    pub pooled: Vec<ResourceRecord>,
    pub deleting: Vec<ResourceRecord>,
    pub failed: Vec<ResourceRecord>,
    pub provisioned: usize,
    pub bindings: usize,
}

/// Settings the façade needs beyond the store.
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    pub nameserver: String,
    pub nameserver_port: u16,
    pub update_service_name: bool,
}

#[derive(Default)]
struct Tables {
    services: HashMap<String, ProvisionedService>,
    bindings: HashMap<Uuid, Binding>,
}

#[derive(Clone)]
pub struct Provisioner {
    store: ResourceStore,
    backend: Arc<dyn DatabaseBackend>,
    settings: ProvisionerSettings,
    tables: Arc<RwLock<Tables>>,
}

impl Provisioner {
    pub fn new(
        store: ResourceStore,
        backend: Arc<dyn DatabaseBackend>,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            store,
            backend,
            settings,
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Claim the oldest pooled database.
    ///
    /// Fails immediately with PoolEmpty when nothing is pooled; the caller
    /// decides whether to retry.
    pub async fn provision(&self, request: ProvisionRequest) -> BrokerResult<ProvisionedService> {
        debug!("attempting to provision instance (request={:?})", request);
        let record = self
            .store
            .take_first(Bucket::Pooled)
            .await?
            .ok_or(BrokerError::PoolEmpty)?;
        debug!("provision db from pool: {}", record);

        let service_id = record
            .remote_id
            .clone()
            .ok_or_else(|| BrokerError::MissingRemoteId(record.name.clone()))?;

        let requested = request.name.filter(|n| !n.is_empty());
        let name = match requested {
            Some(requested) if self.settings.update_service_name => {
                self.spawn_rename(service_id.clone(), requested.clone());
                requested
            }
            _ => record.name.clone(),
        };

        let service = ProvisionedService {
            service_id: service_id.clone(),
            configuration: ServiceConfiguration { name: name.clone() },
            credentials: Credentials {
                nameserver: self.settings.nameserver.clone(),
                nameserver_port: self.settings.nameserver_port,
                uuid: record.remote_uuid.clone(),
                name,
                username: record.username,
                password: record.password,
            },
        };

        self.tables
            .write()
            .await
            .services
            .insert(service_id.clone(), service.clone());
        info!(service_id = %service_id, "service provisioned");
        Ok(service)
    }

    /// Best-effort rename; provisioning never waits for it.
    fn spawn_rename(&self, service_id: String, name: String) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            match backend.rename_database(&service_id, &name).await {
                Ok(()) => debug!(service_id = %service_id, "renamed database to {}", name),
                Err(err) => warn!(service_id = %service_id, "failed to rename database: {}", err),
            }
        });
    }

    /// Queue a provisioned service for deletion.
    ///
    /// Unknown ids are logged and ignored. Returns whether a service was queued.
    pub async fn unprovision(&self, service_id: &str) -> BrokerResult<bool> {
        debug!("attempting to unprovision instance (instance id={})", service_id);
        let mut tables = self.tables.write().await;
        let Some(service) = tables.services.get(service_id).cloned() else {
            warn!("trying to delete a non-existent service: {}", service_id);
            return Ok(false);
        };

        let queued = NewResource {
            name: service.configuration.name.clone(),
            username: service.credentials.username.clone(),
            password: service.credentials.password.clone(),
            remote_id: Some(service.service_id.clone()),
            remote_uuid: service.credentials.uuid.clone(),
        };
        self.store.insert(Bucket::Deleting, &queued).await?;

        tables.services.remove(service_id);
        tables.bindings.retain(|_, b| b.service_id != service_id);
        info!(service_id = %service_id, "service queued for deletion");
        Ok(true)
    }

    /// Issue a copy of a service's credentials under a fresh id.
    pub async fn bind(&self, service_id: &str) -> BrokerResult<Binding> {
        debug!("attempting to bind service: {}", service_id);
        let mut tables = self.tables.write().await;
        let Some(service) = tables.services.get(service_id) else {
            warn!("invalid instance: {}", service_id);
            return Err(BrokerError::UnknownService(service_id.to_string()));
        };

        let binding = Binding {
            bind_id: Uuid::new_v4(),
            service_id: service.service_id.clone(),
            configuration: service.configuration.clone(),
            credentials: service.credentials.clone(),
        };
        tables.bindings.insert(binding.bind_id, binding.clone());
        Ok(binding)
    }

    /// Drop a binding of `service_id`.
    ///
    /// A binding issued for another service is reported as unknown and kept.
    pub async fn unbind(&self, service_id: &str, bind_id: Uuid) -> BrokerResult<()> {
        debug!("attempting to unbind: {} (instance id={})", bind_id, service_id);
        let mut tables = self.tables.write().await;
        let owned = tables
            .bindings
            .get(&bind_id)
            .is_some_and(|b| b.service_id == service_id);
        if !owned {
            warn!("invalid bind handle: {} for instance {}", bind_id, service_id);
            return Err(BrokerError::UnknownBinding(bind_id));
        }
        tables.bindings.remove(&bind_id);
        Ok(())
    }

    pub async fn service(&self, service_id: &str) -> Option<ProvisionedService> {
        self.tables.read().await.services.get(service_id).cloned()
    }

    pub async fn binding(&self, bind_id: Uuid) -> Option<Binding> {
        self.tables.read().await.bindings.get(&bind_id).cloned()
    }

    pub async fn pool_status(&self) -> BrokerResult<PoolStatus> {
        let (provisioned, bindings) = {
            let tables = self.tables.read().await;
            (tables.services.len(), tables.bindings.len())
        };
        Ok(PoolStatus {
            counts: self.store.counts().await?,
            creating: self.store.list(Bucket::Creating).await?,
            pooled: self.store.list(Bucket::Pooled).await?,
            deleting: self.store.list(Bucket::Deleting).await?,
            failed: self.store.list(Bucket::Failed).await?,
            provisioned,
            bindings,
        })
    }
}
