//! Services handed out to callers and the bindings derived from them.
//!
//! These live only in memory. A broker restart forgets them, while the
//! backend databases they describe keep running.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-visible configuration of a provisioned service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfiguration {
    pub name: String,
}

/// Connection details for a provisioned database.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub nameserver: String,
    pub nameserver_port: u16,
    /// Backend UUID of the database.
    pub uuid: Option<String>,
    pub name: String,
    pub username: String,
    pub password: String,
}

/// A pooled database claimed by a caller.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedService {
    /// Equal to the backend identifier of the database.
    pub service_id: String,
    pub configuration: ServiceConfiguration,
    pub credentials: Credentials,
}

/// A copy of a service's credentials issued under its own identifier.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub bind_id: Uuid,
    pub service_id: String,
    pub configuration: ServiceConfiguration,
    pub credentials: Credentials,
}

/// Body of a provision request.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ProvisionRequest {
    /// Name the caller wants the database to carry, used when renaming is enabled.
    #[serde(default)]
    pub name: Option<String>,
}
