//! Defines routes for the provisioning façade.
//!
//! ## Structure
//! - **Instance endpoints**
//!   - `POST   /v1/instances`: provision from the pool
//!   - `GET    /v1/instances/{id}`: provisioned service
//!   - `DELETE /v1/instances/{id}`: unprovision (queue for deletion)
//!
//! - **Binding endpoints**
//!   - `POST   /v1/instances/{id}/bindings`: bind
//!   - `GET    /v1/instances/{id}/bindings/{bind_id}`: binding
//!   - `DELETE /v1/instances/{id}/bindings/{bind_id}`: unbind
//!
//! - **Operations**
//!   - `GET    /v1/pool`: bucket counts and records
//!   - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        instance_handlers::{
            bind, get_binding, get_instance, pool_status, provision, unbind, unprovision,
        },
    },
    services::provisioner::Provisioner,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the broker.
///
/// The router carries shared state (`Provisioner`) to all handlers.
pub fn routes() -> Router<Provisioner> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v1/pool", get(pool_status))
        .route("/v1/instances", post(provision))
        .route("/v1/instances/{id}", get(get_instance).delete(unprovision))
        .route("/v1/instances/{id}/bindings", post(bind))
        .route(
            "/v1/instances/{id}/bindings/{bind_id}",
            get(get_binding).delete(unbind),
        )
}
