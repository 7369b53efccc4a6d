//! HTTP handlers for the provisioning façade.
//! Request parsing and status codes only; everything else is delegated to
//! `Provisioner`.

use crate::{
    errors::AppError,
    models::service::{Binding, ProvisionRequest, ProvisionedService},
    services::provisioner::{PoolStatus, Provisioner},
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

/// POST `/v1/instances`: claim a pooled database.
///
/// An empty body is treated as a request without a name.
pub async fn provision(
    State(provisioner): State<Provisioner>,
    body: Bytes,
) -> Result<(StatusCode, Json<ProvisionedService>), AppError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ProvisionRequest::default()
    } else {
        serde_json::from_slice::<ProvisionRequest>(&body).map_err(|e| {
            AppError::new(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
        })?
    };
    let service = provisioner.provision(request).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

/// DELETE `/v1/instances/{id}`: return a database for deletion.
///
/// Unknown ids are accepted as well; there is nothing left to delete.
pub async fn unprovision(
    State(provisioner): State<Provisioner>,
    Path(service_id): Path<String>,
) -> Result<StatusCode, AppError> {
    provisioner.unprovision(&service_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/v1/instances/{id}`
pub async fn get_instance(
    State(provisioner): State<Provisioner>,
    Path(service_id): Path<String>,
) -> Result<Json<ProvisionedService>, AppError> {
    provisioner
        .service(&service_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("service `{service_id}` not found")))
}

/// POST `/v1/instances/{id}/bindings`
pub async fn bind(
    State(provisioner): State<Provisioner>,
    Path(service_id): Path<String>,
) -> Result<(StatusCode, Json<Binding>), AppError> {
    let binding = provisioner.bind(&service_id).await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

/// DELETE `/v1/instances/{id}/bindings/{bind_id}`
pub async fn unbind(
    State(provisioner): State<Provisioner>,
    Path((service_id, bind_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let bind_id = Uuid::parse_str(&bind_id)
        .map_err(|_| AppError::not_found(format!("binding `{bind_id}` not found")))?;
    provisioner.unbind(&service_id, bind_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/v1/instances/{id}/bindings/{bind_id}`
pub async fn get_binding(
    State(provisioner): State<Provisioner>,
    Path((service_id, bind_id)): Path<(String, String)>,
) -> Result<Json<Binding>, AppError> {
    let not_found = || AppError::not_found(format!("binding `{bind_id}` not found"));
    let bind_id = Uuid::parse_str(&bind_id).map_err(|_| not_found())?;
    provisioner
        .binding(bind_id)
        .await
        .filter(|b| b.service_id == service_id)
        .map(Json)
        .ok_or_else(not_found)
}

/// GET `/v1/pool`: bucket counts and records.
pub async fn pool_status(
    State(provisioner): State<Provisioner>,
) -> Result<Json<PoolStatus>, AppError> {
    Ok(Json(provisioner.pool_status().await?))
}
