//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kube::api::Api;
use tracing::{error, instrument};

use crate::controller::ControllerState;
use crate::crd::FailoverService;

use super::dto::{ErrorResponse, FailoverServiceListResponse, FailoverServiceSummary, HealthResponse};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List all FailoverServices
#[instrument(skip(state))]
pub async fn list_failover_services(
    State(state): State<Arc<ControllerState>>,
) -> Result<Json<FailoverServiceListResponse>, ApiError> {
    let api: Api<FailoverService> = Api::all(state.client.clone());

    match api.list(&Default::default()).await {
        Ok(list) => {
            let items: Vec<FailoverServiceSummary> =
                list.items.iter().map(FailoverServiceSummary::from).collect();
            let total = items.len();
            Ok(Json(FailoverServiceListResponse { items, total }))
        }
        Err(e) => {
            error!("Failed to list FailoverServices: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            ))
        }
    }
}

/// Get a specific FailoverService
#[instrument(skip(state), fields(name = %name, namespace = %namespace))]
pub async fn get_failover_service(
    State(state): State<Arc<ControllerState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<FailoverServiceSummary>, ApiError> {
    let api: Api<FailoverService> = Api::namespaced(state.client.clone(), &namespace);

    match api.get(&name).await {
        Ok(fs) => Ok(Json(FailoverServiceSummary::from(&fs))),
        Err(kube::Error::Api(e)) if e.code == 404 => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("FailoverService {}/{} not found", namespace, name),
            )),
        )),
        Err(e) => {
            error!("Failed to get FailoverService {}/{}: {:?}", namespace, name, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("get_failed", &e.to_string())),
            ))
        }
    }
}
