//! Model-management routes: pull, list, get, delete, import, alias.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use kiln_fetch::ResumePolicy;
use kiln_types::ModelHandle;

use crate::server::error::ApiError;
use crate::server::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/pull", post(pull_model))
        .route("/models/import", post(import_model))
        .route("/models/alias", post(set_alias))
        .route("/models/{id}", get(get_model).delete(delete_model))
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    #[serde(default, rename = "modelId")]
    model_id: String,
}

async fn pull_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PullRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let model_handle = req.model_id;
    debug!(%model_handle, "pull model");
    if model_handle.is_empty() {
        return Err(ApiError::bad_request("modelId must not be empty"));
    }

    let handle: ModelHandle = model_handle
        .parse()
        .map_err(|e: kiln_types::HandleError| {
            ApiError::bad_request(e.to_string()).with_handle(model_handle.clone())
        })?;

    // Resolve first so an unknown repo is a 404, then fetch detached.
    state
        .kiln
        .hub()
        .download_task(&handle, &state.kiln.layout().models_dir())
        .await
        .map_err(|_| ApiError::not_found(model_handle.clone()))?;

    let kiln = Arc::clone(&state.kiln);
    let background_handle = handle.clone();
    tokio::spawn(async move {
        match kiln
            .pull_model(&background_handle, ResumePolicy::ResumeAlways)
            .await
        {
            Ok(entry) => info!(model_id = %entry.model_id, "pull finished"),
            Err(e) => error!(handle = %background_handle, error = %e, "pull failed"),
        }
    });

    Ok(Json(json!({ "result": "OK", "modelHandle": model_handle })))
}

async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let data = state.kiln.list_model_wire();
    Ok(Json(json!({
        "object": "list",
        "result": "OK",
        "data": data,
    })))
}

async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entry = state.kiln.catalog().resolve(&id).ok_or_else(|| {
        ApiError::failed(
            "Fail to get model information",
            id.clone(),
            format!("model {id:?} is not in the catalog"),
        )
    })?;
    let descriptor = state.kiln.read_descriptor(&entry).map_err(|e| {
        ApiError::failed("Fail to get model information", id.clone(), e.to_string())
    })?;
    Ok(Json(json!({
        "object": "list",
        "result": "OK",
        "data": [descriptor.to_wire()],
    })))
}

async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.kiln.catalog().delete(&id) {
        Ok(_) => Ok(Json(json!({ "result": "OK", "modelHandle": id }))),
        Err(kiln_model::ModelError::NotFound(_)) => Err(ApiError::not_found(id)),
        Err(e) => Err(ApiError::failed("Delete failed!", id, e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    #[serde(default, rename = "modelId")]
    model_id: String,
    #[serde(default, rename = "modelPath")]
    model_path: String,
}

async fn import_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.model_id.is_empty() || req.model_path.is_empty() {
        return Err(ApiError::bad_request(
            "modelId and modelPath must not be empty",
        ));
    }

    match state.kiln.import_model(&req.model_id, &req.model_path) {
        Ok(entry) => Ok(Json(json!({
            "result": "OK",
            "modelHandle": entry.model_id,
            "message": "Model is imported successfully!",
        }))),
        Err(e) => Err(ApiError::failed("Import failed!", req.model_id, e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct AliasRequest {
    #[serde(default, rename = "modelId")]
    model_id: String,
    #[serde(default, rename = "modelAlias")]
    model_alias: String,
}

async fn set_alias(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AliasRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.model_id.is_empty() || req.model_alias.is_empty() {
        return Err(ApiError::bad_request(
            "modelId and modelAlias must not be empty",
        ));
    }

    match state
        .kiln
        .catalog()
        .update_alias(&req.model_id, &req.model_alias)
    {
        Ok(()) => Ok(Json(json!({
            "result": "OK",
            "modelHandle": req.model_id,
            "message": format!(
                "Successfully set model alias {:?} for model {:?}",
                req.model_alias, req.model_id
            ),
        }))),
        Err(e) => Err(ApiError::failed(
            "Set alias failed!",
            req.model_id,
            e.to_string(),
        )),
    }
}
