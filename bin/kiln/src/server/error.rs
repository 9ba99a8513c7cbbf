//! The API error envelope.
//!
//! Every failure maps to `{result, modelHandle?, message?}` with a 4xx
//! status; user-input errors never surface as a 5xx.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use kiln_core::CoreError;
use kiln_model::ModelError;

/// An error response in the `{result, modelHandle, message}` envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub result: String,
    pub model_handle: Option<String>,
    pub message: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            result: "Bad Request".to_owned(),
            model_handle: None,
            message: Some(message.into()),
        }
    }

    pub fn not_found(model_handle: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            result: "Not Found".to_owned(),
            model_handle: Some(model_handle.into()),
            message: None,
        }
    }

    /// 400 with an operation-specific `result` label, cortex-style
    /// ("Import failed!", "Set alias failed!").
    pub fn failed(
        result: impl Into<String>,
        model_handle: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            result: result.into(),
            model_handle: Some(model_handle.into()),
            message: Some(message.into()),
        }
    }

    pub fn with_handle(mut self, model_handle: impl Into<String>) -> Self {
        self.model_handle = Some(model_handle.into());
        self
    }

    /// Map a core error for one operation; `result` labels the failure.
    pub fn from_core(result: &str, model_handle: &str, error: CoreError) -> Self {
        let status = match &error {
            CoreError::Model(ModelError::NotFound(_)) => StatusCode::NOT_FOUND,
            CoreError::Hub(kiln_hub::HubError::RepoNotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            result: if status == StatusCode::NOT_FOUND {
                "Not Found".to_owned()
            } else {
                result.to_owned()
            },
            model_handle: Some(model_handle.to_owned()),
            message: Some(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "result": self.result });
        if let Some(handle) = self.model_handle {
            body["modelHandle"] = json!(handle);
        }
        if let Some(message) = self.message {
            body["message"] = json!(message);
        }
        (self.status, Json(body)).into_response()
    }
}
