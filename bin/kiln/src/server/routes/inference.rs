//! Engine-facing routes: model start/stop/status and the chat stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::server::error::ApiError;
use crate::server::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models/start", post(start_model))
        .route("/models/stop", post(stop_model))
        .route("/models/status/{id}", get(model_status))
        .route("/chat/completions", post(chat_completions))
}

#[derive(Debug, Deserialize)]
struct ModelOpRequest {
    #[serde(default, rename = "modelId")]
    model_id: String,
}

async fn start_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelOpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.model_id.is_empty() {
        return Err(ApiError::bad_request("modelId must not be empty"));
    }
    state
        .runtime
        .start_model(&state.kiln, &req.model_id)
        .map_err(|e| ApiError::from_core("Model start failed!", &req.model_id, e))?;
    Ok(Json(json!({ "result": "OK", "modelHandle": req.model_id })))
}

async fn stop_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelOpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.model_id.is_empty() {
        return Err(ApiError::bad_request("modelId must not be empty"));
    }
    state
        .runtime
        .stop_model(&state.kiln, &req.model_id)
        .map_err(|e| ApiError::from_core("Model stop failed!", &req.model_id, e))?;
    Ok(Json(json!({ "result": "OK", "modelHandle": req.model_id })))
}

async fn model_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let loaded = state.runtime.is_loaded(&state.kiln, &id);
    Json(json!({ "modelHandle": id, "loaded": loaded }))
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    model: String,
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    options: serde_json::Value,
}

/// Stream generated tokens as raw chunks. Client disconnects drop the body,
/// which drops the receiver, which closes the engine's sink — that is the
/// cancellation path.
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if req.model.is_empty() {
        return Err(ApiError::bad_request("model must not be empty"));
    }

    let entry = state
        .kiln
        .catalog()
        .resolve(&req.model)
        .ok_or_else(|| ApiError::not_found(req.model.clone()))?;
    let descriptor = state
        .kiln
        .read_descriptor(&entry)
        .map_err(|e| ApiError::failed("Chat failed!", req.model.clone(), e.to_string()))?;

    let prompt = render_prompt(&descriptor.prompt_template, &req.messages);
    debug!(model_id = %entry.model_id, prompt_len = prompt.len(), "chat request");

    let rx = state
        .runtime
        .generate(&state.kiln, &entry.model_id, prompt, req.options)
        .map_err(|e| ApiError::failed("Chat failed!", req.model.clone(), e.to_string()))?;

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|token| (Ok::<Bytes, Infallible>(Bytes::from(token)), rx))
    });

    Ok(Response::builder()
        .header("content-type", "text/plain; charset=utf-8")
        .body(Body::from_stream(stream))
        .expect("static response parts"))
}

/// Fill the descriptor's prompt template from the chat history; without a
/// template the turns are joined role-prefixed.
fn render_prompt(template: &str, messages: &[ChatMessage]) -> String {
    let system = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let user = messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    if template.is_empty() {
        if system.is_empty() {
            user
        } else {
            format!("{system}\n{user}")
        }
    } else {
        template
            .replace("{system_message}", &system)
            .replace("{prompt}", &user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_placeholders_are_filled() {
        let messages = vec![
            ChatMessage {
                role: "system".into(),
                content: "be brief".into(),
            },
            ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            },
        ];
        let out = render_prompt("<s>{system_message}|{prompt}</s>", &messages);
        assert_eq!(out, "<s>be brief|hi</s>");
    }

    #[test]
    fn missing_template_joins_turns() {
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: "hi".into(),
        }];
        assert_eq!(render_prompt("", &messages), "hi");
    }
}
