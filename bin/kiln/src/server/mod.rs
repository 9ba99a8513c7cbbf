//! The embedded API server.
//!
//! Startup order mirrors the daemon contract: state assembly, router build,
//! bind, serve with graceful shutdown on SIGINT/SIGTERM.

pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use tracing::{info, warn};

use kiln_core::Kiln;

use self::state::AppState;

/// Run the API server in the foreground until a stop signal arrives.
///
/// Tears the process-wide instance down on every exit path — a bind failure
/// must release the data-root lock just like a clean drain does, or the next
/// daemon start would refuse a root nobody holds.
pub async fn serve(kiln: Arc<Kiln>) -> anyhow::Result<()> {
    let result = serve_until_stopped(kiln).await;
    kiln_core::shutdown();
    result
}

async fn serve_until_stopped(kiln: Arc<Kiln>) -> anyhow::Result<()> {
    let addr = kiln.config().server_addr();
    let state = Arc::new(AppState::new(kiln));
    let app = routes::build(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, version = env!("CARGO_PKG_VERSION"), "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_stop_signal())
        .await?;

    // Detached pulls keep their own reference to the service plane; the
    // data-root lock comes off once the last of them drains.
    info!("API server stopped");
    Ok(())
}

/// Resolves on the first stop signal: Ctrl-C everywhere, SIGTERM too on
/// unix.
async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupt received; draining in-flight requests");
                    }
                    _ = term.recv() => {
                        info!("terminate received; draining in-flight requests");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable; stopping on Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("interrupt received; draining in-flight requests");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received; draining in-flight requests");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use kiln_core::{DaemonConfig, DataLayout};

    fn test_state(root: &std::path::Path) -> Arc<AppState> {
        let layout = DataLayout::new(root.join("kiln"));
        layout.ensure_tree().unwrap();
        let kiln = Kiln::open(layout, DaemonConfig::default(), None).unwrap();
        Arc::new(AppState::new(Arc::new(kiln)))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn write_gguf(path: &std::path::Path) {
        let mut bytes: Vec<u8> = Vec::new();
        bytes.extend_from_slice(b"GGUF");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        let key = b"general.architecture";
        bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&5u64.to_le_bytes());
        bytes.extend_from_slice(b"llama");
        std::fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn healthz_answers() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes::build(test_state(dir.path()));
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], json!("ok"));
    }

    #[tokio::test]
    async fn pull_with_empty_model_id_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes::build(test_state(dir.path()));
        let response = app
            .oneshot(json_request("POST", "/models/pull", json!({ "modelId": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["result"], json!("Bad Request"));
    }

    #[tokio::test]
    async fn pull_with_missing_model_id_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes::build(test_state(dir.path()));
        let response = app
            .oneshot(json_request("POST", "/models/pull", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_catalog_lists_as_empty_data() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes::build(test_state(dir.path()));
        let response = app
            .oneshot(Request::get("/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["object"], json!("list"));
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn get_unknown_model_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes::build(test_state(dir.path()));
        let response = app
            .oneshot(Request::get("/models/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_unknown_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes::build(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::delete("/models/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["result"], json!("Not Found"));
    }

    #[tokio::test]
    async fn import_then_reimport_is_a_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let gguf = dir.path().join("m.gguf");
        write_gguf(&gguf);
        let body = json!({ "modelId": "my-model", "modelPath": gguf.to_str().unwrap() });

        let response = routes::build(Arc::clone(&state))
            .oneshot(json_request("POST", "/models/import", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["result"], json!("OK"));

        let response = routes::build(Arc::clone(&state))
            .oneshot(json_request("POST", "/models/import", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope = body_json(response).await;
        assert_eq!(envelope["result"], json!("Import failed!"));
        assert!(envelope["message"]
            .as_str()
            .unwrap()
            .contains("duplicate"));
    }

    #[tokio::test]
    async fn imported_model_is_listed_and_fetchable() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let gguf = dir.path().join("m.gguf");
        write_gguf(&gguf);
        state
            .kiln
            .import_model("my-model", gguf.to_str().unwrap())
            .unwrap();

        let response = routes::build(Arc::clone(&state))
            .oneshot(Request::get("/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"][0]["id"], json!("my-model"));
        assert_eq!(body["data"][0]["engine"], json!("llamacpp"));

        let response = routes::build(state)
            .oneshot(Request::get("/models/my-model").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"][0]["id"], json!("my-model"));
    }

    #[tokio::test]
    async fn alias_set_and_duplicate_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let gguf = dir.path().join("m.gguf");
        write_gguf(&gguf);
        state.kiln.import_model("a", gguf.to_str().unwrap()).unwrap();
        state.kiln.import_model("b", gguf.to_str().unwrap()).unwrap();

        let response = routes::build(Arc::clone(&state))
            .oneshot(json_request(
                "POST",
                "/models/alias",
                json!({ "modelId": "a", "modelAlias": "fast" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Alias lookups resolve to the same row.
        let response = routes::build(Arc::clone(&state))
            .oneshot(Request::get("/models/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = routes::build(state)
            .oneshot(json_request(
                "POST",
                "/models/alias",
                json!({ "modelId": "b", "modelAlias": "fast" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["result"],
            json!("Set alias failed!")
        );
    }

    #[tokio::test]
    async fn model_status_reports_unloaded_for_unknown_models() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes::build(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::get("/models/status/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["loaded"], json!(false));
    }

    #[tokio::test]
    async fn start_of_unknown_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes::build(test_state(dir.path()));
        let response = app
            .oneshot(json_request(
                "POST",
                "/models/start",
                json!({ "modelId": "ghost" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
