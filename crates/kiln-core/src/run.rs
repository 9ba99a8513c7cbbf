//! The "from handle to chat" pipeline.
//!
//! Composes catalog, hub, downloads and the engine registry into one
//! idempotent flow: pull the model if unknown, install the engine if
//! missing, bring the API server up if dead, load the model unless the GGUF
//! runner already has it, then hand over to the chat adapter. Re-running the
//! pipeline never duplicates a resource.

use std::process::{Command, Stdio};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use kiln_engines::EngineError;
use kiln_fetch::ResumePolicy;
use kiln_model::ModelDescriptor;
use kiln_types::{EngineStatus, ModelEntry, ModelHandle, ModelStatus};

use crate::error::CoreError;
use crate::service::Kiln;

/// How long a freshly spawned server gets to answer its first health check.
pub const SERVER_START_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Thin client for the daemon's own API server.
pub struct ServerClient {
    client: reqwest::Client,
    base: String,
}

impl ServerClient {
    pub fn new(host: &str, port: u16) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: format!("http://{host}:{port}"),
        }
    }

    pub fn addr(&self) -> &str {
        &self.base
    }

    pub async fn is_alive(&self) -> bool {
        match self.client.get(format!("{}/healthz", self.base)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn model_loaded(&self, model_id: &str) -> Result<bool, CoreError> {
        let resp = self
            .client
            .get(format!("{}/models/status/{model_id}", self.base))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body["loaded"].as_bool().unwrap_or(false))
    }

    pub async fn start_model(&self, model_id: &str) -> Result<(), CoreError> {
        let resp = self
            .client
            .post(format!("{}/models/start", self.base))
            .json(&json!({ "modelId": model_id }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CoreError::ServerRejected {
                addr: self.base.clone(),
                what: "model start",
                message,
            });
        }
        Ok(())
    }

    pub async fn stop_model(&self, model_id: &str) -> Result<(), CoreError> {
        let resp = self
            .client
            .post(format!("{}/models/stop", self.base))
            .json(&json!({ "modelId": model_id }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CoreError::ServerRejected {
                addr: self.base.clone(),
                what: "model stop",
                message,
            });
        }
        Ok(())
    }
}

/// What the pipeline did, for the chat adapter and the CLI summary.
pub struct RunOutcome {
    pub entry: ModelEntry,
    pub descriptor: ModelDescriptor,
    /// False when the GGUF runner already had the model loaded.
    pub model_started: bool,
    pub server_spawned: bool,
}

/// Execute the run pipeline for `handle` against the server at `host:port`.
pub async fn run_pipeline(
    kiln: &Kiln,
    handle: &ModelHandle,
    host: &str,
    port: u16,
) -> Result<RunOutcome, CoreError> {
    // 1. Normalize the handle.
    let stem = handle.file_stem();
    let engine_name = handle.engine_name();
    debug!(%stem, engine_name, branch = %handle.branch, "run pipeline start");

    // 2. Ensure the model is in the catalog.
    let entry = match kiln.catalog().resolve(&stem) {
        Some(entry) if entry.status == ModelStatus::Ready => entry,
        _ => {
            info!(%stem, "model not present; pulling");
            kiln.pull_model(handle, ResumePolicy::Prompted).await?
        }
    };

    // 3. Ensure the engine is installed.
    let engine = kiln
        .engine_info(engine_name)
        .ok_or_else(|| CoreError::Engine(EngineError::Unknown(engine_name.to_owned())))?;
    match engine.status {
        EngineStatus::Incompatible => {
            return Err(CoreError::Engine(EngineError::Incompatible(engine.name)));
        }
        EngineStatus::NotInstalled => {
            info!(engine = %engine.name, "engine not installed; installing");
            kiln.install_engine(&engine.name).await?;
        }
        EngineStatus::Installed => {}
    }

    // 4. Ensure the API server is alive.
    let server = ServerClient::new(host, port);
    let mut server_spawned = false;
    if !server.is_alive().await {
        info!(addr = %server.addr(), "starting server");
        spawn_server()?;
        server_spawned = true;
        wait_until_alive(&server, SERVER_START_TIMEOUT).await?;
    }

    // 5. Read the descriptor from disk.
    let descriptor = kiln.read_descriptor(&entry)?;

    // 6. Load policy: always start, except when the GGUF runner already has
    //    this model.
    let already_loaded = descriptor.engine.contains("llamacpp")
        && server.model_loaded(&entry.model_id).await.unwrap_or(false);
    let model_started = if already_loaded {
        debug!(model_id = %entry.model_id, "model already loaded");
        false
    } else {
        server.start_model(&entry.model_id).await?;
        true
    };

    // 7. The caller enters the chat adapter with this outcome.
    Ok(RunOutcome {
        entry,
        descriptor,
        model_started,
        server_spawned,
    })
}

/// Spawn this executable as the detached API server process.
fn spawn_server() -> Result<(), CoreError> {
    let exe = std::env::current_exe()?;
    Command::new(exe)
        .arg("--start-server")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

/// Poll `/healthz` until the server answers or the deadline passes.
pub async fn wait_until_alive(server: &ServerClient, timeout: Duration) -> Result<(), CoreError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if server.is_alive().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CoreError::ServerStartFailed {
                addr: server.addr().to_owned(),
                timeout_secs: timeout.as_secs(),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
