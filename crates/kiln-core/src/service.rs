use std::path::Path;

use tracing::{info, warn};

use kiln_engines::{EngineError, EngineRegistry};
use kiln_fetch::{DownloadService, ResumePolicy};
use kiln_gguf::GgufMetadata;
use kiln_hub::HubClient;
use kiln_model::{ModelCatalog, ModelDescriptor};
use kiln_types::{EngineInfo, HostInfo, ModelEntry, ModelHandle, ModelStatus};

use crate::config::DaemonConfig;
use crate::error::CoreError;
use crate::lock::InstanceLock;
use crate::paths::DataLayout;

/// The assembled service plane: catalog, engines, hub and downloads.
pub struct Kiln {
    layout: DataLayout,
    config: DaemonConfig,
    catalog: ModelCatalog,
    registry: EngineRegistry,
    hub: HubClient,
    fetcher: DownloadService,
    _lock: Option<InstanceLock>,
}

impl Kiln {
    /// Wire the services together over an existing data layout.
    pub fn open(
        layout: DataLayout,
        config: DaemonConfig,
        lock: Option<InstanceLock>,
    ) -> Result<Self, CoreError> {
        Self::open_with_hub(layout, config, lock, HubClient::new())
    }

    /// Like [`Kiln::open`], with the hub client supplied (tests point it at
    /// a fixture server).
    pub fn open_with_hub(
        layout: DataLayout,
        config: DaemonConfig,
        lock: Option<InstanceLock>,
        hub: HubClient,
    ) -> Result<Self, CoreError> {
        let host = HostInfo::detect(config.accelerator)?;
        info!(os = %host.os, arch = %host.arch, accelerator = %host.accelerator, "host detected");

        let catalog = ModelCatalog::open(layout.model_list_file())?;
        let registry = EngineRegistry::new(layout.engines_dir(), host);

        Ok(Self {
            layout,
            config,
            catalog,
            registry,
            hub,
            fetcher: DownloadService::new(),
            _lock: lock,
        })
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn hub(&self) -> &HubClient {
        &self.hub
    }

    // ── model operations ─────────────────────────────────────────────────────

    /// Pull a model by handle: resolve the repo, fetch its files, land a
    /// `READY` catalog entry with a written descriptor.
    ///
    /// Idempotent: a handle that is already `READY` returns its entry
    /// without touching the network. A previous failed pull resumes —
    /// partial bytes on disk are continued, not restarted.
    pub async fn pull_model(
        &self,
        handle: &ModelHandle,
        policy: ResumePolicy,
    ) -> Result<ModelEntry, CoreError> {
        let stem = handle.file_stem();
        if let Some(existing) = self.catalog.resolve(&stem) {
            if existing.status == ModelStatus::Ready {
                info!(model_id = %stem, "model already pulled");
                return Ok(existing);
            }
        }

        let mut task = self
            .hub
            .download_task(handle, &self.layout.models_dir())
            .await?;
        let descriptor_path = self.layout.descriptor_path(&stem);

        if self.catalog.get_by_id(&stem).is_none() {
            self.catalog.add(ModelEntry::downloading(
                stem.clone(),
                HubClient::owner_of(handle),
                handle.branch.clone(),
                descriptor_path.clone(),
            ))?;
        } else {
            self.catalog.update_status(&stem, ModelStatus::Downloading)?;
        }

        match self
            .fetch_and_finalize(handle, &stem, &mut task, &descriptor_path, policy)
            .await
        {
            Ok(()) => {
                self.catalog.update_status(&stem, ModelStatus::Ready)?;
                Ok(self
                    .catalog
                    .get_by_id(&stem)
                    .expect("entry inserted above"))
            }
            Err(e) => {
                // Downloaded bytes stay for a later resume; the row must
                // either be resumable (descriptor present → ERROR) or gone.
                if descriptor_path.exists() {
                    let _ = self.catalog.update_status(&stem, ModelStatus::Error);
                } else {
                    let _ = self.catalog.remove(&stem);
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_finalize(
        &self,
        handle: &ModelHandle,
        stem: &str,
        task: &mut kiln_types::DownloadTask,
        descriptor_path: &Path,
        policy: ResumePolicy,
    ) -> Result<(), CoreError> {
        self.fetcher.run_task(task, policy, None).await?;

        let shipped = task
            .items
            .iter()
            .find(|i| has_extension(&i.local_path, &["yaml", "yml"]));
        let weights: Vec<String> = task
            .items
            .iter()
            .filter(|i| !has_extension(&i.local_path, &["yaml", "yml"]))
            .map(|i| i.local_path.to_string_lossy().into_owned())
            .collect();

        let mut descriptor = match shipped {
            Some(item) => ModelDescriptor::read_yaml(&item.local_path)?,
            None => {
                let gguf = task
                    .items
                    .iter()
                    .find(|i| has_extension(&i.local_path, &["gguf"]))
                    .ok_or_else(|| CoreError::NoDescriptor(stem.to_owned()))?;
                let meta = GgufMetadata::read_file(&gguf.local_path)?;
                ModelDescriptor::from_gguf(&meta, stem, &gguf.local_path.to_string_lossy())
            }
        };

        descriptor.id = stem.to_owned();
        if descriptor.name.is_empty() {
            descriptor.name = stem.to_owned();
        }
        if descriptor.model.is_empty() {
            descriptor.model = stem.to_owned();
        }
        if !weights.is_empty() {
            descriptor.files = weights;
        }
        if descriptor.engine.is_empty() {
            descriptor.engine = match handle.engine_name() {
                "cortex.llamacpp" => "llamacpp".to_owned(),
                other => other.to_owned(),
            };
        }

        descriptor.write_yaml(descriptor_path)?;
        Ok(())
    }

    /// Import a local GGUF file under `model_id`.
    ///
    /// The weight file stays where it is; only the synthesized descriptor
    /// lands under the data root.
    pub fn import_model(&self, model_id: &str, model_path: &str) -> Result<ModelEntry, CoreError> {
        let meta = GgufMetadata::read_file(Path::new(model_path))?;
        let descriptor_path = self.layout.imported_descriptor_path(model_id);

        let entry = ModelEntry {
            model_id: model_id.to_owned(),
            alias: model_id.to_owned(),
            author: "local".to_owned(),
            branch: "imported".to_owned(),
            path_to_descriptor: descriptor_path.clone(),
            status: ModelStatus::Ready,
        };
        self.catalog.add(entry.clone())?;

        let mut descriptor = ModelDescriptor::from_gguf(&meta, model_id, model_path);
        descriptor.name = model_id.to_owned();
        if let Err(e) = descriptor.write_yaml(&descriptor_path) {
            let _ = self.catalog.remove(model_id);
            return Err(e.into());
        }

        info!(model_id, model_path, "model imported");
        Ok(entry)
    }

    /// Read the descriptor behind a catalog entry.
    pub fn read_descriptor(&self, entry: &ModelEntry) -> Result<ModelDescriptor, CoreError> {
        Ok(ModelDescriptor::read_yaml(&entry.path_to_descriptor)?)
    }

    /// Wire forms of every `READY` model, skipping rows whose descriptor
    /// fails to read (they are logged, not fatal to the listing).
    pub fn list_model_wire(&self) -> Vec<serde_json::Value> {
        self.catalog
            .load_all()
            .into_iter()
            .filter_map(|entry| match self.read_descriptor(&entry) {
                Ok(descriptor) => Some(descriptor.to_wire()),
                Err(e) => {
                    warn!(
                        model_id = %entry.model_id,
                        path = %entry.path_to_descriptor.display(),
                        error = %e,
                        "failed to load descriptor"
                    );
                    None
                }
            })
            .collect()
    }

    // ── engine operations ────────────────────────────────────────────────────

    pub fn engine_info(&self, name: &str) -> Option<EngineInfo> {
        self.registry.get_engine_info(name)
    }

    pub fn list_engines(&self) -> Vec<EngineInfo> {
        self.registry.list()
    }

    pub async fn install_engine(&self, name: &str) -> Result<EngineInfo, CoreError> {
        Ok(self.registry.install(name).await?)
    }

    pub fn uninstall_engine(&self, name: &str) -> Result<(), CoreError> {
        Ok(self.registry.uninstall(name)?)
    }

    pub fn load_engine(&self, name: &str) -> Result<kiln_engines::EngineHandle, CoreError> {
        self.registry.load(name).map_err(|e| {
            // Library-load failures are fatal to the operation, never the
            // process.
            warn!(engine = name, error = %e, "engine load failed");
            CoreError::Engine(e)
        })
    }

    /// Dedicated exec-mode path: load the Python engine and delegate.
    /// Never touches the catalog.
    pub fn run_python_file(&self, script: &str, py_home: &str) -> Result<(), CoreError> {
        let handle = self.load_engine("cortex.python")?;
        let argv0 = std::env::args().next().unwrap_or_else(|| "kiln".to_owned());
        handle
            .execute_python_file(&argv0, script, py_home)
            .map_err(|message| {
                CoreError::Engine(EngineError::LoadFailed {
                    name: "cortex.python".to_owned(),
                    message,
                })
            })
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header;
    use axum::response::Response;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const WEIGHTS: &[u8] = b"fake-gguf-weights";

    fn shipped_yaml() -> String {
        [
            "name: tinyllama",
            "engine: llamacpp",
            "prompt_template: \"<|im_start|>user {prompt}\"",
            "ctx_len: 2048",
        ]
        .join("\n")
    }

    /// Hub + resolve fixture for `cortexso/tinyllama:1b-gguf`.
    async fn spawn_hub(hits: Arc<AtomicUsize>) -> SocketAddr {
        let app = Router::new()
            .route(
                "/api/models/cortexso/tinyllama/tree/1b-gguf",
                get(|| async {
                    Json(serde_json::json!([
                        { "type": "file", "path": "model.yaml", "size": 0 },
                        { "type": "file", "path": "tinyllama-1b.gguf", "size": 0 }
                    ]))
                }),
            )
            .route(
                "/cortexso/tinyllama/resolve/1b-gguf/model.yaml",
                get({
                    let hits = hits.clone();
                    move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                        async { shipped_yaml() }
                    }
                }),
            )
            .route(
                "/cortexso/tinyllama/resolve/1b-gguf/tinyllama-1b.gguf",
                get({
                    let hits = hits.clone();
                    move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                        async {
                            Response::builder()
                                .header(header::CONTENT_LENGTH, WEIGHTS.len())
                                .body(Body::from(WEIGHTS))
                                .unwrap()
                        }
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn kiln_at(root: &Path, hub_addr: SocketAddr) -> Kiln {
        let layout = DataLayout::new(root.join("kiln"));
        layout.ensure_tree().unwrap();
        Kiln::open_with_hub(
            layout,
            DaemonConfig::default(),
            None,
            HubClient::with_endpoint(format!("http://{hub_addr}")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn pull_lands_a_ready_entry_with_descriptor() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_hub(hits.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let kiln = kiln_at(dir.path(), addr);

        let handle: ModelHandle = "cortexso/tinyllama:1b-gguf".parse().unwrap();
        let entry = kiln
            .pull_model(&handle, ResumePolicy::ResumeAlways)
            .await
            .unwrap();

        assert_eq!(entry.model_id, "tinyllama-1b-gguf");
        assert_eq!(entry.status, ModelStatus::Ready);
        assert_eq!(entry.author, "cortexso");

        let descriptor = kiln.read_descriptor(&entry).unwrap();
        assert_eq!(descriptor.id, "tinyllama-1b-gguf");
        assert_eq!(descriptor.engine, "llamacpp");
        assert_eq!(descriptor.files.len(), 1);
        assert!(descriptor.files[0].ends_with("tinyllama-1b.gguf"));

        // The weight file arrived where the descriptor says it is.
        assert_eq!(std::fs::read(&descriptor.files[0]).unwrap(), WEIGHTS);
    }

    #[tokio::test]
    async fn second_pull_is_a_no_op() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_hub(hits.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let kiln = kiln_at(dir.path(), addr);

        let handle: ModelHandle = "cortexso/tinyllama:1b-gguf".parse().unwrap();
        kiln.pull_model(&handle, ResumePolicy::ResumeAlways)
            .await
            .unwrap();
        let downloads = hits.load(Ordering::SeqCst);

        let entry = kiln
            .pull_model(&handle, ResumePolicy::ResumeAlways)
            .await
            .unwrap();
        assert_eq!(entry.status, ModelStatus::Ready);
        assert_eq!(hits.load(Ordering::SeqCst), downloads, "no re-download");
    }

    #[tokio::test]
    async fn failed_pull_leaves_no_stuck_downloading_row() {
        // Fixture with a tree listing but 404s on the actual files.
        let app = Router::new().route(
            "/api/models/cortexso/tinyllama/tree/1b-gguf",
            get(|| async {
                Json(serde_json::json!([
                    { "type": "file", "path": "tinyllama-1b.gguf", "size": 0 }
                ]))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let kiln = kiln_at(dir.path(), addr);

        let handle: ModelHandle = "cortexso/tinyllama:1b-gguf".parse().unwrap();
        let err = kiln
            .pull_model(&handle, ResumePolicy::ResumeAlways)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Fetch(_)));
        assert!(kiln.catalog().get_by_id("tinyllama-1b-gguf").is_none());
    }

    fn write_gguf(path: &Path) {
        // Minimal valid header: magic, v3, no tensors, one kv.
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
    async fn import_synthesizes_descriptor_and_rejects_duplicates() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_hub(hits).await;
        let dir = tempfile::tempdir().unwrap();
        let kiln = kiln_at(dir.path(), addr);

        let gguf_path = dir.path().join("m.gguf");
        write_gguf(&gguf_path);

        let entry = kiln
            .import_model("my-model", gguf_path.to_str().unwrap())
            .unwrap();
        assert_eq!(entry.status, ModelStatus::Ready);
        assert_eq!(entry.branch, "imported");
        assert!(entry.path_to_descriptor.ends_with("imported/my-model.yml"));

        let descriptor = kiln.read_descriptor(&entry).unwrap();
        assert_eq!(descriptor.id, "my-model");
        assert_eq!(descriptor.engine, "llamacpp");
        assert_eq!(descriptor.files, vec![gguf_path.to_str().unwrap().to_owned()]);

        let err = kiln
            .import_model("my-model", gguf_path.to_str().unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Model(kiln_model::ModelError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn import_of_a_non_gguf_file_is_a_parse_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_hub(hits).await;
        let dir = tempfile::tempdir().unwrap();
        let kiln = kiln_at(dir.path(), addr);

        let bogus = dir.path().join("not-a-model.gguf");
        std::fs::write(&bogus, b"plain text").unwrap();

        let err = kiln
            .import_model("bogus", bogus.to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, CoreError::Gguf(_)));
        assert!(kiln.catalog().get_by_id("bogus").is_none());
    }

    #[tokio::test]
    async fn list_wire_skips_broken_descriptors() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_hub(hits).await;
        let dir = tempfile::tempdir().unwrap();
        let kiln = kiln_at(dir.path(), addr);

        let gguf_path = dir.path().join("m.gguf");
        write_gguf(&gguf_path);
        kiln.import_model("ok-model", gguf_path.to_str().unwrap())
            .unwrap();

        // A READY row whose descriptor has gone missing on disk.
        let broken = kiln.layout().imported_descriptor_path("broken");
        std::fs::write(&broken, "id: broken\n").unwrap();
        kiln.catalog()
            .add(ModelEntry {
                model_id: "broken".into(),
                alias: "broken".into(),
                author: "local".into(),
                branch: "imported".into(),
                path_to_descriptor: broken.clone(),
                status: ModelStatus::Ready,
            })
            .unwrap();
        std::fs::remove_file(&broken).unwrap();

        let wire = kiln.list_model_wire();
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["id"], serde_json::json!("ok-model"));
    }
}
