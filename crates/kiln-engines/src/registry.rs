use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use libloading::Library;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kiln_fetch::{DownloadService, ResumePolicy};
use kiln_types::{DownloadItem, DownloadTask, EngineInfo, EngineStatus, HostInfo};

use crate::abi::{EngineBox, EngineCapability, ABI_VERSION_SYMBOL, ENGINE_ABI_VERSION, FACTORY_SYMBOL};
use crate::error::EngineError;
use crate::manifest;

const INSTALL_RECORD: &str = "version.json";
const RELEASE_BASE: &str = "https://github.com";

/// What `version.json` records about an install.
#[derive(Debug, Serialize, Deserialize)]
struct InstallRecord {
    engine: String,
    version: String,
    variant: String,
}

/// A shared library kept open while anything references it.
struct LoadedLibrary {
    name: String,
    refs: AtomicUsize,
    library: Library,
}

impl Drop for LoadedLibrary {
    fn drop(&mut self) {
        debug!(engine = %self.name, "closing engine library");
    }
}

/// An owning handle to a loaded engine.
///
/// Dereferences to the engine's [`EngineCapability`]. Dropping the handle
/// decrements the library refcount; the library itself closes once the last
/// handle is gone. The capability object is destroyed strictly before the
/// library that contains its code.
pub struct EngineHandle {
    capability: ManuallyDrop<Box<dyn EngineCapability>>,
    lib: Arc<LoadedLibrary>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").field("lib", &self.lib.name).finish()
    }
}

impl Deref for EngineHandle {
    type Target = dyn EngineCapability;

    fn deref(&self) -> &Self::Target {
        &**self.capability
    }
}

impl EngineHandle {
    pub fn engine_name(&self) -> &str {
        &self.lib.name
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        // Capability first: its vtable lives inside the library.
        unsafe {
            ManuallyDrop::drop(&mut self.capability);
        }
        let before = self.lib.refs.fetch_sub(1, Ordering::AcqRel);
        debug!(engine = %self.lib.name, refs = before - 1, "engine handle dropped");
    }
}

/// Tracks installed engines for the current host and hands out capability
/// handles.
pub struct EngineRegistry {
    engines_dir: PathBuf,
    host: HostInfo,
    fetcher: DownloadService,
    release_base: String,
    loaded: Mutex<HashMap<String, Weak<LoadedLibrary>>>,
}

impl EngineRegistry {
    pub fn new(engines_dir: impl Into<PathBuf>, host: HostInfo) -> Self {
        Self {
            engines_dir: engines_dir.into(),
            host,
            fetcher: DownloadService::new(),
            release_base: RELEASE_BASE.to_owned(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Point release downloads at a different host (tests).
    pub fn with_release_base(mut self, base: impl Into<String>) -> Self {
        self.release_base = base.into();
        self
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    /// Consult the manifest for `name` (canonical or short form).
    ///
    /// `None` when the name is unknown; otherwise the status reflects this
    /// host: `INCOMPATIBLE` when no variant matches, `NOT_INSTALLED` /
    /// `INSTALLED` for the selected variant.
    pub fn get_engine_info(&self, name: &str) -> Option<EngineInfo> {
        let spec = manifest::find(name)?;
        let Some(variant_spec) = manifest::select_variant(spec, &self.host) else {
            return Some(EngineInfo {
                name: spec.name.to_owned(),
                version: spec.version.to_owned(),
                variant: None,
                status: EngineStatus::Incompatible,
                library_path: None,
            });
        };

        let variant = variant_spec.to_variant();
        let install_dir = self
            .engines_dir
            .join(spec.name)
            .join(variant.to_string());
        let record_path = install_dir.join(INSTALL_RECORD);

        if record_path.exists() {
            let version = std::fs::read_to_string(&record_path)
                .ok()
                .and_then(|text| serde_json::from_str::<InstallRecord>(&text).ok())
                .map(|r| r.version)
                .unwrap_or_else(|| spec.version.to_owned());
            Some(EngineInfo {
                name: spec.name.to_owned(),
                version,
                variant: Some(variant),
                status: EngineStatus::Installed,
                library_path: Some(install_dir.join(library_file_name())),
            })
        } else {
            Some(EngineInfo {
                name: spec.name.to_owned(),
                version: spec.version.to_owned(),
                variant: Some(variant),
                status: EngineStatus::NotInstalled,
                library_path: None,
            })
        }
    }

    /// Every manifest engine with its status on this host.
    pub fn list(&self) -> Vec<EngineInfo> {
        manifest::MANIFEST
            .iter()
            .filter_map(|spec| self.get_engine_info(spec.name))
            .collect()
    }

    /// Download and unpack the best-matching variant.
    ///
    /// A no-op when the engine is already installed.
    pub async fn install(&self, name: &str) -> Result<EngineInfo, EngineError> {
        let spec = manifest::find(name).ok_or_else(|| EngineError::Unknown(name.to_owned()))?;
        let info = self
            .get_engine_info(spec.name)
            .expect("manifest entry resolved above");

        match info.status {
            EngineStatus::Installed => {
                debug!(engine = spec.name, "already installed; skipping");
                return Ok(info);
            }
            EngineStatus::Incompatible => {
                return Err(EngineError::Incompatible(spec.name.to_owned()));
            }
            EngineStatus::NotInstalled => {}
        }

        let variant = info.variant.clone().expect("NOT_INSTALLED implies a variant");
        let archive_name = format!("{}-v{}-{}.tar.gz", spec.name, spec.version, variant);
        let url = format!(
            "{}/{}/releases/download/v{}/{}",
            self.release_base, spec.release_repo, spec.version, archive_name
        );

        let staging_dir = self.engines_dir.join(".downloads");
        let archive_path = staging_dir.join(&archive_name);
        let mut task = DownloadTask::new(
            format!("engine-{}", spec.name),
            vec![DownloadItem::new(url, archive_path.clone())],
        );

        info!(engine = spec.name, %variant, "installing engine");
        self.fetcher
            .run_task(&mut task, ResumePolicy::ResumeAlways, None)
            .await?;

        let install_dir = self
            .engines_dir
            .join(spec.name)
            .join(variant.to_string());
        kiln_fetch::extract_tar_gz_strip_top(&archive_path, &install_dir)?;

        let record = InstallRecord {
            engine: spec.name.to_owned(),
            version: spec.version.to_owned(),
            variant: variant.to_string(),
        };
        std::fs::write(
            install_dir.join(INSTALL_RECORD),
            serde_json::to_string(&record)?,
        )?;

        if let Err(e) = std::fs::remove_file(&archive_path) {
            warn!(path = %archive_path.display(), error = %e, "failed to remove engine archive");
        }

        info!(engine = spec.name, "engine installed");
        Ok(self
            .get_engine_info(spec.name)
            .expect("just installed"))
    }

    /// Remove an installed engine.
    ///
    /// Refused while any capability handle for the engine is live.
    pub fn uninstall(&self, name: &str) -> Result<(), EngineError> {
        let spec = manifest::find(name).ok_or_else(|| EngineError::Unknown(name.to_owned()))?;
        if self.refcount(spec.name) > 0 {
            return Err(EngineError::InUse(spec.name.to_owned()));
        }

        let dir = self.engines_dir.join(spec.name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            info!(engine = spec.name, "engine uninstalled");
        }
        Ok(())
    }

    /// Open the engine's shared library and hand out a capability handle.
    ///
    /// The library is opened at most once per engine; later loads share it
    /// and bump the refcount. A library whose ABI handshake disagrees with
    /// [`ENGINE_ABI_VERSION`] is refused and closed again.
    pub fn load(&self, name: &str) -> Result<EngineHandle, EngineError> {
        let spec = manifest::find(name).ok_or_else(|| EngineError::Unknown(name.to_owned()))?;
        let info = self
            .get_engine_info(spec.name)
            .expect("manifest entry resolved above");

        let library_path = match (info.status, info.library_path) {
            (EngineStatus::Installed, Some(path)) => path,
            (EngineStatus::Incompatible, _) => {
                return Err(EngineError::Incompatible(spec.name.to_owned()))
            }
            _ => return Err(EngineError::NotInstalled(spec.name.to_owned())),
        };

        let mut loaded = self.loaded.lock().unwrap();
        let lib = match loaded.get(spec.name).and_then(Weak::upgrade) {
            Some(lib) => lib,
            None => {
                let library = unsafe { Library::new(&library_path) }.map_err(|e| {
                    EngineError::LoadFailed {
                        name: spec.name.to_owned(),
                        message: e.to_string(),
                    }
                })?;

                let found = unsafe {
                    let abi: libloading::Symbol<unsafe extern "C" fn() -> u32> = library
                        .get(ABI_VERSION_SYMBOL)
                        .map_err(|e| EngineError::LoadFailed {
                            name: spec.name.to_owned(),
                            message: format!("missing ABI handshake symbol: {e}"),
                        })?;
                    abi()
                };
                if found != ENGINE_ABI_VERSION {
                    // `library` drops here, closing the refused library.
                    return Err(EngineError::AbiMismatch {
                        name: spec.name.to_owned(),
                        found,
                        expected: ENGINE_ABI_VERSION,
                    });
                }

                let lib = Arc::new(LoadedLibrary {
                    name: spec.name.to_owned(),
                    refs: AtomicUsize::new(0),
                    library,
                });
                loaded.insert(spec.name.to_owned(), Arc::downgrade(&lib));
                info!(engine = spec.name, path = %library_path.display(), "engine library opened");
                lib
            }
        };
        drop(loaded);

        let capability = unsafe {
            let factory: libloading::Symbol<unsafe extern "C" fn() -> *mut EngineBox> = lib
                .library
                .get(FACTORY_SYMBOL)
                .map_err(|e| EngineError::LoadFailed {
                    name: spec.name.to_owned(),
                    message: format!("missing factory symbol: {e}"),
                })?;
            let raw = factory();
            if raw.is_null() {
                return Err(EngineError::LoadFailed {
                    name: spec.name.to_owned(),
                    message: "factory returned null".to_owned(),
                });
            }
            Box::from_raw(raw).engine
        };

        lib.refs.fetch_add(1, Ordering::AcqRel);
        Ok(EngineHandle {
            capability: ManuallyDrop::new(capability),
            lib,
        })
    }

    /// Drop a handle through the registry, for symmetry with [`load`].
    ///
    /// [`load`]: Self::load
    pub fn unload(&self, handle: EngineHandle) {
        drop(handle);
    }

    /// Live handle count for an engine's library.
    pub fn refcount(&self, name: &str) -> usize {
        let canonical = manifest::find(name).map(|s| s.name).unwrap_or(name);
        self.loaded
            .lock()
            .unwrap()
            .get(canonical)
            .and_then(Weak::upgrade)
            .map(|lib| lib.refs.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

/// Platform file name of an engine's shared library.
fn library_file_name() -> String {
    format!(
        "{}engine{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use kiln_types::Accelerator;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;

    fn linux_cpu() -> HostInfo {
        HostInfo {
            os: "linux".into(),
            arch: "x86_64".into(),
            accelerator: Accelerator::Cpu,
        }
    }

    fn release_archive() -> Vec<u8> {
        // cortex.llamacpp-v0.1.25-linux-x86_64-cpu.tar.gz with one top-level
        // dir wrapping the library file.
        let mut tar_bytes = Vec::new();
        {
            let encoder =
                flate2::write::GzEncoder::new(&mut tar_bytes, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let payload = b"not really a shared library";
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(
                    &mut header,
                    format!("cortex.llamacpp-v0.1.25/{}", library_file_name()),
                    payload.as_slice(),
                )
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        tar_bytes
    }

    async fn spawn_release_fixture(hits: Arc<AtomicUsize>) -> SocketAddr {
        let archive = release_archive();
        let app = Router::new().fallback(move || {
            let archive = archive.clone();
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                archive
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn unknown_engine_reports_none() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EngineRegistry::new(dir.path(), linux_cpu());
        assert!(registry.get_engine_info("exllama").is_none());
    }

    #[test]
    fn known_engine_without_host_variant_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EngineRegistry::new(dir.path(), linux_cpu());
        let info = registry.get_engine_info("cortex.onnx").unwrap();
        assert_eq!(info.status, EngineStatus::Incompatible);
        assert_eq!(info.variant, None);

        let err = registry.load("cortex.onnx").unwrap_err();
        assert!(matches!(err, EngineError::Incompatible(_)));
    }

    #[test]
    fn known_engine_starts_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EngineRegistry::new(dir.path(), linux_cpu());
        let info = registry.get_engine_info("llamacpp").unwrap();
        assert_eq!(info.name, "cortex.llamacpp");
        assert_eq!(info.status, EngineStatus::NotInstalled);
        assert!(info.library_path.is_none());

        let err = registry.load("llamacpp").unwrap_err();
        assert!(matches!(err, EngineError::NotInstalled(_)));
    }

    #[tokio::test]
    async fn install_unpacks_and_records_then_is_idempotent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_release_fixture(hits.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let registry = EngineRegistry::new(dir.path(), linux_cpu())
            .with_release_base(format!("http://{addr}"));

        let info = registry.install("llamacpp").await.unwrap();
        assert_eq!(info.status, EngineStatus::Installed);
        let lib_path = info.library_path.unwrap();
        assert!(lib_path.exists());
        assert!(lib_path
            .parent()
            .unwrap()
            .join(INSTALL_RECORD)
            .exists());
        let fetched = hits.load(Ordering::SeqCst);
        assert!(fetched >= 1);

        // Second install: no-op, no further downloads.
        let again = registry.install("llamacpp").await.unwrap();
        assert_eq!(again.status, EngineStatus::Installed);
        assert_eq!(hits.load(Ordering::SeqCst), fetched);
    }

    #[tokio::test]
    async fn uninstall_then_install_restores_capability() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_release_fixture(hits).await;
        let dir = tempfile::tempdir().unwrap();
        let registry = EngineRegistry::new(dir.path(), linux_cpu())
            .with_release_base(format!("http://{addr}"));

        registry.install("llamacpp").await.unwrap();
        registry.uninstall("llamacpp").unwrap();
        let info = registry.get_engine_info("llamacpp").unwrap();
        assert_eq!(info.status, EngineStatus::NotInstalled);

        let info = registry.install("llamacpp").await.unwrap();
        assert_eq!(info.status, EngineStatus::Installed);
    }

    #[tokio::test]
    async fn loading_a_fake_library_fails_without_crashing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_release_fixture(hits).await;
        let dir = tempfile::tempdir().unwrap();
        let registry = EngineRegistry::new(dir.path(), linux_cpu())
            .with_release_base(format!("http://{addr}"));

        registry.install("llamacpp").await.unwrap();
        // The fixture's "library" is not a real shared object; the load must
        // fail as a per-operation error, not a process abort.
        let err = registry.load("llamacpp").unwrap_err();
        assert!(matches!(err, EngineError::LoadFailed { .. }));
        assert_eq!(registry.refcount("llamacpp"), 0);
        // And an unloaded engine can still be uninstalled.
        registry.uninstall("llamacpp").unwrap();
    }

    #[test]
    fn list_covers_the_whole_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EngineRegistry::new(dir.path(), linux_cpu());
        let names: Vec<String> = registry.list().into_iter().map(|i| i.name).collect();
        assert!(names.contains(&"cortex.llamacpp".to_owned()));
        assert!(names.contains(&"cortex.onnx".to_owned()));
        assert!(names.contains(&"cortex.tensorrt-llm".to_owned()));
        assert!(names.contains(&"cortex.python".to_owned()));
    }
}
