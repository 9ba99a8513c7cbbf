use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Environment override for the data root.
pub const DATA_ROOT_ENV: &str = "KILN_DATA_ROOT";

/// Where durable state lives.
///
/// ```text
/// <root>/
///   config            daemon configuration record
///   .lock             single-instance lock
///   models/
///     model.list      the catalog
///     <stem>/...      pulled models (descriptor + weights)
///     imported/...    imported descriptors (.yml)
///   engines/<e>/<v>/  installed engine variants
///   logs/
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root: `$KILN_DATA_ROOT`, else the OS data dir, else the
    /// home directory.
    pub fn resolve() -> Result<Self, CoreError> {
        if let Ok(root) = std::env::var(DATA_ROOT_ENV) {
            if !root.is_empty() {
                return Ok(Self::new(root));
            }
        }
        let base = dirs_next::data_dir()
            .or_else(dirs_next::home_dir)
            .ok_or(CoreError::NoDataRoot)?;
        Ok(Self::new(base.join("kiln")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn imported_dir(&self) -> PathBuf {
        self.models_dir().join("imported")
    }

    pub fn model_list_file(&self) -> PathBuf {
        self.models_dir().join("model.list")
    }

    /// Directory one pulled model owns.
    pub fn model_dir(&self, file_stem: &str) -> PathBuf {
        self.models_dir().join(file_stem)
    }

    /// Descriptor path for a pulled model.
    pub fn descriptor_path(&self, file_stem: &str) -> PathBuf {
        self.model_dir(file_stem).join(format!("{file_stem}.yaml"))
    }

    /// Descriptor path for an imported model (note the `.yml` extension).
    pub fn imported_descriptor_path(&self, model_id: &str) -> PathBuf {
        self.imported_dir().join(format!("{model_id}.yml"))
    }

    pub fn engines_dir(&self) -> PathBuf {
        self.root.join("engines")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the directory tree.
    pub fn ensure_tree(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.models_dir())?;
        std::fs::create_dir_all(self.imported_dir())?;
        std::fs::create_dir_all(self.engines_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
