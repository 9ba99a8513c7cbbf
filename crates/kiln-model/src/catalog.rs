use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use kiln_types::{ModelEntry, ModelStatus};

use crate::error::ModelError;

/// The persistent model inventory.
///
/// One JSON-lines file holds every known model, keyed by `model_id` and
/// `alias` (both unique). All mutations funnel through the internal mutex
/// and rewrite the file atomically (write-temp-then-rename), so readers only
/// ever observe a pre- or post-mutation file, never a partial one.
pub struct ModelCatalog {
    list_path: PathBuf,
    entries: Mutex<Vec<ModelEntry>>,
}

impl ModelCatalog {
    /// Open (or create) the catalog at `list_path`.
    ///
    /// `DOWNLOADING` rows whose descriptor no longer exists are leftovers of
    /// an interrupted pull that cannot be resumed through the catalog; they
    /// are garbage-collected here.
    pub fn open(list_path: impl Into<PathBuf>) -> Result<Self, ModelError> {
        let list_path = list_path.into();
        if let Some(parent) = list_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut entries = Vec::new();
        if list_path.exists() {
            let text = fs::read_to_string(&list_path)?;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                entries.push(serde_json::from_str::<ModelEntry>(line)?);
            }
        }

        let before = entries.len();
        entries.retain(|entry| {
            let keep = entry.status != ModelStatus::Downloading
                || entry.path_to_descriptor.exists();
            if !keep {
                warn!(model_id = %entry.model_id, "dropping stale DOWNLOADING entry");
            }
            keep
        });

        let collected = before != entries.len();
        let catalog = Self {
            list_path,
            entries: Mutex::new(entries),
        };
        if collected {
            catalog.persist(&catalog.entries.lock().unwrap())?;
        }
        Ok(catalog)
    }

    /// Snapshot of every row.
    pub fn load_all(&self) -> Vec<ModelEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn get_by_id(&self, model_id: &str) -> Option<ModelEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.model_id == model_id)
            .cloned()
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<ModelEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.alias == alias)
            .cloned()
    }

    /// Resolve a user-supplied key through both lookup paths.
    pub fn resolve(&self, key: &str) -> Option<ModelEntry> {
        self.get_by_id(key).or_else(|| self.get_by_alias(key))
    }

    /// Insert a new row; fails with [`ModelError::Duplicate`] when the id or
    /// alias collides with any existing id or alias.
    pub fn add(&self, entry: ModelEntry) -> Result<(), ModelError> {
        let mut entries = self.entries.lock().unwrap();
        for existing in entries.iter() {
            if existing.model_id == entry.model_id || existing.alias == entry.model_id {
                return Err(ModelError::Duplicate {
                    what: "model_id",
                    value: entry.model_id,
                });
            }
            if existing.model_id == entry.alias || existing.alias == entry.alias {
                return Err(ModelError::Duplicate {
                    what: "alias",
                    value: entry.alias,
                });
            }
        }
        entries.push(entry);
        self.persist(&entries)
    }

    /// Point `model_id` at a new alias; fails when another row already owns
    /// it.
    pub fn update_alias(&self, model_id: &str, alias: &str) -> Result<(), ModelError> {
        let mut entries = self.entries.lock().unwrap();
        let taken = entries
            .iter()
            .any(|e| e.model_id != model_id && (e.alias == alias || e.model_id == alias));
        if taken {
            return Err(ModelError::Duplicate {
                what: "alias",
                value: alias.to_owned(),
            });
        }
        let entry = entries
            .iter_mut()
            .find(|e| e.model_id == model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_owned()))?;
        entry.alias = alias.to_owned();
        self.persist(&entries)
    }

    /// Move a row through its state machine.
    pub fn update_status(&self, model_id: &str, status: ModelStatus) -> Result<(), ModelError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.model_id == model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_owned()))?;
        debug!(model_id, from = %entry.status, to = %status, "catalog status change");
        entry.status = status;
        self.persist(&entries)
    }

    /// Remove a row without touching any file.
    ///
    /// Rollback path for a pull that failed before producing a descriptor:
    /// the row must not survive (it could never be resumed through the
    /// catalog) but partially downloaded bytes stay in place so a later pull
    /// can resume them.
    pub fn remove(&self, model_id: &str) -> Result<ModelEntry, ModelError> {
        let mut entries = self.entries.lock().unwrap();
        let idx = entries
            .iter()
            .position(|e| e.model_id == model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_owned()))?;
        let entry = entries.remove(idx);
        self.persist(&entries)?;
        Ok(entry)
    }

    /// Remove a row and the files it owns.
    ///
    /// A pulled model owns its whole `models/<stem>/` directory (descriptor
    /// plus weights). An imported model owns only its descriptor file; the
    /// weight file it references lives outside the data root and is never
    /// touched.
    pub fn delete(&self, model_id: &str) -> Result<ModelEntry, ModelError> {
        let mut entries = self.entries.lock().unwrap();
        let idx = entries
            .iter()
            .position(|e| e.model_id == model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_owned()))?;
        let entry = entries.remove(idx);
        self.persist(&entries)?;
        drop(entries);

        let descriptor = &entry.path_to_descriptor;
        let owns_directory = descriptor
            .parent()
            .and_then(Path::file_name)
            .map(|dir| dir == std::ffi::OsStr::new(&entry.model_id))
            .unwrap_or(false);

        if owns_directory {
            let dir = descriptor.parent().expect("checked above");
            if let Err(e) = fs::remove_dir_all(dir) {
                warn!(path = %dir.display(), error = %e, "failed to remove model directory");
            }
        } else if descriptor.exists() {
            if let Err(e) = fs::remove_file(descriptor) {
                warn!(path = %descriptor.display(), error = %e, "failed to remove descriptor");
            }
        }

        Ok(entry)
    }

    /// Rewrite the list file atomically.
    fn persist(&self, entries: &[ModelEntry]) -> Result<(), ModelError> {
        let tmp_path = self.list_path.with_extension("tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            for entry in entries {
                serde_json::to_writer(&mut tmp, entry)?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.list_path)?;
        Ok(())
    }
}
