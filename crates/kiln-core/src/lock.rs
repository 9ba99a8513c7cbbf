use std::io::Write as _;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::CoreError;

/// Exclusive-instance lock on the data root.
///
/// Acquired at daemon startup, released on drop. A second instance fails
/// fast instead of racing the first over the catalog.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                debug!(path = %path.display(), "instance lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                Err(CoreError::LockHeld {
                    path: path.clone(),
                    holder: holder.trim().to_owned(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release instance lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquisition_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        let err = InstanceLock::acquire(&path).unwrap_err();
        assert!(matches!(err, CoreError::LockHeld { .. }));
        drop(lock);

        // Released on drop; a new instance can start.
        let _lock = InstanceLock::acquire(&path).unwrap();
    }

    #[test]
    fn lock_file_records_the_holder_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let _lock = InstanceLock::acquire(&path).unwrap();
        let pid: u32 = std::fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(pid, std::process::id());
    }
}
