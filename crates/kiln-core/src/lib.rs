//! Process plane of the kiln daemon.
//!
//! [`Kiln`] owns the catalog, the engine registry, the hub resolver and the
//! download service, and offers the model/engine operations both façades
//! (CLI and HTTP) are built on. The process-wide instance has an explicit
//! [`init`] / [`shutdown`] lifecycle; nothing is constructed at load time.

mod config;
mod error;
mod lock;
mod paths;
pub mod run;
mod service;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub use config::DaemonConfig;
pub use error::CoreError;
pub use lock::InstanceLock;
pub use paths::{DataLayout, DATA_ROOT_ENV};
pub use service::Kiln;

static INSTANCE: Mutex<Option<Arc<Kiln>>> = Mutex::new(None);

/// How to bring the process plane up.
#[derive(Debug, Default)]
pub struct InitOptions {
    /// Explicit data root; resolved from the environment/OS when `None`.
    pub root: Option<PathBuf>,
    /// Daemons take the single-instance lock; short-lived CLI commands that
    /// only read may skip it.
    pub acquire_lock: bool,
}

/// Initialize the process-wide [`Kiln`] instance.
///
/// Idempotent: a second call returns the existing instance, first
/// configuration wins.
pub fn init(options: InitOptions) -> Result<Arc<Kiln>, CoreError> {
    let mut slot = INSTANCE.lock().unwrap();
    if let Some(existing) = slot.as_ref() {
        return Ok(Arc::clone(existing));
    }

    let layout = match options.root {
        Some(root) => DataLayout::new(root),
        None => DataLayout::resolve()?,
    };
    layout.ensure_tree()?;

    let lock = if options.acquire_lock {
        Some(InstanceLock::acquire(layout.lock_file())?)
    } else {
        None
    };

    let config = DaemonConfig::load_or_create(&layout.config_file())?;
    let kiln = Arc::new(Kiln::open(layout, config, lock)?);
    *slot = Some(Arc::clone(&kiln));
    Ok(kiln)
}

/// The live instance, or [`CoreError::NotInitialized`].
pub fn instance() -> Result<Arc<Kiln>, CoreError> {
    INSTANCE
        .lock()
        .unwrap()
        .as_ref()
        .map(Arc::clone)
        .ok_or(CoreError::NotInitialized)
}

/// Tear the process-wide instance down, releasing the instance lock.
pub fn shutdown() {
    INSTANCE.lock().unwrap().take();
}
