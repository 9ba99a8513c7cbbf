//! Shared data model for the kiln daemon.
//!
//! Everything here is plain data: handles, catalog rows, engine descriptors
//! and download tasks. Behaviour lives in the service crates.

mod download;
mod engine;
mod handle;
mod host;
mod model;

pub use download::{DownloadItem, DownloadTask};
pub use engine::{EngineInfo, EngineStatus, EngineVariant};
pub use handle::{HandleError, ModelHandle};
pub use host::{Accelerator, HostError, HostInfo};
pub use model::{ModelEntry, ModelStatus};
