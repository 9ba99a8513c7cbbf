use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the process plane and the run pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no usable data root on this system; set KILN_DATA_ROOT")]
    NoDataRoot,

    #[error("data root is locked by another kiln instance (pid {holder}); remove {path} if it is stale")]
    LockHeld { path: PathBuf, holder: String },

    #[error("kiln runtime not initialized; call kiln_core::init first")]
    NotInitialized,

    #[error(transparent)]
    Host(#[from] kiln_types::HostError),

    #[error("invalid model handle: {0}")]
    Handle(#[from] kiln_types::HandleError),

    #[error(transparent)]
    Model(#[from] kiln_model::ModelError),

    #[error(transparent)]
    Gguf(#[from] kiln_gguf::GgufError),

    #[error(transparent)]
    Fetch(#[from] kiln_fetch::FetchError),

    #[error(transparent)]
    Hub(#[from] kiln_hub::HubError),

    #[error(transparent)]
    Engine(#[from] kiln_engines::EngineError),

    /// The branch produced no descriptor and no GGUF file to synthesize one
    /// from.
    #[error("no descriptor found for {0} after download")]
    NoDescriptor(String),

    #[error("API server at {addr} did not come up within {timeout_secs}s")]
    ServerStartFailed { addr: String, timeout_secs: u64 },

    #[error("API server at {addr} rejected {what}: {message}")]
    ServerRejected {
        addr: String,
        what: &'static str,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration record error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("configuration record error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
}
