use thiserror::Error;

/// Errors produced by the engine registry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The name does not appear in the engine manifest.
    #[error("unknown engine: {0:?}")]
    Unknown(String),

    /// The engine exists but ships no variant for this host.
    #[error("engine {0} is incompatible with this host")]
    Incompatible(String),

    /// The engine must be installed before it can be loaded.
    #[error("engine {0} is not installed")]
    NotInstalled(String),

    /// Uninstall refused: handles to the library are still live.
    #[error("engine {0} is in use and cannot be uninstalled")]
    InUse(String),

    /// The shared library could not be opened or a symbol is missing.
    #[error("failed to load engine {name}: {message}")]
    LoadFailed { name: String, message: String },

    /// The library reports a different plugin ABI version.
    #[error("engine {name} speaks ABI v{found}, this daemon speaks v{expected}")]
    AbiMismatch {
        name: String,
        found: u32,
        expected: u32,
    },

    #[error("engine download failed: {0}")]
    Fetch(#[from] kiln_fetch::FetchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("install record error: {0}")]
    Json(#[from] serde_json::Error),
}
