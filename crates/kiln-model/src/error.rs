use thiserror::Error;

/// Errors produced by descriptor I/O and catalog operations.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("descriptor parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("catalog record error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GGUF parse error: {0}")]
    Gguf(#[from] kiln_gguf::GgufError),

    /// Catalog id or alias collision.
    #[error("duplicate {what}: {value:?}")]
    Duplicate { what: &'static str, value: String },

    /// Handle/id/alias unknown to the catalog.
    #[error("model not found: {0:?}")]
    NotFound(String),
}
