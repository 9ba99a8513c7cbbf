use std::path::PathBuf;

use thiserror::Error;

/// Errors that can be returned by download operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure during probe or fetch.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The pre-flight size probe failed for an item, aborting the task.
    #[error("probe failed for {url}: {source}")]
    Probe {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A local file could not be opened, written, renamed or removed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to extract a ZIP archive.
    #[error("ZIP extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The finished file does not have the size the probe reported.
    #[error("size mismatch for {path}: expected {expected} bytes, have {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The finished file does not hash to the declared checksum.
    #[error("checksum mismatch for {path}")]
    ChecksumMismatch { path: PathBuf },
}
