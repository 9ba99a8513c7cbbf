use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub url: String,
    /// Destination path, always rooted under the data root.
    pub local_path: PathBuf,
    /// Filled by the pre-flight probe; `0` means the remote did not report a
    /// size, which disables resume for this item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_bytes: Option<u64>,
    /// Hex sha256 of the finished file, verified when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl DownloadItem {
    pub fn new(url: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            url: url.into(),
            local_path,
            expected_bytes: None,
            checksum: None,
        }
    }
}

/// A batch of files fetched under one task key.
///
/// For model fetches the id equals the handle's file stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: String,
    pub items: Vec<DownloadItem>,
}

impl DownloadTask {
    pub fn new(id: impl Into<String>, items: Vec<DownloadItem>) -> Self {
        Self {
            id: id.into(),
            items,
        }
    }
}
