use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a catalog row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    Ready,
    Downloading,
    Error,
}

/// One row of the model catalog.
///
/// `model_id` and `alias` are both unique across the catalog and both
/// resolve to the same row. `path_to_descriptor` is absolute and points at a
/// readable file whenever `status` is [`ModelStatus::Ready`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub model_id: String,
    pub alias: String,
    pub author: String,
    pub branch: String,
    pub path_to_descriptor: PathBuf,
    pub status: ModelStatus,
}

impl ModelEntry {
    /// A fresh row for a model being pulled; alias defaults to the id.
    pub fn downloading(
        model_id: impl Into<String>,
        author: impl Into<String>,
        branch: impl Into<String>,
        path_to_descriptor: PathBuf,
    ) -> Self {
        let model_id = model_id.into();
        Self {
            alias: model_id.clone(),
            model_id,
            author: author.into(),
            branch: branch.into(),
            path_to_descriptor,
            status: ModelStatus::Downloading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&ModelStatus::Downloading).unwrap();
        assert_eq!(json, "\"DOWNLOADING\"");
        let back: ModelStatus = serde_json::from_str("\"READY\"").unwrap();
        assert_eq!(back, ModelStatus::Ready);
    }

    #[test]
    fn entry_round_trips_through_json() {
        let entry = ModelEntry::downloading(
            "tinyllama-1b-gguf",
            "cortexso",
            "1b-gguf",
            PathBuf::from("/data/models/tinyllama-1b-gguf/tinyllama-1b-gguf.yaml"),
        );
        assert_eq!(entry.alias, entry.model_id);

        let json = serde_json::to_string(&entry).unwrap();
        let back: ModelEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
