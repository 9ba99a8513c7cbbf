use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::host::Accelerator;

/// Install state of an engine on this host.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineStatus {
    NotInstalled,
    Installed,
    Incompatible,
}

/// An (os, arch, accelerator) build of an engine.
///
/// The string form doubles as the install-directory segment, e.g.
/// `linux-x86_64-cuda-12.4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVariant {
    pub os: String,
    pub arch: String,
    pub accelerator: Accelerator,
}

impl EngineVariant {
    pub fn new(os: impl Into<String>, arch: impl Into<String>, accelerator: Accelerator) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            accelerator,
        }
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.os, self.arch, self.accelerator)
    }
}

/// What the registry reports about one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    pub variant: Option<EngineVariant>,
    pub status: EngineStatus,
    /// Present once the engine is installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<PathBuf>,
}
