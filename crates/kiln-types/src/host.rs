use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("unsupported OS or architecture: {os}, {arch}")]
    Unsupported { os: String, arch: String },

    #[error("unknown accelerator: {0:?}")]
    UnknownAccelerator(String),
}

/// Compute accelerator a host exposes, or an engine variant targets.
///
/// The string form is the variant-directory segment: `cpu`, `metal`, `rocm`,
/// `cuda-12.4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accelerator {
    Cpu,
    Metal,
    Rocm,
    Cuda { major: u32, minor: u32 },
}

impl Accelerator {
    /// GPU accelerators rank above CPU when picking a variant.
    pub fn is_gpu(&self) -> bool {
        !matches!(self, Accelerator::Cpu)
    }

    /// Ordering key used by variant selection: GPU over CPU, then highest
    /// minor version.
    pub fn rank(&self) -> (u8, u32, u32) {
        match self {
            Accelerator::Cpu => (0, 0, 0),
            Accelerator::Metal => (1, 0, 0),
            Accelerator::Rocm => (1, 0, 0),
            Accelerator::Cuda { major, minor } => (1, *major, *minor),
        }
    }

    /// Whether an engine variant built for `self` can run on `host`.
    ///
    /// CPU builds run anywhere; CUDA builds need a CUDA host with at least
    /// the same major version; metal/rocm need an exact family match.
    pub fn runs_on(&self, host: &Accelerator) -> bool {
        match (self, host) {
            (Accelerator::Cpu, _) => true,
            (Accelerator::Metal, Accelerator::Metal) => true,
            (Accelerator::Rocm, Accelerator::Rocm) => true,
            (
                Accelerator::Cuda { major, minor },
                Accelerator::Cuda {
                    major: host_major,
                    minor: host_minor,
                },
            ) => major == host_major && minor <= host_minor,
            _ => false,
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accelerator::Cpu => write!(f, "cpu"),
            Accelerator::Metal => write!(f, "metal"),
            Accelerator::Rocm => write!(f, "rocm"),
            Accelerator::Cuda { major, minor } => write!(f, "cuda-{major}.{minor}"),
        }
    }
}

impl FromStr for Accelerator {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Accelerator::Cpu),
            "metal" => Ok(Accelerator::Metal),
            "rocm" => Ok(Accelerator::Rocm),
            other => {
                let ver = other
                    .strip_prefix("cuda-")
                    .ok_or_else(|| HostError::UnknownAccelerator(other.to_owned()))?;
                let (major, minor) = ver
                    .split_once('.')
                    .ok_or_else(|| HostError::UnknownAccelerator(other.to_owned()))?;
                let major = major
                    .parse()
                    .map_err(|_| HostError::UnknownAccelerator(other.to_owned()))?;
                let minor = minor
                    .parse()
                    .map_err(|_| HostError::UnknownAccelerator(other.to_owned()))?;
                Ok(Accelerator::Cuda { major, minor })
            }
        }
    }
}

impl Serialize for Accelerator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Accelerator {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The (os, arch, accelerator) triple kiln is running on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub os: String,
    pub arch: String,
    pub accelerator: Accelerator,
}

impl HostInfo {
    /// Detect the current host.
    ///
    /// `accelerator` lets the caller (config record) override detection;
    /// without it, macOS on arm64 reports `metal` and everything else `cpu`.
    /// Fails on hosts kiln does not support at all.
    pub fn detect(accelerator: Option<Accelerator>) -> Result<Self, HostError> {
        let os = match std::env::consts::OS {
            os @ ("linux" | "macos" | "windows") => os.to_owned(),
            other => {
                return Err(HostError::Unsupported {
                    os: other.to_owned(),
                    arch: std::env::consts::ARCH.to_owned(),
                })
            }
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "x86_64".to_owned(),
            "aarch64" => "arm64".to_owned(),
            other => {
                return Err(HostError::Unsupported {
                    os,
                    arch: other.to_owned(),
                })
            }
        };

        let accelerator = accelerator.unwrap_or(match (os.as_str(), arch.as_str()) {
            ("macos", "arm64") => Accelerator::Metal,
            _ => Accelerator::Cpu,
        });

        Ok(Self {
            os,
            arch,
            accelerator,
        })
    }
}
