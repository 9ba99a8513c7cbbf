//! Engine registry and plugin ABI.
//!
//! Engines are native inference backends shipped as shared libraries. The
//! registry tracks which engines are installed for the current
//! (os, arch, accelerator) host, installs release archives under the data
//! root, and loads libraries at runtime through a versioned factory symbol.
//! A loaded library stays open exactly as long as handles to it exist.

mod abi;
mod error;
mod manifest;
mod registry;

pub use abi::{
    EngineBox, EngineCapability, GenerateRequest, TokenSink, ABI_VERSION_SYMBOL,
    ENGINE_ABI_VERSION, FACTORY_SYMBOL,
};
pub use error::EngineError;
pub use manifest::{EngineSpec, VariantSpec, MANIFEST};
pub use registry::{EngineHandle, EngineRegistry};
