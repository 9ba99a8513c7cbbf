//! Model configuration descriptors and the persistent catalog.
//!
//! A [`ModelDescriptor`] is the per-model configuration record: identity,
//! sampling parameters, load parameters and host-compatibility hints. It
//! reads from the human-editable YAML form, writes the canonical annotated
//! form, and serializes to a wire JSON form with unset optionals omitted.
//!
//! The [`ModelCatalog`] is the durable inventory: one JSON-lines file under
//! the data root, rewritten atomically on every mutation, with id and alias
//! uniqueness enforced.

mod catalog;
mod descriptor;
mod error;

pub use catalog::ModelCatalog;
pub use descriptor::ModelDescriptor;
pub use error::ModelError;

/// The engine id whose descriptors carry TensorRT-specific fields.
pub const TENSORRT_ENGINE: &str = "cortex.tensorrt-llm";
