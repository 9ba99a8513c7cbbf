//! GGUF metadata header parsing.
//!
//! Reads the typed key/value header of a GGUF container — magic, version,
//! tensor count, kv count, then the records — and exposes the handful of
//! keys the daemon cares about: architecture, context length, chat template,
//! special tokens, quantization and embedding width. The parser never reads
//! tensor data and never writes to disk.

mod reader;
mod template;

pub use reader::{GgufError, GgufMetadata, GgufValue};
pub use template::prompt_template_from_chat;
