//! The capability contract between the daemon and a loaded engine library.
//!
//! An engine plugin exports two symbols:
//!
//! - `kiln_engine_abi_version() -> u32` — handshake; the registry refuses
//!   libraries whose version differs from [`ENGINE_ABI_VERSION`].
//! - `get_engine() -> *mut EngineBox` — factory; ownership of the box moves
//!   to the caller.
//!
//! Plugins are Rust cdylibs compiled against this crate, so the capability
//! crosses the boundary as a plain trait object inside [`EngineBox`]; only
//! the two entry points use the C ABI.

use tokio::sync::mpsc;

use kiln_model::ModelDescriptor;

/// Bumped whenever [`EngineCapability`] or [`EngineBox`] changes shape.
pub const ENGINE_ABI_VERSION: u32 = 1;

/// Name of the handshake symbol, `extern "C" fn() -> u32`.
pub const ABI_VERSION_SYMBOL: &[u8] = b"kiln_engine_abi_version";

/// Name of the factory symbol, `extern "C" fn() -> *mut EngineBox`.
pub const FACTORY_SYMBOL: &[u8] = b"get_engine";

/// One generation request handed to an engine.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model_id: String,
    pub prompt: String,
    /// Raw sampling overrides merged over the descriptor's defaults.
    pub options: serde_json::Value,
}

/// Where an engine streams its tokens.
///
/// The engine calls [`TokenSink::send`] from its own thread. A `false`
/// return means the receiver was dropped — that is the cancellation signal,
/// and the engine should stop generating.
pub struct TokenSink {
    tx: mpsc::Sender<String>,
}

impl TokenSink {
    /// Create a sink and the receiver the server side reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Deliver one token. Blocks the engine thread when the consumer lags;
    /// returns `false` once the consumer is gone.
    pub fn send(&self, token: impl Into<String>) -> bool {
        self.tx.blocking_send(token.into()).is_ok()
    }

    /// True once the consumer has hung up.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What the daemon expects from a loaded engine.
pub trait EngineCapability: Send + Sync {
    /// Load (or reload) a model described by `descriptor`.
    fn load_model(&self, descriptor: &ModelDescriptor) -> Result<(), String>;

    /// Unload a previously loaded model. Unknown ids are an ack, not an
    /// error.
    fn unload_model(&self, model_id: &str) -> Result<(), String>;

    fn is_loaded(&self, model_id: &str) -> bool;

    /// Stream tokens for `request` into `sink` from the engine's thread.
    /// Cancellation is signalled by the sink closing.
    fn generate(&self, request: GenerateRequest, sink: TokenSink);

    /// Sidecar hook for the Python engine variant; everything else rejects.
    fn execute_python_file(
        &self,
        _argv0: &str,
        _script: &str,
        _py_home: &str,
    ) -> Result<(), String> {
        Err("this engine does not execute python files".to_owned())
    }
}

/// The concrete value a plugin's `get_engine` returns.
///
/// Kept as a struct (not a bare fat pointer) so the factory symbol has a
/// thin, FFI-clean return type.
pub struct EngineBox {
    pub engine: Box<dyn EngineCapability>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;
    impl EngineCapability for Null {
        fn load_model(&self, _d: &ModelDescriptor) -> Result<(), String> {
            Ok(())
        }
        fn unload_model(&self, _id: &str) -> Result<(), String> {
            Ok(())
        }
        fn is_loaded(&self, _id: &str) -> bool {
            false
        }
        fn generate(&self, _req: GenerateRequest, sink: TokenSink) {
            for t in ["a", "b", "c"] {
                if !sink.send(t) {
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn sink_delivers_tokens_in_order() {
        let (sink, mut rx) = TokenSink::channel(8);
        let engine = Null;
        let task = tokio::task::spawn_blocking(move || {
            engine.generate(
                GenerateRequest {
                    model_id: "m".into(),
                    prompt: "p".into(),
                    options: serde_json::Value::Null,
                },
                sink,
            );
        });

        let mut got = Vec::new();
        while let Some(t) = rx.recv().await {
            got.push(t);
        }
        task.await.unwrap();
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn dropping_the_receiver_cancels_generation() {
        let (sink, rx) = TokenSink::channel(1);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.send("ignored"));
    }

    #[test]
    fn python_execution_is_rejected_by_default() {
        let engine = Null;
        assert!(engine.execute_python_file("kiln", "s.py", "").is_err());
    }
}
