//! Shared server state: the service plane plus the in-process engine
//! runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::info;

use kiln_core::{CoreError, Kiln};
use kiln_engines::{EngineHandle, GenerateRequest, TokenSink};

/// State shared across all HTTP handlers.
pub struct AppState {
    pub kiln: Arc<Kiln>,
    pub runtime: ModelRuntime,
}

impl AppState {
    pub fn new(kiln: Arc<Kiln>) -> Self {
        Self {
            kiln,
            runtime: ModelRuntime::default(),
        }
    }
}

/// Loaded engine libraries, keyed by engine name.
///
/// Handles are shared: every loaded model on the same engine uses one
/// library instance, and the library stays open while any handle is live.
#[derive(Default)]
pub struct ModelRuntime {
    engines: Mutex<HashMap<String, Arc<EngineHandle>>>,
}

impl ModelRuntime {
    /// Fetch (or load) the capability handle for an engine.
    pub fn engine_for(&self, kiln: &Kiln, engine_name: &str) -> Result<Arc<EngineHandle>, CoreError> {
        let mut engines = self.engines.lock().unwrap();
        if let Some(handle) = engines.get(engine_name) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(kiln.load_engine(engine_name)?);
        info!(engine = engine_name, "engine loaded into runtime");
        engines.insert(engine_name.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Load a model into its engine.
    pub fn start_model(&self, kiln: &Kiln, model_id: &str) -> Result<(), CoreError> {
        let entry = kiln
            .catalog()
            .resolve(model_id)
            .ok_or_else(|| kiln_model::ModelError::NotFound(model_id.to_owned()))?;
        let descriptor = kiln.read_descriptor(&entry)?;
        let handle = self.engine_for(kiln, &descriptor.engine)?;
        handle
            .load_model(&descriptor)
            .map_err(|message| engine_op_error(&descriptor.engine, message))?;
        info!(model_id = %entry.model_id, engine = %descriptor.engine, "model started");
        Ok(())
    }

    /// Unload a model from its engine. Unknown models are an ack.
    pub fn stop_model(&self, kiln: &Kiln, model_id: &str) -> Result<(), CoreError> {
        let Some(entry) = kiln.catalog().resolve(model_id) else {
            return Ok(());
        };
        let Ok(descriptor) = kiln.read_descriptor(&entry) else {
            return Ok(());
        };
        let engines = self.engines.lock().unwrap();
        if let Some(handle) = engines.get(&descriptor.engine) {
            handle
                .unload_model(&entry.model_id)
                .map_err(|message| engine_op_error(&descriptor.engine, message))?;
        }
        Ok(())
    }

    /// Whether a model is currently loaded in its engine.
    pub fn is_loaded(&self, kiln: &Kiln, model_id: &str) -> bool {
        let Some(entry) = kiln.catalog().resolve(model_id) else {
            return false;
        };
        let Ok(descriptor) = kiln.read_descriptor(&entry) else {
            return false;
        };
        let engines = self.engines.lock().unwrap();
        engines
            .get(&descriptor.engine)
            .map(|handle| handle.is_loaded(&entry.model_id))
            .unwrap_or(false)
    }

    /// Kick off generation on the engine's thread; tokens arrive on the
    /// returned receiver. Dropping the receiver cancels generation.
    pub fn generate(
        &self,
        kiln: &Kiln,
        model_id: &str,
        prompt: String,
        options: serde_json::Value,
    ) -> Result<mpsc::Receiver<String>, CoreError> {
        let entry = kiln
            .catalog()
            .resolve(model_id)
            .ok_or_else(|| kiln_model::ModelError::NotFound(model_id.to_owned()))?;
        let descriptor = kiln.read_descriptor(&entry)?;
        let handle = self.engine_for(kiln, &descriptor.engine)?;

        let (sink, rx) = TokenSink::channel(64);
        let request = GenerateRequest {
            model_id: entry.model_id,
            prompt,
            options,
        };
        tokio::task::spawn_blocking(move || {
            handle.generate(request, sink);
        });
        Ok(rx)
    }
}

fn engine_op_error(engine: &str, message: String) -> CoreError {
    CoreError::Engine(kiln_engines::EngineError::LoadFailed {
        name: engine.to_owned(),
        message,
    })
}
