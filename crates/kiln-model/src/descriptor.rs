use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::{json, Map, Value};

use kiln_gguf::GgufMetadata;

use crate::error::ModelError;
use crate::TENSORRT_ENGINE;

/// The per-model configuration record.
///
/// Attributes fall into four groups: identity, inference (sampling)
/// parameters, load parameters and host compatibility. "Missing" numerics
/// and bools are explicit `Option`s; the YAML and wire forms omit them
/// rather than emitting sentinel values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelDescriptor {
    // ── identity ─────────────────────────────────────────────────────────────
    pub id: String,
    pub name: String,
    pub model: String,
    pub version: String,
    pub files: Vec<String>,
    /// Epoch seconds.
    pub created: u64,
    pub object: String,
    pub owned_by: String,

    // ── inference parameters ─────────────────────────────────────────────────
    pub stop: Vec<String>,
    pub stream: Option<bool>,
    pub top_p: Option<f32>,
    pub temperature: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_tokens: Option<i64>,
    /// `-1` keeps the historical "unset" convention on the YAML surface.
    pub seed: Option<i64>,
    pub dynatemp_range: f32,
    pub dynatemp_exponent: f32,
    pub top_k: i64,
    pub min_p: f32,
    pub tfs_z: f32,
    pub typ_p: f32,
    pub repeat_last_n: i64,
    pub repeat_penalty: f32,
    pub mirostat: bool,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
    pub penalize_nl: bool,
    pub ignore_eos: bool,
    pub n_probs: i64,
    pub min_keep: i64,
    pub grammar: String,

    // ── load parameters ──────────────────────────────────────────────────────
    pub engine: String,
    pub prompt_template: String,
    pub system_template: String,
    pub user_template: String,
    pub ai_template: String,
    pub ctx_len: Option<i64>,
    pub ngl: Option<i64>,
    pub tp: Option<i64>,
    pub precision: String,
    pub quantization_method: String,
    pub trtllm_version: String,

    // ── host compatibility ───────────────────────────────────────────────────
    pub os: String,
    pub gpu_arch: String,
    pub text_model: Option<bool>,

    /// Keys this build does not know about, preserved so that editing and
    /// re-writing a descriptor never loses information.
    #[serde(flatten)]
    pub extras: BTreeMap<String, serde_yaml::Value>,
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            model: String::new(),
            version: String::new(),
            files: Vec::new(),
            created: 0,
            object: "model".to_owned(),
            owned_by: String::new(),

            stop: Vec::new(),
            stream: None,
            top_p: None,
            temperature: None,
            frequency_penalty: None,
            presence_penalty: None,
            max_tokens: None,
            seed: None,
            dynatemp_range: 0.0,
            dynatemp_exponent: 1.0,
            top_k: 40,
            min_p: 0.05,
            tfs_z: 1.0,
            typ_p: 1.0,
            repeat_last_n: 64,
            repeat_penalty: 1.0,
            mirostat: false,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            penalize_nl: false,
            ignore_eos: false,
            n_probs: 0,
            min_keep: 0,
            grammar: String::new(),

            engine: String::new(),
            prompt_template: String::new(),
            system_template: String::new(),
            user_template: String::new(),
            ai_template: String::new(),
            ctx_len: None,
            ngl: None,
            tp: None,
            precision: String::new(),
            quantization_method: String::new(),
            trtllm_version: String::new(),

            os: String::new(),
            gpu_arch: String::new(),
            text_model: None,

            extras: BTreeMap::new(),
        }
    }
}

impl ModelDescriptor {
    // ── reading ──────────────────────────────────────────────────────────────

    /// Read a descriptor from its YAML file.
    pub fn read_yaml(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    // ── GGUF synthesis ───────────────────────────────────────────────────────

    /// Build a descriptor from a parsed GGUF header.
    ///
    /// `id` becomes the catalog key and `model_path` lands in `files`.
    pub fn from_gguf(meta: &GgufMetadata, id: &str, model_path: &str) -> Self {
        let mut descriptor = Self {
            id: id.to_owned(),
            name: id.to_owned(),
            model: id.to_owned(),
            created: epoch_seconds(),
            files: vec![model_path.to_owned()],
            engine: "llamacpp".to_owned(),
            ..Self::default()
        };
        descriptor.update_from_gguf(meta);
        descriptor
    }

    /// Merge parsed GGUF metadata into this descriptor.
    ///
    /// Explicit (already set) values win: a re-parse never clobbers fields a
    /// user edited in the YAML.
    pub fn update_from_gguf(&mut self, meta: &GgufMetadata) {
        if self.model.is_empty() {
            if let Some(name) = meta.model_name() {
                self.model = name.to_owned();
            }
        }
        if self.version.is_empty() {
            if let Some(v) = meta.get_str("general.version") {
                self.version = v.to_owned();
            }
        }
        if self.ctx_len.is_none() {
            self.ctx_len = meta.context_length().map(|v| v as i64);
        }
        if self.max_tokens.is_none() {
            self.max_tokens = self.ctx_len;
        }
        if self.prompt_template.is_empty() {
            if let Some(t) = meta.prompt_template() {
                self.prompt_template = t;
            }
        }
        if self.quantization_method.is_empty() {
            if let Some(q) = meta.quantization() {
                self.quantization_method = q;
            }
        }
        if self.text_model.is_none() {
            self.text_model = Some(meta.is_text_model());
        }
        if self.stop.is_empty() {
            if let Some(eos) = meta.eos_token_id().and_then(|id| meta.token_text(id)) {
                self.stop.push(eos.to_owned());
            }
        }
    }

    // ── writing ──────────────────────────────────────────────────────────────

    /// Write the canonical, sectioned, comment-annotated YAML form.
    pub fn write_yaml(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml_string())?;
        Ok(())
    }

    /// Render the canonical YAML text.
    pub fn to_yaml_string(&self) -> String {
        let mut out = String::new();

        out.push_str("# BEGIN GENERAL GGUF METADATA\n");
        kv_str(&mut out, "id", &self.id);
        kv_str(&mut out, "name", &self.name);
        kv_str(&mut out, "model", &self.model);
        kv_str(&mut out, "version", &self.version);
        kv_list(&mut out, "files", &self.files);
        if self.created > 0 {
            let _ = writeln!(out, "created: {}", self.created);
        }
        kv_str(&mut out, "object", &self.object);
        kv_str(&mut out, "owned_by", &self.owned_by);
        out.push_str("# END GENERAL GGUF METADATA\n\n");

        out.push_str("# BEGIN INFERENCE PARAMETERS\n");
        out.push_str("# BEGIN REQUIRED\n");
        kv_list(&mut out, "stop", &self.stop);
        out.push_str("# END REQUIRED\n");
        out.push_str("# BEGIN OPTIONAL\n");
        kv_opt(&mut out, "stream", self.stream);
        kv_opt(&mut out, "top_p", self.top_p);
        kv_opt(&mut out, "temperature", self.temperature);
        kv_opt(&mut out, "frequency_penalty", self.frequency_penalty);
        kv_opt(&mut out, "presence_penalty", self.presence_penalty);
        kv_opt(&mut out, "max_tokens", self.max_tokens);
        if let Some(seed) = self.seed {
            if seed != -1 {
                let _ = writeln!(out, "seed: {seed}");
            }
        }
        let _ = writeln!(out, "dynatemp_range: {}", self.dynatemp_range);
        let _ = writeln!(out, "dynatemp_exponent: {}", self.dynatemp_exponent);
        let _ = writeln!(out, "top_k: {}", self.top_k);
        let _ = writeln!(out, "min_p: {}", self.min_p);
        let _ = writeln!(out, "tfs_z: {}", self.tfs_z);
        let _ = writeln!(out, "typ_p: {}", self.typ_p);
        let _ = writeln!(out, "repeat_last_n: {}", self.repeat_last_n);
        let _ = writeln!(out, "repeat_penalty: {}", self.repeat_penalty);
        let _ = writeln!(out, "mirostat: {}", self.mirostat);
        let _ = writeln!(out, "mirostat_tau: {}", self.mirostat_tau);
        let _ = writeln!(out, "mirostat_eta: {}", self.mirostat_eta);
        let _ = writeln!(out, "penalize_nl: {}", self.penalize_nl);
        let _ = writeln!(out, "ignore_eos: {}", self.ignore_eos);
        let _ = writeln!(out, "n_probs: {}", self.n_probs);
        let _ = writeln!(out, "min_keep: {}", self.min_keep);
        kv_str(&mut out, "grammar", &self.grammar);
        out.push_str("# END OPTIONAL\n");
        out.push_str("# END INFERENCE PARAMETERS\n\n");

        out.push_str("# BEGIN MODEL LOAD PARAMETERS\n");
        out.push_str("# BEGIN REQUIRED\n");
        kv_str(&mut out, "engine", &self.engine);
        kv_str(&mut out, "prompt_template", &self.prompt_template);
        out.push_str("# END REQUIRED\n");
        out.push_str("# BEGIN OPTIONAL\n");
        kv_str(&mut out, "system_template", &self.system_template);
        kv_str(&mut out, "user_template", &self.user_template);
        kv_str(&mut out, "ai_template", &self.ai_template);
        kv_opt(&mut out, "ctx_len", self.ctx_len);
        kv_opt(&mut out, "ngl", self.ngl);
        if self.engine == TENSORRT_ENGINE {
            kv_opt(&mut out, "tp", self.tp);
            kv_str(&mut out, "trtllm_version", &self.trtllm_version);
        }
        kv_str(&mut out, "precision", &self.precision);
        kv_str(&mut out, "quantization_method", &self.quantization_method);
        out.push_str("# END OPTIONAL\n");
        out.push_str("# END MODEL LOAD PARAMETERS\n\n");

        out.push_str("# BEGIN HOST COMPATIBILITY\n");
        kv_str(&mut out, "os", &self.os);
        kv_str(&mut out, "gpu_arch", &self.gpu_arch);
        kv_opt(&mut out, "text_model", self.text_model);
        out.push_str("# END HOST COMPATIBILITY\n");

        if !self.extras.is_empty() {
            out.push('\n');
            out.push_str("# BEGIN UNRECOGNIZED\n");
            if let Ok(rendered) = serde_yaml::to_string(&self.extras) {
                out.push_str(&rendered);
            }
            out.push_str("# END UNRECOGNIZED\n");
        }

        out
    }

    // ── wire form ────────────────────────────────────────────────────────────

    /// JSON wire form. Unset optionals are omitted; `trtllm_version` and
    /// `tp` appear only under the TensorRT-LLM engine.
    pub fn to_wire(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".into(), json!(self.id));
        obj.insert("name".into(), json!(self.name));
        obj.insert("model".into(), json!(self.model));
        obj.insert("version".into(), json!(self.version));
        obj.insert("stop".into(), json!(self.stop));
        wire_opt(&mut obj, "stream", self.stream.map(Value::from));
        wire_opt(&mut obj, "top_p", self.top_p.map(f32_value));
        wire_opt(&mut obj, "temperature", self.temperature.map(f32_value));
        wire_opt(
            &mut obj,
            "frequency_penalty",
            self.frequency_penalty.map(f32_value),
        );
        wire_opt(
            &mut obj,
            "presence_penalty",
            self.presence_penalty.map(f32_value),
        );
        wire_opt(&mut obj, "max_tokens", self.max_tokens.map(Value::from));
        wire_opt(
            &mut obj,
            "seed",
            self.seed.filter(|s| *s != -1).map(Value::from),
        );
        obj.insert("dynatemp_range".into(), f32_value(self.dynatemp_range));
        obj.insert(
            "dynatemp_exponent".into(),
            f32_value(self.dynatemp_exponent),
        );
        obj.insert("top_k".into(), json!(self.top_k));
        obj.insert("min_p".into(), f32_value(self.min_p));
        obj.insert("tfs_z".into(), f32_value(self.tfs_z));
        obj.insert("typ_p".into(), f32_value(self.typ_p));
        obj.insert("repeat_last_n".into(), json!(self.repeat_last_n));
        obj.insert("repeat_penalty".into(), f32_value(self.repeat_penalty));
        obj.insert("mirostat".into(), json!(self.mirostat));
        obj.insert("mirostat_tau".into(), f32_value(self.mirostat_tau));
        obj.insert("mirostat_eta".into(), f32_value(self.mirostat_eta));
        obj.insert("penalize_nl".into(), json!(self.penalize_nl));
        obj.insert("ignore_eos".into(), json!(self.ignore_eos));
        obj.insert("n_probs".into(), json!(self.n_probs));
        obj.insert("min_keep".into(), json!(self.min_keep));
        wire_opt_str(&mut obj, "grammar", &self.grammar);

        obj.insert("engine".into(), json!(self.engine));
        wire_opt_str(&mut obj, "prompt_template", &self.prompt_template);
        wire_opt_str(&mut obj, "system_template", &self.system_template);
        wire_opt_str(&mut obj, "user_template", &self.user_template);
        wire_opt_str(&mut obj, "ai_template", &self.ai_template);
        wire_opt(&mut obj, "ctx_len", self.ctx_len.map(Value::from));
        wire_opt(&mut obj, "ngl", self.ngl.map(Value::from));
        wire_opt_str(&mut obj, "precision", &self.precision);
        wire_opt_str(&mut obj, "quantization_method", &self.quantization_method);

        wire_opt_str(&mut obj, "os", &self.os);
        wire_opt_str(&mut obj, "gpu_arch", &self.gpu_arch);
        wire_opt(&mut obj, "text_model", self.text_model.map(Value::from));

        obj.insert("files".into(), json!(self.files));
        obj.insert("created".into(), json!(self.created));
        obj.insert("object".into(), json!(self.object));
        obj.insert("owned_by".into(), json!(self.owned_by));

        if self.engine == TENSORRT_ENGINE {
            obj.insert("trtllm_version".into(), json!(self.trtllm_version));
            wire_opt(&mut obj, "tp", self.tp.map(Value::from));
        }

        Value::Object(obj)
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn f32_value(v: f32) -> Value {
    // f32 → f64 via string keeps 0.05 reading back as 0.05, not 0.05000000074.
    serde_json::Number::from_f64(
        v.to_string().parse::<f64>().unwrap_or(f64::from(v)),
    )
    .map(Value::Number)
    .unwrap_or(Value::Null)
}

fn wire_opt(obj: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        obj.insert(key.to_owned(), v);
    }
}

fn wire_opt_str(obj: &mut Map<String, Value>, key: &str, value: &str) {
    if !value.is_empty() {
        obj.insert(key.to_owned(), json!(value));
    }
}

// ── YAML rendering helpers ────────────────────────────────────────────────────

fn yaml_scalar(s: &str) -> String {
    // serde_yaml decides quoting/escaping; strip its trailing newline.
    serde_yaml::to_string(s)
        .map(|v| v.trim_end().to_owned())
        .unwrap_or_else(|_| format!("{s:?}"))
}

fn kv_str(out: &mut String, key: &str, value: &str) {
    if !value.is_empty() {
        let _ = writeln!(out, "{key}: {}", yaml_scalar(value));
    }
}

fn kv_list(out: &mut String, key: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    let _ = writeln!(out, "{key}:");
    for v in values {
        let _ = writeln!(out, "  - {}", yaml_scalar(v));
    }
}

fn kv_opt<T: std::fmt::Display>(out: &mut String, key: &str, value: Option<T>) {
    if let Some(v) = value {
        let _ = writeln!(out, "{key}: {v}");
    }
}
