use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use thiserror::Error;

use crate::template::prompt_template_from_chat;

/// `GGUF` little-endian.
const MAGIC: [u8; 4] = *b"GGUF";

/// Versions whose kv layout uses 64-bit lengths. Version 1 (32-bit lengths)
/// predates every model the curated registry ships and is rejected.
const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 2..=3;

#[derive(Debug, Error)]
pub enum GgufError {
    #[error("I/O error reading GGUF header: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a GGUF file (magic {found:02x?})")]
    BadMagic { found: [u8; 4] },

    #[error("unsupported GGUF version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown metadata value type {type_id} for key {key:?}")]
    UnknownValueType { key: String, type_id: u32 },

    #[error("metadata string is not UTF-8")]
    InvalidString(#[from] std::string::FromUtf8Error),

    #[error("unreasonable {what} length {len} in header")]
    ImplausibleLength { what: &'static str, len: u64 },
}

/// One typed metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    Array(Vec<GgufValue>),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl GgufValue {
    /// Widen any integer variant to u64.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            GgufValue::U8(v) => Some(u64::from(*v)),
            GgufValue::U16(v) => Some(u64::from(*v)),
            GgufValue::U32(v) => Some(u64::from(*v)),
            GgufValue::U64(v) => Some(*v),
            GgufValue::I8(v) if *v >= 0 => Some(*v as u64),
            GgufValue::I16(v) if *v >= 0 => Some(*v as u64),
            GgufValue::I32(v) if *v >= 0 => Some(*v as u64),
            GgufValue::I64(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GgufValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// The parsed header of one GGUF file.
#[derive(Debug, Clone)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub kv: BTreeMap<String, GgufValue>,
}

impl GgufMetadata {
    /// Parse the header of the file at `path`.
    pub fn read_file(path: &Path) -> Result<Self, GgufError> {
        let file = File::open(path)?;
        Self::read_from(&mut BufReader::new(file))
    }

    /// Parse a header from any reader positioned at byte zero.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, GgufError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(GgufError::BadMagic { found: magic });
        }

        let version = read_u32(reader)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(GgufError::UnsupportedVersion(version));
        }

        let tensor_count = read_u64(reader)?;
        let kv_count = read_u64(reader)?;
        if kv_count > 1 << 20 {
            return Err(GgufError::ImplausibleLength {
                what: "kv table",
                len: kv_count,
            });
        }

        let mut kv = BTreeMap::new();
        for _ in 0..kv_count {
            let key = read_string(reader)?;
            let type_id = read_u32(reader)?;
            let value = read_value(reader, type_id, &key)?;
            kv.insert(key, value);
        }

        Ok(Self {
            version,
            tensor_count,
            kv,
        })
    }

    // ── typed accessors ──────────────────────────────────────────────────────

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.kv.get(key).and_then(GgufValue::as_str)
    }

    pub fn get_uint(&self, key: &str) -> Option<u64> {
        self.kv.get(key).and_then(GgufValue::as_uint)
    }

    pub fn architecture(&self) -> Option<&str> {
        self.get_str("general.architecture")
    }

    pub fn model_name(&self) -> Option<&str> {
        self.get_str("general.name")
    }

    /// `<arch>.context_length`.
    pub fn context_length(&self) -> Option<u64> {
        let arch = self.architecture()?;
        self.get_uint(&format!("{arch}.context_length"))
    }

    /// `<arch>.embedding_length` — the model's hidden width.
    pub fn embedding_length(&self) -> Option<u64> {
        let arch = self.architecture()?;
        self.get_uint(&format!("{arch}.embedding_length"))
    }

    /// The raw jinja chat template, when the file ships one.
    pub fn chat_template(&self) -> Option<&str> {
        self.get_str("tokenizer.chat_template")
    }

    /// Chat template rendered into the daemon's `{system_message}` /
    /// `{prompt}` placeholder form, when the jinja source is recognized.
    pub fn prompt_template(&self) -> Option<String> {
        self.chat_template().and_then(prompt_template_from_chat)
    }

    pub fn eos_token_id(&self) -> Option<u64> {
        self.get_uint("tokenizer.ggml.eos_token_id")
    }

    pub fn bos_token_id(&self) -> Option<u64> {
        self.get_uint("tokenizer.ggml.bos_token_id")
    }

    /// Render a token id through `tokenizer.ggml.tokens`.
    pub fn token_text(&self, id: u64) -> Option<&str> {
        match self.kv.get("tokenizer.ggml.tokens")? {
            GgufValue::Array(tokens) => tokens.get(id as usize)?.as_str(),
            _ => None,
        }
    }

    /// Human label for `general.file_type` (the quantization scheme).
    pub fn quantization(&self) -> Option<String> {
        let ftype = self.get_uint("general.file_type")?;
        Some(
            match ftype {
                0 => "F32",
                1 => "F16",
                2 => "Q4_0",
                3 => "Q4_1",
                7 => "Q8_0",
                8 => "Q5_0",
                9 => "Q5_1",
                10 => "Q2_K",
                11 => "Q3_K_S",
                12 => "Q3_K_M",
                13 => "Q3_K_L",
                14 => "Q4_K_S",
                15 => "Q4_K_M",
                16 => "Q5_K_S",
                17 => "Q5_K_M",
                18 => "Q6_K",
                other => return Some(format!("unknown-{other}")),
            }
            .to_owned(),
        )
    }

    /// Generative text model, as opposed to an embedding/reranker encoder.
    pub fn is_text_model(&self) -> bool {
        !matches!(
            self.architecture(),
            Some("bert" | "nomic-bert" | "jina-bert-v2" | "t5encoder")
        )
    }
}

// ── primitive readers ─────────────────────────────────────────────────────────

fn read_u32<R: Read>(r: &mut R) -> Result<u32, GgufError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, GgufError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string<R: Read>(r: &mut R) -> Result<String, GgufError> {
    let len = read_u64(r)?;
    if len > 1 << 32 {
        return Err(GgufError::ImplausibleLength {
            what: "string",
            len,
        });
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

fn read_value<R: Read>(r: &mut R, type_id: u32, key: &str) -> Result<GgufValue, GgufError> {
    Ok(match type_id {
        0 => {
            let mut b = [0u8; 1];
            r.read_exact(&mut b)?;
            GgufValue::U8(b[0])
        }
        1 => {
            let mut b = [0u8; 1];
            r.read_exact(&mut b)?;
            GgufValue::I8(b[0] as i8)
        }
        2 => {
            let mut b = [0u8; 2];
            r.read_exact(&mut b)?;
            GgufValue::U16(u16::from_le_bytes(b))
        }
        3 => {
            let mut b = [0u8; 2];
            r.read_exact(&mut b)?;
            GgufValue::I16(i16::from_le_bytes(b))
        }
        4 => GgufValue::U32(read_u32(r)?),
        5 => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            GgufValue::I32(i32::from_le_bytes(b))
        }
        6 => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            GgufValue::F32(f32::from_le_bytes(b))
        }
        7 => {
            let mut b = [0u8; 1];
            r.read_exact(&mut b)?;
            GgufValue::Bool(b[0] != 0)
        }
        8 => GgufValue::String(read_string(r)?),
        9 => {
            let elem_type = read_u32(r)?;
            let count = read_u64(r)?;
            if count > 1 << 28 {
                return Err(GgufError::ImplausibleLength {
                    what: "array",
                    len: count,
                });
            }
            let mut items = Vec::with_capacity(count.min(1 << 16) as usize);
            for _ in 0..count {
                items.push(read_value(r, elem_type, key)?);
            }
            GgufValue::Array(items)
        }
        10 => GgufValue::U64(read_u64(r)?),
        11 => {
            let mut b = [0u8; 8];
            r.read_exact(&mut b)?;
            GgufValue::I64(i64::from_le_bytes(b))
        }
        12 => {
            let mut b = [0u8; 8];
            r.read_exact(&mut b)?;
            GgufValue::F64(f64::from_le_bytes(b))
        }
        other => {
            return Err(GgufError::UnknownValueType {
                key: key.to_owned(),
                type_id: other,
            })
        }
    })
}
