use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Default branch assumed when a handle carries none.
pub const DEFAULT_BRANCH: &str = "main";

/// Errors produced when parsing a user-typed model handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("empty model handle")]
    Empty,

    #[error("malformed model handle: {0:?}")]
    Malformed(String),
}

/// A user-typed model reference.
///
/// Accepted shapes:
/// - `name` — curated registry lookup (`cortexso/<name>`)
/// - `owner/repo`
/// - `owner/repo:branch`
///
/// The branch defaults to `main`. The *file stem* derived from a handle is
/// the canonical on-disk key: `repo` when the branch is `main`, otherwise
/// `repo-branch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    /// Repository owner. `None` for curated short names.
    pub owner: Option<String>,
    /// Repository (or curated model) name.
    pub name: String,
    /// Branch, `main` unless the handle says otherwise.
    pub branch: String,
}

impl ModelHandle {
    /// The canonical on-disk key for this handle.
    pub fn file_stem(&self) -> String {
        if self.branch == DEFAULT_BRANCH {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.branch)
        }
    }

    /// The engine a model on this branch is expected to run under.
    ///
    /// Branch naming follows the curated registry convention: branches
    /// carrying `onnx` or `tensorrt` weights say so in their name, and
    /// everything else is GGUF.
    pub fn engine_name(&self) -> &'static str {
        if self.branch.contains("onnx") {
            "cortex.onnx"
        } else if self.branch.contains("tensorrt") {
            "cortex.tensorrt-llm"
        } else {
            "cortex.llamacpp"
        }
    }

    /// True when the handle is a curated short name rather than `owner/repo`.
    pub fn is_curated(&self) -> bool {
        self.owner.is_none()
    }
}

impl FromStr for ModelHandle {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HandleError::Empty);
        }

        let (repo_part, branch) = match s.split_once(':') {
            Some((r, b)) if !b.is_empty() => (r, b.to_owned()),
            Some(_) => return Err(HandleError::Malformed(s.to_owned())),
            None => (s, DEFAULT_BRANCH.to_owned()),
        };

        let (owner, name) = match repo_part.split_once('/') {
            Some((o, n)) => {
                if o.is_empty() || n.is_empty() || n.contains('/') {
                    return Err(HandleError::Malformed(s.to_owned()));
                }
                (Some(o.to_owned()), n.to_owned())
            }
            None => (None, repo_part.to_owned()),
        };

        if name.is_empty() {
            return Err(HandleError::Malformed(s.to_owned()));
        }

        Ok(Self {
            owner,
            name,
            branch,
        })
    }
}

impl fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}/{}", owner, self.name)?,
            None => write!(f, "{}", self.name)?,
        }
        if self.branch != DEFAULT_BRANCH {
            write!(f, ":{}", self.branch)?;
        }
        Ok(())
    }
}
