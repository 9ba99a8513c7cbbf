//! Hugging Face repository resolution.
//!
//! Turns a user handle (`name`, `owner/repo`, `owner/repo:branch`) into
//! branch listings, file listings and finally a [`DownloadTask`] rooted
//! under the data root. Curated short names resolve through the `cortexso`
//! namespace.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use kiln_types::{DownloadItem, DownloadTask, ModelHandle};

/// The upstream namespace that maps short handles to owner/repo pairs.
pub const CURATED_OWNER: &str = "cortexso";

const HF_ENDPOINT: &str = "https://huggingface.co";

#[derive(Debug, Error)]
pub enum HubError {
    #[error("network error talking to the hub: {0}")]
    Network(#[from] reqwest::Error),

    #[error("repository not found: {0}")]
    RepoNotFound(String),

    #[error("branch {branch:?} has no downloadable files in {repo}")]
    EmptyBranch { repo: String, branch: String },
}

/// One branch of a model repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    #[serde(rename = "ref")]
    pub r#ref: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RefsResponse {
    #[serde(default)]
    branches: Vec<BranchInfo>,
}

/// One entry of a repository tree listing.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoFile {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
}

/// Build the direct download URL for one file of a repository.
///
/// `branch` defaults to `main`.
pub fn get_downloadable_url(owner: &str, repo: &str, file: &str, branch: Option<&str>) -> String {
    format!(
        "{HF_ENDPOINT}/{owner}/{repo}/resolve/{}/{file}",
        branch.unwrap_or("main")
    )
}

/// Client for the hub's REST surface.
#[derive(Clone)]
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
}

impl Default for HubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HubClient {
    pub fn new() -> Self {
        Self::with_endpoint(HF_ENDPOINT)
    }

    /// Point the client at a different hub host (tests).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Resolve a curated short name to its owner.
    pub fn owner_of(handle: &ModelHandle) -> &str {
        handle.owner.as_deref().unwrap_or(CURATED_OWNER)
    }

    /// Enumerate the branches of a repository.
    pub async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<BranchInfo>, HubError> {
        let url = format!("{}/api/models/{owner}/{repo}/refs", self.endpoint);
        debug!(%url, "listing branches");
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HubError::RepoNotFound(format!("{owner}/{repo}")));
        }
        let refs: RefsResponse = resp.error_for_status()?.json().await?;
        Ok(refs.branches)
    }

    /// List the files on one branch of a repository.
    pub async fn list_files(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<RepoFile>, HubError> {
        let url = format!(
            "{}/api/models/{owner}/{repo}/tree/{branch}",
            self.endpoint
        );
        debug!(%url, "listing files");
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HubError::RepoNotFound(format!("{owner}/{repo}:{branch}")));
        }
        let files: Vec<RepoFile> = resp.error_for_status()?.json().await?;
        Ok(files)
    }

    /// Produce the [`DownloadTask`] that fetches a model into
    /// `models_dir/<file_stem>/`.
    ///
    /// Dot-files and repository documentation are not model artifacts and
    /// are skipped.
    pub async fn download_task(
        &self,
        handle: &ModelHandle,
        models_dir: &Path,
    ) -> Result<DownloadTask, HubError> {
        let owner = Self::owner_of(handle);
        let repo = handle.name.as_str();
        let stem = handle.file_stem();

        let files = self.list_files(owner, repo, &handle.branch).await?;
        let target_dir = models_dir.join(&stem);

        let items: Vec<DownloadItem> = files
            .into_iter()
            .filter(|f| f.kind == "file")
            .filter(|f| !is_repo_noise(&f.path))
            .map(|f| {
                let mut item = DownloadItem::new(
                    self.download_url(owner, repo, &f.path, &handle.branch),
                    target_dir.join(&f.path),
                );
                if f.size > 0 {
                    item.expected_bytes = Some(f.size);
                }
                item
            })
            .collect();

        if items.is_empty() {
            return Err(HubError::EmptyBranch {
                repo: format!("{owner}/{repo}"),
                branch: handle.branch.clone(),
            });
        }

        Ok(DownloadTask::new(stem, items))
    }

    /// Endpoint-aware variant of [`get_downloadable_url`].
    pub fn download_url(&self, owner: &str, repo: &str, file: &str, branch: &str) -> String {
        format!("{}/{owner}/{repo}/resolve/{branch}/{file}", self.endpoint)
    }
}

fn is_repo_noise(path: &str) -> bool {
    path.starts_with('.') || path.eq_ignore_ascii_case("README.md")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::net::SocketAddr;

    #[test]
    fn downloadable_url_defaults_to_main() {
        let url = get_downloadable_url(
            "pervll",
            "bge-reranker-v2-gemma-Q4_K_M-GGUF",
            "bge-reranker-v2-gemma-q4_k_m.gguf",
            None,
        );
        assert_eq!(
            url,
            "https://huggingface.co/pervll/bge-reranker-v2-gemma-Q4_K_M-GGUF/resolve/main/bge-reranker-v2-gemma-q4_k_m.gguf"
        );
    }

    #[test]
    fn downloadable_url_with_branch_replaces_main() {
        let url = get_downloadable_url(
            "pervll",
            "bge-reranker-v2-gemma-Q4_K_M-GGUF",
            "bge-reranker-v2-gemma-q4_k_m.gguf",
            Some("1b-gguf"),
        );
        assert_eq!(
            url,
            "https://huggingface.co/pervll/bge-reranker-v2-gemma-Q4_K_M-GGUF/resolve/1b-gguf/bge-reranker-v2-gemma-q4_k_m.gguf"
        );
    }

    #[test]
    fn refs_response_parses_branch_refs() {
        // Shape returned by /api/models/cortexso/tinyllama/refs.
        let raw = serde_json::json!({
            "branches": [
                { "name": "gguf", "ref": "refs/heads/gguf", "targetCommit": "aaa" },
                { "name": "1b-gguf", "ref": "refs/heads/1b-gguf", "targetCommit": "bbb" },
                { "name": "main", "ref": "refs/heads/main", "targetCommit": "ccc" }
            ],
            "converts": []
        });
        let refs: RefsResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(refs.branches.len(), 3);
        assert_eq!(refs.branches[0].name, "gguf");
        assert_eq!(refs.branches[0].r#ref, "refs/heads/gguf");
        assert_eq!(refs.branches[1].name, "1b-gguf");
        assert_eq!(refs.branches[1].r#ref, "refs/heads/1b-gguf");
        assert_eq!(refs.branches[2].name, "main");
        assert_eq!(refs.branches[2].r#ref, "refs/heads/main");
    }

    async fn spawn_hub_fixture() -> SocketAddr {
        let app = Router::new()
            .route(
                "/api/models/cortexso/tinyllama/refs",
                get(|| async {
                    Json(serde_json::json!({
                        "branches": [
                            { "name": "gguf", "ref": "refs/heads/gguf" },
                            { "name": "1b-gguf", "ref": "refs/heads/1b-gguf" },
                            { "name": "main", "ref": "refs/heads/main" }
                        ]
                    }))
                }),
            )
            .route(
                "/api/models/cortexso/tinyllama/tree/1b-gguf",
                get(|| async {
                    Json(serde_json::json!([
                        { "type": "file", "path": "tinyllama-1b.gguf", "size": 1024 },
                        { "type": "file", "path": "model.yaml", "size": 256 },
                        { "type": "file", "path": ".gitattributes", "size": 10 },
                        { "type": "file", "path": "README.md", "size": 10 },
                        { "type": "directory", "path": "extra" }
                    ]))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn branch_enumeration_over_http() {
        let addr = spawn_hub_fixture().await;
        let client = HubClient::with_endpoint(format!("http://{addr}"));
        let branches = client.list_branches("cortexso", "tinyllama").await.unwrap();
        let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["gguf", "1b-gguf", "main"]);
        for b in &branches {
            assert_eq!(b.r#ref, format!("refs/heads/{}", b.name));
        }
    }

    #[tokio::test]
    async fn unknown_repo_is_not_found() {
        let addr = spawn_hub_fixture().await;
        let client = HubClient::with_endpoint(format!("http://{addr}"));
        let err = client.list_branches("nobody", "nothing").await.unwrap_err();
        assert!(matches!(err, HubError::RepoNotFound(_)));
    }

    #[tokio::test]
    async fn download_task_targets_the_file_stem_directory() {
        let addr = spawn_hub_fixture().await;
        let dir = tempfile::tempdir().unwrap();
        let client = HubClient::with_endpoint(format!("http://{addr}"));

        let handle: ModelHandle = "cortexso/tinyllama:1b-gguf".parse().unwrap();
        let task = client.download_task(&handle, dir.path()).await.unwrap();

        assert_eq!(task.id, "tinyllama-1b-gguf");
        let paths: Vec<_> = task
            .items
            .iter()
            .map(|i| i.local_path.strip_prefix(dir.path()).unwrap().to_owned())
            .collect();
        assert_eq!(
            paths,
            vec![
                Path::new("tinyllama-1b-gguf/tinyllama-1b.gguf").to_owned(),
                Path::new("tinyllama-1b-gguf/model.yaml").to_owned(),
            ]
        );
        assert_eq!(task.items[0].expected_bytes, Some(1024));
        assert!(task.items[0]
            .url
            .ends_with("/cortexso/tinyllama/resolve/1b-gguf/tinyllama-1b.gguf"));
    }

    #[tokio::test]
    async fn curated_short_name_resolves_through_cortexso() {
        let addr = spawn_hub_fixture().await;
        let dir = tempfile::tempdir().unwrap();
        let client = HubClient::with_endpoint(format!("http://{addr}"));

        let handle: ModelHandle = "tinyllama:1b-gguf".parse().unwrap();
        assert_eq!(HubClient::owner_of(&handle), "cortexso");
        let task = client.download_task(&handle, dir.path()).await.unwrap();
        assert_eq!(task.id, "tinyllama-1b-gguf");
    }
}
