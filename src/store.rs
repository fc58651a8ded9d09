//! ==============================================================================
//! store.rs - reading store port
//! ==============================================================================
//!
//! purpose:
//!     read/replace access to the two reading tables. the backing store has no
//!     append or patch primitive, so every mutation is load -> modify -> save
//!     of the whole table.
//!
//!     every load hands back a version token. passing it to save turns the
//!     write into a conditional one: if somebody else saved in between, the
//!     save fails with Conflict instead of silently dropping their rows.
//!
//! backends:
//!     - MemoryStore: in-process blobs (local runs, tests)
//!     - GistStore:   github gist api, one gist file per table
//!
//! relationships:
//!     - used by: service.rs
//!     - uses: table.rs (csv codec)
//!
//! ==============================================================================

use crate::config::{BlobConfig, StoreConfig};
use crate::domain::Provenance;
use crate::table::{Table, TableError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::Mutex;

/// names one of the two persisted tables
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetId {
    Manual,
    Automated,
}

impl DatasetId {
    pub fn provenance(self) -> Provenance {
        match self {
            DatasetId::Manual => Provenance::Manual,
            DatasetId::Automated => Provenance::Automated,
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetId::Manual => write!(f, "manual"),
            DatasetId::Automated => write!(f, "automated"),
        }
    }
}

/// opaque token identifying one saved revision of a table
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub String);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// a table as loaded, with the revision it was read at
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub table: Table,
    pub version: Version,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// transport or auth failure talking to the backing store
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// persisted content is not a readable table
    #[error("store content malformed: {0}")]
    Malformed(String),
    /// the table changed since it was loaded
    #[error("{dataset} changed since it was loaded (expected version {expected}, found {found})")]
    Conflict {
        dataset: DatasetId,
        expected: Version,
        found: Version,
    },
}

impl From<TableError> for StoreError {
    fn from(e: TableError) -> Self {
        StoreError::Malformed(e.to_string())
    }
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// fetch the full current contents of a table
    async fn load(&self, dataset: DatasetId) -> Result<Snapshot, StoreError>;

    /// replace the full contents of a table.
    /// with `expected` set, fails with Conflict unless the stored version still matches.
    async fn save(
        &self,
        dataset: DatasetId,
        table: &Table,
        expected: Option<&Version>,
    ) -> Result<Version, StoreError>;
}

// ==============================================================================
// memory store
// ==============================================================================

struct MemoryBlob {
    content: String,
    revision: u64,
}

/// blobs held in process. content is kept as rendered csv so loads go
/// through the same parse path as a remote store.
pub struct MemoryStore {
    blobs: Mutex<HashMap<DatasetId, MemoryBlob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// store seeded with header-only tables for both sources
    pub fn with_default_tables() -> Self {
        let blobs = [DatasetId::Manual, DatasetId::Automated]
            .into_iter()
            .map(|dataset| {
                let table = Table::with_columns(dataset.provenance().columns());
                let blob = MemoryBlob {
                    content: table.render(),
                    revision: 0,
                };
                (dataset, blob)
            })
            .collect();
        Self {
            blobs: Mutex::new(blobs),
        }
    }

    /// overwrite raw content, bypassing the codec
    pub async fn put_raw(&self, dataset: DatasetId, content: impl Into<String>) {
        let mut blobs = self.blobs.lock().await;
        let revision = blobs.get(&dataset).map(|b| b.revision + 1).unwrap_or(0);
        blobs.insert(
            dataset,
            MemoryBlob {
                content: content.into(),
                revision,
            },
        );
    }

    /// raw content as last saved
    pub async fn raw(&self, dataset: DatasetId) -> Option<String> {
        self.blobs
            .lock()
            .await
            .get(&dataset)
            .map(|b| b.content.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn load(&self, dataset: DatasetId) -> Result<Snapshot, StoreError> {
        let blobs = self.blobs.lock().await;
        let (content, revision) = blobs
            .get(&dataset)
            .map(|b| (b.content.as_str(), b.revision))
            .unwrap_or(("", 0));
        Ok(Snapshot {
            table: Table::parse(content)?,
            version: Version(revision.to_string()),
        })
    }

    async fn save(
        &self,
        dataset: DatasetId,
        table: &Table,
        expected: Option<&Version>,
    ) -> Result<Version, StoreError> {
        let mut blobs = self.blobs.lock().await;
        let current = blobs.get(&dataset).map(|b| b.revision).unwrap_or(0);
        let current_version = Version(current.to_string());
        if let Some(expected) = expected {
            if *expected != current_version {
                return Err(StoreError::Conflict {
                    dataset,
                    expected: expected.clone(),
                    found: current_version,
                });
            }
        }
        let revision = current + 1;
        blobs.insert(
            dataset,
            MemoryBlob {
                content: table.render(),
                revision,
            },
        );
        Ok(Version(revision.to_string()))
    }
}

// ==============================================================================
// gist store
// ==============================================================================
// each table lives in its own gist as a single csv file. the gist api returns
// the file content inline (or a raw_url when the file is too large) and a
// history list whose first entry is the current revision.

#[derive(Debug, Deserialize)]
struct GistResponse {
    #[serde(default)]
    files: HashMap<String, GistFile>,
    #[serde(default)]
    history: Vec<GistRevision>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    raw_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GistRevision {
    version: String,
}

/// where the file content of a gist response is
#[derive(Debug, PartialEq)]
enum GistContent {
    Inline(String),
    Raw(String),
    Missing,
}

fn gist_content(gist: &GistResponse, file_name: &str) -> Result<GistContent, StoreError> {
    let Some(file) = gist.files.get(file_name) else {
        return Ok(GistContent::Missing);
    };
    if file.truncated {
        return file
            .raw_url
            .clone()
            .map(GistContent::Raw)
            .ok_or_else(|| StoreError::Malformed(format!("{file_name} truncated without raw_url")));
    }
    Ok(GistContent::Inline(file.content.clone().unwrap_or_default()))
}

fn gist_version(gist: &GistResponse) -> Result<Version, StoreError> {
    gist.history
        .first()
        .map(|h| Version(h.version.clone()))
        .ok_or_else(|| StoreError::Malformed("gist has no history".to_string()))
}

pub struct GistStore {
    client: reqwest::Client,
    api_url: String,
    token: String,
    manual: BlobConfig,
    automated: BlobConfig,
}

impl GistStore {
    pub fn new(config: &StoreConfig, token: String) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("garden-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            manual: config.manual.clone(),
            automated: config.automated.clone(),
        })
    }

    fn blob(&self, dataset: DatasetId) -> &BlobConfig {
        match dataset {
            DatasetId::Manual => &self.manual,
            DatasetId::Automated => &self.automated,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer_auth(&self.token)
    }

    async fn fetch_gist(&self, dataset: DatasetId) -> Result<GistResponse, StoreError> {
        let url = format!("{}/gists/{}", self.api_url, self.blob(dataset).gist_id);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let response = ensure_success(response)?;
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| StoreError::Malformed(e.to_string()))
    }

    async fn fetch_raw(&self, url: &str) -> Result<String, StoreError> {
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        ensure_success(response)?
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(StoreError::Unavailable(format!(
            "{} returned {}",
            response.url(),
            status
        )))
    }
}

#[async_trait]
impl ReadingStore for GistStore {
    async fn load(&self, dataset: DatasetId) -> Result<Snapshot, StoreError> {
        let gist = self.fetch_gist(dataset).await?;
        let version = gist_version(&gist)?;
        let content = match gist_content(&gist, &self.blob(dataset).file_name)? {
            GistContent::Inline(text) => text,
            GistContent::Raw(url) => self.fetch_raw(&url).await?,
            GistContent::Missing => {
                tracing::warn!(%dataset, "gist has no {} file, treating as empty", self.blob(dataset).file_name);
                String::new()
            }
        };
        tracing::debug!(%dataset, %version, bytes = content.len(), "loaded table");
        Ok(Snapshot {
            table: Table::parse(&content)?,
            version,
        })
    }

    async fn save(
        &self,
        dataset: DatasetId,
        table: &Table,
        expected: Option<&Version>,
    ) -> Result<Version, StoreError> {
        // the gist api has no compare-and-swap; re-read the head revision and
        // refuse to write over a newer one. a writer landing between this
        // check and the patch below can still be lost.
        if let Some(expected) = expected {
            let found = gist_version(&self.fetch_gist(dataset).await?)?;
            if found != *expected {
                return Err(StoreError::Conflict {
                    dataset,
                    expected: expected.clone(),
                    found,
                });
            }
        }

        let blob = self.blob(dataset);
        let payload = serde_json::json!({
            "files": { blob.file_name.as_str(): { "content": table.render() } }
        });
        let url = format!("{}/gists/{}", self.api_url, blob.gist_id);
        let response = self
            .request(reqwest::Method::PATCH, &url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let body = ensure_success(response)?
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let gist: GistResponse =
            serde_json::from_str(&body).map_err(|e| StoreError::Malformed(e.to_string()))?;
        let version = gist_version(&gist)?;
        tracing::debug!(%dataset, %version, rows = table.len(), "saved table");
        Ok(version)
    }
}
