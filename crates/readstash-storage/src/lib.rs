//! Bucket-scoped JSON document storage + HTTP fetch utilities for readstash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use readstash_core::{Ledger, SourceMap, LEDGER_DOC, SOURCES_DOC};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "readstash-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error for {doc}: {source}")]
    Io {
        doc: String,
        #[source]
        source: std::io::Error,
    },
}

/// Named JSON documents inside a bucket. One overwrite call per `write`;
/// there is no merge with concurrent writers (last writer wins).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `None` when the document does not exist.
    async fn read(&self, bucket: &str, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replaces the whole document, atomically from a reader's perspective.
    async fn write(&self, bucket: &str, name: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Filesystem-backed store: each bucket is a directory under `root`.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.root.join(bucket).join(name)
    }
}

fn io_error(bucket: &str, name: &str, source: std::io::Error) -> StoreError {
    StoreError::Io {
        doc: format!("{bucket}/{name}"),
        source,
    }
}

#[async_trait]
impl DocumentStore for LocalDirStore {
    async fn read(&self, bucket: &str, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.doc_path(bucket, name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(bucket, name, err)),
        }
    }

    async fn write(&self, bucket: &str, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.doc_path(bucket, name);
        let parent = path
            .parent()
            .expect("document path always has a bucket parent")
            .to_path_buf();
        fs::create_dir_all(&parent)
            .await
            .map_err(|err| io_error(bucket, name, err))?;

        // Write to a temp file in the same directory, then rename over the
        // target so readers never observe a partial document.
        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|err| io_error(bucket, name, err))?;
        file.write_all(bytes)
            .await
            .map_err(|err| io_error(bucket, name, err))?;
        file.flush()
            .await
            .map_err(|err| io_error(bucket, name, err))?;
        drop(file);

        match fs::rename(&temp_path, &path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(io_error(bucket, name, err))
            }
        }
    }
}

/// In-memory store used by tests and by reconciler fakes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, bucket: &str, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs.get(&(bucket.to_string(), name.to_string())).cloned())
    }

    async fn write(&self, bucket: &str, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        docs.insert((bucket.to_string(), name.to_string()), bytes.to_vec());
        Ok(())
    }
}

/// Loads `sources.json`. The configuration document is owned by an external
/// collaborator; a missing document is an error, not an empty run.
pub async fn load_sources(store: &dyn DocumentStore, bucket: &str) -> anyhow::Result<SourceMap> {
    let bytes = store
        .read(bucket, SOURCES_DOC)
        .await
        .with_context(|| format!("reading {SOURCES_DOC} from bucket {bucket}"))?
        .with_context(|| format!("{SOURCES_DOC} not found in bucket {bucket}"))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {SOURCES_DOC}"))
}

/// Loads `ingested.json`; a bucket that has never completed a run yields an
/// empty ledger.
pub async fn load_ledger(store: &dyn DocumentStore, bucket: &str) -> anyhow::Result<Ledger> {
    let bytes = store
        .read(bucket, LEDGER_DOC)
        .await
        .with_context(|| format!("reading {LEDGER_DOC} from bucket {bucket}"))?;
    match bytes {
        Some(bytes) => serde_json::from_slice(&bytes).with_context(|| format!("parsing {LEDGER_DOC}")),
        None => Ok(Ledger::new()),
    }
}

/// Writes the ledger back as the complete replacement document.
pub async fn save_ledger(
    store: &dyn DocumentStore,
    bucket: &str,
    ledger: &Ledger,
) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(ledger).context("serializing ledger")?;
    store
        .write(bucket, LEDGER_DOC, &bytes)
        .await
        .with_context(|| format!("writing {LEDGER_DOC} to bucket {bucket}"))
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-attempt GET client. Failures surface immediately; discovery retry
/// happens across runs, not within one.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        debug!(url, status = status.as_u16(), "http get");
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readstash_core::{SourceConfig, SourceKind};
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_document_reads_as_none() {
        let dir = tempdir().expect("tempdir");
        let store = LocalDirStore::new(dir.path());
        let read = store.read("bucket", "nope.json").await.expect("read");
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn write_then_read_roundtrips_and_overwrites() {
        let dir = tempdir().expect("tempdir");
        let store = LocalDirStore::new(dir.path());

        store.write("bucket", "doc.json", b"{\"a\":1}").await.expect("write");
        let first = store.read("bucket", "doc.json").await.expect("read").expect("some");
        assert_eq!(first, b"{\"a\":1}");

        store.write("bucket", "doc.json", b"{\"a\":2}").await.expect("rewrite");
        let second = store.read("bucket", "doc.json").await.expect("read").expect("some");
        assert_eq!(second, b"{\"a\":2}");
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempdir().expect("tempdir");
        let store = LocalDirStore::new(dir.path());
        store.write("bucket", "doc.json", b"{}").await.expect("write");

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("bucket"))
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["doc.json".to_string()]);
    }

    #[tokio::test]
    async fn ledger_missing_document_is_empty_map() {
        let store = MemoryStore::new();
        let ledger = load_ledger(&store, "bucket").await.expect("load");
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn ledger_roundtrip_preserves_entries() {
        let store = MemoryStore::new();
        let mut ledger = Ledger::new();
        ledger.insert(
            "https://ex.com/p".to_string(),
            vec!["https://ex.com/a".to_string(), "https://ex.com/b".to_string()],
        );

        save_ledger(&store, "bucket", &ledger).await.expect("save");
        let loaded = load_ledger(&store, "bucket").await.expect("load");
        assert_eq!(loaded, ledger);
    }

    #[tokio::test]
    async fn sources_document_is_required() {
        let store = MemoryStore::new();
        let err = load_sources(&store, "bucket").await.expect_err("missing sources");
        assert!(err.to_string().contains("sources.json"));
    }

    #[tokio::test]
    async fn sources_document_parses_config_entries() {
        let store = MemoryStore::new();
        store
            .write(
                "bucket",
                SOURCES_DOC,
                br#"{"https://ex.com/p": {"type": "Blog", "labels": ["tech"]}}"#,
            )
            .await
            .expect("seed");

        let sources = load_sources(&store, "bucket").await.expect("load");
        assert_eq!(
            sources.get("https://ex.com/p"),
            Some(&SourceConfig {
                kind: SourceKind::Blog,
                labels: vec!["tech".to_string()],
            })
        );
    }
}
