//! Reconciliation pipeline and storage-change trigger shim.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use readstash_adapters::{HttpSourceFetcher, PlaylistApiConfig, SourceFetcher};
use readstash_core::{merge_labels, Ledger, SourceMap, StorageEvent};
use readstash_sink::{submit_all, SaveApiClient, SaveApiConfig, SaveSink};
use readstash_storage::{
    load_ledger, load_sources, save_ledger, DocumentStore, HttpClientConfig, HttpFetcher,
    LocalDirStore,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "readstash-sync";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub data_dir: PathBuf,
    pub bucket: String,
    pub save_api_url: String,
    pub save_api_token: String,
    pub playlist_api_base: Option<String>,
    pub playlist_api_key: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("READSTASH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            bucket: std::env::var("READSTASH_BUCKET")
                .unwrap_or_else(|_| "reading".to_string()),
            save_api_url: std::env::var("SAVE_API_URL")
                .unwrap_or_else(|_| "https://api.omnivore.app/api/save".to_string()),
            save_api_token: std::env::var("SAVE_API_TOKEN").unwrap_or_default(),
            playlist_api_base: std::env::var("PLAYLIST_API_BASE").ok(),
            playlist_api_key: std::env::var("PLAYLIST_API_KEY").unwrap_or_default(),
            user_agent: std::env::var("READSTASH_USER_AGENT")
                .unwrap_or_else(|_| "readstash-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("READSTASH_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }
}

/// Per-run counters; failures here are sink rejections, which stay in the
/// diff set for the next trigger.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconcileStats {
    pub sources: usize,
    pub discovered: usize,
    pub new_items: usize,
    pub accepted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunSummary {
    pub run_id: Uuid,
    pub bucket: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: ReconcileStats,
}

/// Walks every configured source once, in the config document's own order:
/// diff fetched candidates against the ledger, submit the new ones, append
/// only what the sink accepted. Entries for sources no longer configured are
/// left untouched. A fetch failure aborts the run; the caller must not have
/// persisted anything yet.
pub async fn reconcile(
    sources: &SourceMap,
    mut ledger: Ledger,
    fetcher: &dyn SourceFetcher,
    sink: &dyn SaveSink,
) -> Result<(Ledger, ReconcileStats)> {
    let mut stats = ReconcileStats {
        sources: sources.len(),
        ..Default::default()
    };

    for (source_url, config) in sources {
        let already = ledger.get(source_url).cloned().unwrap_or_default();

        let fetched = fetcher
            .fetch(source_url, config.kind)
            .await
            .with_context(|| format!("fetching items for source {source_url}"))?;

        // Exact string membership against the pre-run ledger entry;
        // candidate order is preserved.
        let new_items: Vec<String> = fetched
            .items
            .iter()
            .filter(|candidate| !already.contains(candidate))
            .cloned()
            .collect();

        let labels = merge_labels(&config.labels, &fetched.labels);
        let report = submit_all(sink, &new_items, &labels).await;
        let accepted = report.accepted();

        info!(
            %source_url,
            kind = ?config.kind,
            discovered = fetched.items.len(),
            new = new_items.len(),
            accepted = accepted.len(),
            failed = report.failed_count(),
            "reconciled source"
        );

        stats.discovered += fetched.items.len();
        stats.new_items += new_items.len();
        stats.accepted += accepted.len();
        stats.failed += report.failed_count();

        let mut entry = already;
        entry.extend(accepted);
        ledger.insert(source_url.clone(), entry);
    }

    Ok((ledger, stats))
}

pub struct IngestPipeline {
    store: Arc<dyn DocumentStore>,
    fetcher: Box<dyn SourceFetcher>,
    sink: Box<dyn SaveSink>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        fetcher: Box<dyn SourceFetcher>,
        sink: Box<dyn SaveSink>,
    ) -> Self {
        Self {
            store,
            fetcher,
            sink,
        }
    }

    /// Wires the live dependencies: directory-backed store, HTTP discovery,
    /// HTTP save client. Constructed once at startup and passed around, so
    /// tests can substitute fakes through [`IngestPipeline::new`].
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.http_timeout_secs);
        let store = Arc::new(LocalDirStore::new(config.data_dir.clone()));

        let http = HttpFetcher::new(HttpClientConfig {
            timeout,
            user_agent: Some(config.user_agent.clone()),
        })?;
        let mut playlist_api = PlaylistApiConfig::new(config.playlist_api_key.clone());
        if let Some(base) = &config.playlist_api_base {
            playlist_api.base_url = base.clone();
        }
        let fetcher = HttpSourceFetcher::new(http, playlist_api);

        let sink = SaveApiClient::new(SaveApiConfig {
            endpoint: config.save_api_url.clone(),
            token: config.save_api_token.clone(),
            timeout,
        })?;

        Ok(Self::new(store, Box::new(fetcher), Box::new(sink)))
    }

    /// One full run: read config + ledger, reconcile every source, persist
    /// the ledger exactly once at the end. An abort anywhere before the
    /// final write leaves the stored ledger as it was.
    pub async fn run_once(&self, bucket: &str) -> Result<IngestRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, bucket, "ingest run started");

        let sources = load_sources(self.store.as_ref(), bucket).await?;
        let ledger = load_ledger(self.store.as_ref(), bucket).await?;

        let (ledger, stats) =
            reconcile(&sources, ledger, self.fetcher.as_ref(), self.sink.as_ref()).await?;

        save_ledger(self.store.as_ref(), bucket, &ledger).await?;

        let finished_at = Utc::now();
        info!(
            %run_id,
            sources = stats.sources,
            new_items = stats.new_items,
            accepted = stats.accepted,
            failed = stats.failed,
            "ingest run finished"
        );

        Ok(IngestRunSummary {
            run_id,
            bucket: bucket.to_string(),
            started_at,
            finished_at,
            stats,
        })
    }
}

/// Trigger shim: reacts only to changes of the well-known configuration
/// document. Every other file change is a no-op that must not touch the
/// ledger.
pub async fn handle_storage_event(
    pipeline: &IngestPipeline,
    event: &StorageEvent,
) -> Result<Option<IngestRunSummary>> {
    info!(
        bucket = %event.bucket,
        name = %event.name,
        metageneration = ?event.metageneration,
        created = ?event.time_created,
        updated = ?event.updated,
        "storage change received"
    );

    if !event.is_sources_update() {
        info!(name = %event.name, "not the configuration document, ignoring");
        return Ok(None);
    }

    pipeline.run_once(&event.bucket).await.map(Some)
}
