//! Core domain model for readstash: sources, ledger, and trigger payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "readstash-core";

/// Well-known configuration document; storage changes to any other name are ignored.
pub const SOURCES_DOC: &str = "sources.json";
/// Well-known ledger document, rewritten wholesale at the end of each run.
pub const LEDGER_DOC: &str = "ingested.json";

/// How items are discovered for a source. Config values this build does not
/// recognize land on `Unknown`, which fetches to nothing instead of failing
/// the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Blog,
    Playlist,
    #[serde(other)]
    Unknown,
}

impl SourceKind {
    pub fn as_label(&self) -> Option<&'static str> {
        match self {
            SourceKind::Blog => Some("Blog"),
            SourceKind::Playlist => Some("Playlist"),
            SourceKind::Unknown => None,
        }
    }
}

/// One entry of `sources.json`, keyed externally by the source URL.
/// The document is owned by an external collaborator and never written here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub labels: Vec<String>,
}

/// Parsed `sources.json`: source URL -> configuration.
pub type SourceMap = BTreeMap<String, SourceConfig>;

/// Parsed `ingested.json`: source URL -> item URLs already accepted by the
/// sink, in ingestion order. Append-only across runs, never pruned.
pub type Ledger = BTreeMap<String, Vec<String>>;

/// A discovered item ready for submission: its URL plus the combined
/// source-level and derived labels. Exists only within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub url: String,
    pub labels: Vec<String>,
}

/// Per-item sink outcome, carried as data so the reconciler can decide
/// ledger updates without relying on control-flow exceptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub url: String,
    pub status: SubmitStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitStatus {
    Accepted,
    Failed { reason: String },
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, SubmitStatus::Accepted)
    }
}

/// Storage-change notification as delivered by the trigger. Only `bucket`
/// and `name` drive behavior; the rest is logged for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    pub bucket: String,
    pub name: String,
    #[serde(default)]
    pub metageneration: Option<String>,
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl StorageEvent {
    pub fn is_sources_update(&self) -> bool {
        self.name == SOURCES_DOC
    }
}

/// Union of config labels and fetch-derived labels, first occurrence wins.
pub fn merge_labels(config_labels: &[String], derived: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(config_labels.len() + derived.len());
    for label in config_labels.iter().chain(derived) {
        if !merged.iter().any(|existing| existing == label) {
            merged.push(label.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_config_parses_documented_shape() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"type": "Blog", "labels": ["tech", "reading"]}"#)
                .expect("parse source config");
        assert_eq!(config.kind, SourceKind::Blog);
        assert_eq!(config.labels, vec!["tech", "reading"]);
    }

    #[test]
    fn unrecognized_kind_maps_to_unknown() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"type": "Podcast", "labels": []}"#).expect("parse");
        assert_eq!(config.kind, SourceKind::Unknown);
        assert_eq!(config.kind.as_label(), None);
    }

    #[test]
    fn storage_event_parses_camel_case_fields() {
        let event: StorageEvent = serde_json::from_str(
            r#"{
                "bucket": "reading-bucket",
                "name": "sources.json",
                "metageneration": "3",
                "timeCreated": "2026-08-20T06:00:00Z",
                "updated": "2026-08-21T06:00:00Z"
            }"#,
        )
        .expect("parse event");
        assert!(event.is_sources_update());
        assert_eq!(event.metageneration.as_deref(), Some("3"));
    }

    #[test]
    fn non_config_event_is_not_a_sources_update() {
        let event: StorageEvent =
            serde_json::from_str(r#"{"bucket": "b", "name": "ingested.json"}"#).expect("parse");
        assert!(!event.is_sources_update());
    }

    #[test]
    fn merge_labels_deduplicates_preserving_order() {
        let config = vec!["tech".to_string(), "Blog".to_string()];
        let derived = vec!["ex.com".to_string(), "Blog".to_string()];
        assert_eq!(merge_labels(&config, &derived), vec!["tech", "Blog", "ex.com"]);
    }
}
