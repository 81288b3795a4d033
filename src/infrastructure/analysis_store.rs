//! Read-only store of precomputed analysis documents
//!
//! Documents are produced out-of-band as `<results_dir>/<topic>_result.json`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Documents for the requested topics, keyed by topic. Topics without a
    /// readable document are absent from the map.
    async fn lookup(&self, topics: &BTreeSet<String>) -> BTreeMap<String, Value>;
}

pub struct JsonFileAnalysisStore {
    results_dir: PathBuf,
}

impl JsonFileAnalysisStore {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// `None` for topic names that are not plain identifiers.
    fn document_path(&self, topic: &str) -> Option<PathBuf> {
        let valid = !topic.is_empty()
            && topic
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        valid.then(|| self.results_dir.join(format!("{}_result.json", topic)))
    }

    async fn load(&self, topic: &str) -> Option<Value> {
        let Some(path) = self.document_path(topic) else {
            warn!(topic, "Ignoring analysis topic with invalid name");
            return None;
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Analysis file not found");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read analysis file");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Analysis file is not valid JSON");
                None
            }
        }
    }
}

#[async_trait]
impl AnalysisStore for JsonFileAnalysisStore {
    async fn lookup(&self, topics: &BTreeSet<String>) -> BTreeMap<String, Value> {
        let mut documents = BTreeMap::new();
        for topic in topics {
            if let Some(document) = self.load(topic).await {
                documents.insert(topic.clone(), document);
            }
        }
        debug!(
            requested = topics.len(),
            found = documents.len(),
            "Analysis lookup finished"
        );
        documents
    }
}
