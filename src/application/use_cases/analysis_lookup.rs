//! Analysis Lookup
//!
//! Answers `@analysis` messages from precomputed analysis documents.

use super::intent_classifier::ANALYSIS_TOPICS;
use crate::domain::response::{FormattedResponse, SourceTag};
use crate::infrastructure::analysis_store::AnalysisStore;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::Arc;
use tracing::info;

/// Characters of pretty-printed JSON shown for documents without a known section.
const RAW_EXCERPT_CHARS: usize = 1000;

const ENTITY_TYPE: &str = "analysis";

pub struct AnalysisLookup {
    store: Arc<dyn AnalysisStore>,
}

impl AnalysisLookup {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self { store }
    }

    /// An empty topic set looks up every known topic.
    pub async fn lookup(&self, matched_topics: &BTreeSet<String>) -> FormattedResponse {
        let topics: BTreeSet<String> = if matched_topics.is_empty() {
            ANALYSIS_TOPICS.iter().map(|t| t.to_string()).collect()
        } else {
            matched_topics.clone()
        };

        let documents = self.store.lookup(&topics).await;
        info!(
            topics = topics.len(),
            documents = documents.len(),
            "Analysis lookup"
        );

        if documents.is_empty() {
            return FormattedResponse::new(
                ENTITY_TYPE,
                "No analysis results available for the requested topics.".to_string(),
                SourceTag::AnalysisFile,
            );
        }

        let sections: Vec<String> = documents
            .iter()
            .map(|(key, document)| render_document(key, document))
            .collect();

        FormattedResponse::new(
            ENTITY_TYPE,
            format!("# Hospital Analysis Data\n\n{}", sections.join("\n\n")),
            SourceTag::AnalysisFile,
        )
    }
}

/// `staff_load` -> `STAFF LOAD`
fn heading(id: &str) -> String {
    id.to_uppercase().replace('_', " ")
}

/// `avg_assignments_per_staff` -> `Avg assignments per staff`
fn humanize(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if n.is_f64() => format!("{:.2}", f),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Render one analysis document: header, then whichever of
/// `summary_statistics`, `recommendations` and `alerts` it carries, or a
/// bounded raw excerpt when it has none of them.
pub fn render_document(key: &str, document: &Value) -> String {
    let id = document["analysis_id"].as_str().unwrap_or(key);
    let generated = document["generated_at"].as_str().unwrap_or("unknown");

    let mut out = String::new();
    let _ = writeln!(out, "## Analysis: {}", heading(id));
    let _ = writeln!(out, "**Generated:** {}", generated);

    // Sections live under `data` in generated files; accept them at the root too
    let body = document.get("data").filter(|d| d.is_object()).unwrap_or(document);
    let mut rendered_any = false;

    if let Some(summary) = body["summary_statistics"].as_object() {
        out.push_str("\n**Summary:**\n");
        for (name, value) in summary {
            if let Some(text) = scalar(value) {
                let _ = writeln!(out, "- {}: {}", humanize(name), text);
            }
        }
        rendered_any = true;
    }

    if let Some(recommendations) = body["recommendations"].as_array() {
        if !recommendations.is_empty() {
            out.push_str("\n**Recommendations:**\n");
            for rec in recommendations {
                let message = rec["message"]
                    .as_str()
                    .or_else(|| rec.as_str())
                    .unwrap_or("No message");
                let _ = writeln!(out, "- {}", message);
            }
            rendered_any = true;
        }
    }

    if let Some(alerts) = body["alerts"].as_array() {
        if !alerts.is_empty() {
            out.push_str("\n**Alerts:**\n");
            for alert in alerts {
                let level = alert["level"].as_str().unwrap_or("info").to_uppercase();
                let message = alert["message"].as_str().unwrap_or("No message");
                let _ = writeln!(out, "- {}: {}", level, message);
            }
            rendered_any = true;
        }
    }

    if !rendered_any {
        let pretty = serde_json::to_string_pretty(document).unwrap_or_default();
        let excerpt: String = pretty.chars().take(RAW_EXCERPT_CHARS).collect();
        let ellipsis = if pretty.chars().count() > RAW_EXCERPT_CHARS {
            "..."
        } else {
            ""
        };
        let _ = write!(out, "\n**Raw Data:**\n```json\n{}{}\n```", excerpt, ellipsis);
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct MemoryStore {
        documents: BTreeMap<String, Value>,
        requested: Mutex<Vec<BTreeSet<String>>>,
    }

    #[async_trait]
    impl AnalysisStore for MemoryStore {
        async fn lookup(&self, topics: &BTreeSet<String>) -> BTreeMap<String, Value> {
            self.requested.lock().unwrap().push(topics.clone());
            self.documents
                .iter()
                .filter(|(k, _)| topics.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }
    }

    fn store(documents: Vec<(&str, Value)>) -> Arc<MemoryStore> {
        Arc::new(MemoryStore {
            documents: documents
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            requested: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_render_summary_and_alerts() {
        let doc = json!({
            "analysis_id": "inventory_expiry",
            "generated_at": "2024-05-01T10:00:00",
            "data": {
                "summary_statistics": {"total_inventory_items": 120, "critical_items": 3},
                "alerts": [{"level": "critical", "message": "3 blood units expire tomorrow"}]
            }
        });
        let text = render_document("inventory_expiry", &doc);

        assert!(text.starts_with("## Analysis: INVENTORY EXPIRY\n**Generated:** 2024-05-01T10:00:00"));
        assert!(text.contains("- Total inventory items: 120"));
        assert!(text.contains("- CRITICAL: 3 blood units expire tomorrow"));
        assert!(!text.contains("Raw Data"));
    }

    #[test]
    fn test_render_recommendations_at_root() {
        let doc = json!({
            "analysis_id": "staffing",
            "recommendations": [{"message": "Add two night nurses"}]
        });
        let text = render_document("staffing", &doc);
        assert!(text.contains("**Generated:** unknown"));
        assert!(text.contains("- Add two night nurses"));
    }

    #[test]
    fn test_render_raw_excerpt_is_bounded() {
        let doc = json!({ "forecast": "x".repeat(5000) });
        let text = render_document("census_forecast", &doc);
        assert!(text.contains("## Analysis: CENSUS FORECAST"));
        assert!(text.contains("**Raw Data:**"));
        assert!(text.contains("...\n```"));
        assert!(text.len() < 1200);
    }

    #[tokio::test]
    async fn test_empty_topics_request_everything() {
        let store = store(vec![("burn_rate", json!({"analysis_id": "burn_rate"}))]);
        let lookup = AnalysisLookup::new(store.clone());

        let response = lookup.lookup(&BTreeSet::new()).await;
        assert_eq!(response.source_tag, SourceTag::AnalysisFile);
        assert!(response.summary_text.contains("BURN RATE"));

        let requested = store.requested.lock().unwrap();
        assert_eq!(requested[0].len(), ANALYSIS_TOPICS.len());
    }

    #[tokio::test]
    async fn test_no_documents_is_reported() {
        let lookup = AnalysisLookup::new(store(vec![]));
        let topics: BTreeSet<String> = ["staffing".to_string()].into_iter().collect();
        let response = lookup.lookup(&topics).await;
        assert!(response.summary_text.starts_with("No analysis results available"));
        assert_eq!(response.source_tag, SourceTag::AnalysisFile);
    }
}
