use serde::Serialize;
use std::collections::BTreeSet;

/// Domain object a database question is believed to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityHint {
    Patient,
    Room,
    Staff,
    Equipment,
    Generic,
}

impl EntityHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityHint::Patient => "patient",
            EntityHint::Room => "room",
            EntityHint::Staff => "staff",
            EntityHint::Equipment => "equipment",
            EntityHint::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseIntent {
    pub entity_hint: EntityHint,
    pub raw_text: String,
}

/// Classified purpose of one incoming message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryIntent {
    /// Lookup of precomputed analysis documents. An empty topic set means
    /// no specific topic was recognised.
    Analysis { matched_topics: BTreeSet<String> },
    Database(DatabaseIntent),
    General,
}

impl QueryIntent {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryIntent::Analysis { .. } => "analysis",
            QueryIntent::Database(_) => "database",
            QueryIntent::General => "general",
        }
    }
}
