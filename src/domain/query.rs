use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlSource {
    AI,
    Fallback,
}

/// SQL produced for one request. Never cached across requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedSql {
    pub text: String,
    /// Positional parameters bound to `$1..$n`.
    pub params: Vec<Value>,
    pub source: SqlSource,
    pub validated: bool,
}

impl GeneratedSql {
    pub fn new(text: impl Into<String>, source: SqlSource) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
            source,
            validated: false,
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Replace the text with the validator's normalized form.
    pub fn into_validated(mut self, normalized: String) -> Self {
        self.text = normalized;
        self.validated = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// More rows were available than were read.
    pub truncated: bool,
}

impl QueryResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
