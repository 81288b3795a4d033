//! SQL safety validator
//!
//! Every statement, whether it came from the language model or from the
//! fallback templates, passes through here before it reaches a connection:
//! - Comment stripping
//! - Read-only enforcement (SELECT / WITH only)
//! - Single-statement enforcement
//! - Statement keyword and sensitive column blocking
//! - Limit appending and clamping
//!
//! Checks are textual and deterministic: the same input always yields the
//! same verdict.

use crate::domain::error::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"--[^\n]*").unwrap());
static READ_ONLY_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(SELECT|WITH)\b").unwrap());
/// The statement's own LIMIT clause. A LIMIT inside a subquery or a string
/// literal is never at the very end of the statement.
static TRAILING_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+|ALL)(\s+OFFSET\s+\d+)?\s*$").unwrap());

/// Rules applied by [`SqlValidator`]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidatorRules {
    /// Limit appended when a statement has none
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    /// Upper bound for a trailing numeric LIMIT
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
    /// Append `default_limit` instead of rejecting with `MissingLimit`
    #[serde(default = "default_append")]
    pub append_missing_limit: bool,
    /// Statement keywords that cannot appear anywhere as a whole word
    #[serde(default)]
    pub deny_statements: Vec<String>,
    /// Column names that must never be queried
    #[serde(default)]
    pub deny_columns: Vec<String>,
}

fn default_limit() -> u32 {
    50
}

fn default_max_limit() -> u32 {
    200
}

fn default_append() -> bool {
    true
}

impl Default for ValidatorRules {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            append_missing_limit: true,
            deny_statements: vec![
                "INSERT".to_string(),
                "UPDATE".to_string(),
                "DELETE".to_string(),
                "DROP".to_string(),
                "ALTER".to_string(),
                "TRUNCATE".to_string(),
                "GRANT".to_string(),
                "COPY".to_string(),
                // SELECT ... INTO creates a table
                "INTO".to_string(),
            ],
            deny_columns: vec!["password_hash".to_string()],
        }
    }
}

impl ValidatorRules {
    pub fn with_limits(default_limit: u32, max_limit: u32) -> Self {
        Self {
            default_limit,
            max_limit,
            ..Self::default()
        }
    }
}

pub struct SqlValidator {
    rules: ValidatorRules,
    denied: Vec<(String, Regex)>,
}

impl SqlValidator {
    pub fn from_rules(rules: ValidatorRules) -> Self {
        let denied = rules
            .deny_statements
            .iter()
            .chain(rules.deny_columns.iter())
            .filter_map(|word| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))
                    .ok()
                    .map(|re| (word.to_uppercase(), re))
            })
            .collect();

        Self { rules, denied }
    }

    pub fn rules(&self) -> &ValidatorRules {
        &self.rules
    }

    /// Validate one SQL string and return its normalized form
    ///
    /// Rules run in order: read-only start, single statement, forbidden
    /// words, then limit handling.
    pub fn validate(&self, sql: &str) -> Result<String, ValidationError> {
        let stripped = strip_comments(sql);
        let body = stripped.trim();

        // 1. Read-only start
        if !READ_ONLY_START.is_match(body) {
            return Err(ValidationError::NotSelect);
        }

        // 2. Single statement; one trailing semicolon is tolerated
        let body = match body.find(';') {
            Some(idx) => {
                if !body[idx + 1..].trim().is_empty() {
                    return Err(ValidationError::MultipleStatements);
                }
                body[..idx].trim_end()
            }
            None => body,
        };

        // 3. Forbidden statements and sensitive columns
        for (word, pattern) in &self.denied {
            if pattern.is_match(body) {
                return Err(ValidationError::ForbiddenKeyword(word.clone()));
            }
        }

        // 4. Limit
        match TRAILING_LIMIT.captures(body).and_then(|caps| caps.get(1)) {
            Some(bound) => Ok(self.clamp_limit(body, bound)),
            None if !self.rules.append_missing_limit => Err(ValidationError::MissingLimit),
            None => Ok(format!("{} LIMIT {}", body, self.rules.default_limit)),
        }
    }

    /// Get the effective limit for an explicitly requested bound
    pub fn effective_limit(&self, requested: u32) -> u32 {
        requested.clamp(1, self.rules.max_limit)
    }

    /// `LIMIT ALL` and bounds above `max_limit` become `max_limit`.
    fn clamp_limit(&self, body: &str, bound: regex::Match<'_>) -> String {
        let within_bound = bound
            .as_str()
            .parse::<u64>()
            .map(|n| n <= self.rules.max_limit as u64)
            .unwrap_or(false);
        if within_bound {
            return body.to_string();
        }

        format!(
            "{}{}{}",
            &body[..bound.start()],
            self.rules.max_limit,
            &body[bound.end()..]
        )
    }
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::from_rules(ValidatorRules::default())
    }
}

fn strip_comments(sql: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(sql, " ");
    LINE_COMMENT.replace_all(&without_blocks, " ").into_owned()
}
