use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceTag {
    Database,
    Fallback,
    AnalysisFile,
    General,
}

/// Terminal failure of a request, as shown to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SystemBusy,
    QueryTimeout,
    DatabaseUnavailable,
    ValidationRejected,
    Cancelled,
}

impl ErrorKind {
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorKind::SystemBusy | ErrorKind::QueryTimeout)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::SystemBusy => {
                "The system is busy right now. Please try again in a moment."
            }
            ErrorKind::QueryTimeout => {
                "The query took too long to run. Try narrowing the question."
            }
            ErrorKind::DatabaseUnavailable => {
                "The database is currently unavailable. Please try again later."
            }
            ErrorKind::ValidationRejected => {
                "Sorry, I could not build a safe query for that question."
            }
            ErrorKind::Cancelled => "The request was cancelled.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedResponse {
    pub entity_type: String,
    pub summary_text: String,
    pub source_tag: SourceTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl FormattedResponse {
    pub fn new(entity_type: impl Into<String>, summary_text: String, source_tag: SourceTag) -> Self {
        Self {
            entity_type: entity_type.into(),
            summary_text,
            source_tag,
            error: None,
        }
    }

    /// Apology for a failed database request.
    pub fn failure(entity_type: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            entity_type: entity_type.into(),
            summary_text: kind.user_message().to_string(),
            source_tag: SourceTag::Database,
            error: Some(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::SystemBusy.retryable());
        assert!(ErrorKind::QueryTimeout.retryable());
        assert!(!ErrorKind::DatabaseUnavailable.retryable());
        assert!(!ErrorKind::ValidationRejected.retryable());
    }

    #[test]
    fn test_failure_response_serializes_error_kind() {
        let response = FormattedResponse::failure("patient", ErrorKind::SystemBusy);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"], "system_busy");
        assert_eq!(json["source_tag"], "Database");
        assert!(!response.summary_text.is_empty());
    }
}
