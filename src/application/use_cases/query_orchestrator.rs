//! Query Orchestrator
//!
//! One request flows through:
//!
//! ```text
//! Classifying ─┬─ AnalysisLookup ─────────────────────────────────┐
//!              ├─ GeneralDelegation ──────────────────────────────┤
//!              └─ GeneratingSql ─(fail)─ FallbackGenerating       │
//!                      │                      │                   │
//!                      └──── Validating ──────┘                   │
//!                                │ (rejected: next generator)     │
//!                             Executing ── Formatting ── Done ────┘
//! ```
//!
//! Generators are tried in list order. Each one is tried at most once, so a
//! request always ends in `Done` or `Failed` in bounded time.

use super::analysis_lookup::AnalysisLookup;
use super::general_delegation::GeneralDelegation;
use super::intent_classifier::IntentClassifier;
use super::query_executor::QueryExecutor;
use super::result_formatter::ResultFormatter;
use super::sql_generator::SqlGenerator;
use super::sql_validator::{SqlValidator, ValidatorRules};
use crate::domain::error::{ExecError, GenError};
use crate::domain::intent::{DatabaseIntent, QueryIntent};
use crate::domain::query::SqlSource;
use crate::domain::response::{ErrorKind, FormattedResponse, SourceTag};
use crate::domain::schema::SchemaContext;
use crate::infrastructure::config::QueryConfig;
use crate::infrastructure::db::ConnectionPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classifying,
    AnalysisLookup,
    GeneralDelegation,
    GeneratingSql,
    FallbackGenerating,
    Validating,
    Executing,
    Formatting,
}

/// Terminal state of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Done(FormattedResponse),
    Failed {
        entity_type: String,
        kind: ErrorKind,
    },
}

impl RequestOutcome {
    fn failed(entity_type: &str, kind: ErrorKind) -> Self {
        RequestOutcome::Failed {
            entity_type: entity_type.to_string(),
            kind,
        }
    }

    pub fn into_response(self) -> FormattedResponse {
        match self {
            RequestOutcome::Done(response) => response,
            RequestOutcome::Failed { entity_type, kind } => {
                FormattedResponse::failure(entity_type, kind)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_limit: u32,
    pub max_limit: u32,
    pub max_rows: usize,
    pub statement_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_query_config(query: &QueryConfig) -> Self {
        Self {
            default_limit: query.default_limit,
            max_limit: query.max_limit,
            max_rows: query.max_rows as usize,
            statement_timeout: query.statement_timeout(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_query_config(&QueryConfig::default())
    }
}

fn enter(stage: Stage) {
    debug!(stage = ?stage, "Entering stage");
}

fn error_kind(err: &ExecError) -> ErrorKind {
    match err {
        ExecError::PoolExhausted => ErrorKind::SystemBusy,
        ExecError::Timeout => ErrorKind::QueryTimeout,
        ExecError::DbError { .. } => ErrorKind::DatabaseUnavailable,
        ExecError::Cancelled => ErrorKind::Cancelled,
    }
}

fn source_tag(source: SqlSource) -> SourceTag {
    match source {
        SqlSource::AI => SourceTag::Database,
        SqlSource::Fallback => SourceTag::Fallback,
    }
}

pub struct QueryOrchestrator {
    classifier: IntentClassifier,
    schema: Arc<SchemaContext>,
    generators: Vec<Arc<dyn SqlGenerator>>,
    validator: SqlValidator,
    executor: QueryExecutor,
    formatter: ResultFormatter,
    pool: ConnectionPool,
    analysis: AnalysisLookup,
    general: GeneralDelegation,
    statement_timeout: Duration,
}

impl QueryOrchestrator {
    /// `generators` is the ordered strategy list; the last entry should be one
    /// that never fails.
    pub fn new(
        schema: Arc<SchemaContext>,
        pool: ConnectionPool,
        generators: Vec<Arc<dyn SqlGenerator>>,
        analysis: AnalysisLookup,
        general: GeneralDelegation,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            schema,
            generators,
            validator: SqlValidator::from_rules(ValidatorRules::with_limits(
                settings.default_limit,
                settings.max_limit,
            )),
            executor: QueryExecutor::new(settings.max_rows),
            // Validated SQL returns at most max_limit rows; list all of them
            formatter: ResultFormatter::new(settings.max_limit as usize),
            pool,
            analysis,
            general,
            statement_timeout: settings.statement_timeout,
        }
    }

    pub fn schema(&self) -> &SchemaContext {
        &self.schema
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub async fn handle(&self, message: &str) -> FormattedResponse {
        self.handle_with_cancel(message, &CancellationToken::new())
            .await
    }

    /// Like [`handle`](Self::handle), but stops early once `cancel` fires.
    pub async fn handle_with_cancel(
        &self,
        message: &str,
        cancel: &CancellationToken,
    ) -> FormattedResponse {
        self.run(message, cancel).await.into_response()
    }

    pub async fn run(&self, message: &str, cancel: &CancellationToken) -> RequestOutcome {
        let span = info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            intent = field::Empty
        );
        self.run_inner(message, cancel, span.clone())
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        message: &str,
        cancel: &CancellationToken,
        span: tracing::Span,
    ) -> RequestOutcome {
        enter(Stage::Classifying);
        let intent = self.classifier.classify(message);
        span.record("intent", intent.kind());

        if cancel.is_cancelled() {
            return RequestOutcome::failed(intent.kind(), ErrorKind::Cancelled);
        }

        let outcome = match intent {
            QueryIntent::Analysis { matched_topics } => {
                enter(Stage::AnalysisLookup);
                RequestOutcome::Done(self.analysis.lookup(&matched_topics).await)
            }
            QueryIntent::General => {
                enter(Stage::GeneralDelegation);
                let response = self.general.respond(message, cancel).await;
                if cancel.is_cancelled() {
                    RequestOutcome::failed("general", ErrorKind::Cancelled)
                } else {
                    RequestOutcome::Done(response)
                }
            }
            QueryIntent::Database(db_intent) => self.run_database(&db_intent, cancel).await,
        };

        match &outcome {
            RequestOutcome::Done(response) => {
                info!(source = ?response.source_tag, "Request completed")
            }
            RequestOutcome::Failed { kind, .. } => {
                warn!(kind = ?kind, retryable = kind.retryable(), "Request failed")
            }
        }
        outcome
    }

    async fn run_database(
        &self,
        intent: &DatabaseIntent,
        cancel: &CancellationToken,
    ) -> RequestOutcome {
        let entity = intent.entity_hint.as_str();
        let total = self.generators.len();

        for (index, generator) in self.generators.iter().enumerate() {
            let is_last = index + 1 == total;
            enter(if index == 0 {
                Stage::GeneratingSql
            } else {
                Stage::FallbackGenerating
            });

            let generated = match generator.generate_sql(intent, &self.schema, cancel).await {
                Ok(generated) => generated,
                Err(GenError::Cancelled) => {
                    return RequestOutcome::failed(entity, ErrorKind::Cancelled)
                }
                Err(e) => {
                    warn!(
                        generator = ?generator.source(),
                        error = %e,
                        "SQL generation failed, falling back"
                    );
                    continue;
                }
            };

            if cancel.is_cancelled() {
                return RequestOutcome::failed(entity, ErrorKind::Cancelled);
            }

            enter(Stage::Validating);
            let validated = match self.validator.validate(&generated.text) {
                Ok(normalized) => generated.into_validated(normalized),
                Err(e) => {
                    warn!(
                        generator = ?generated.source,
                        reason = %e,
                        "Generated SQL rejected by validator"
                    );
                    continue;
                }
            };

            enter(Stage::Executing);
            debug!(sql = %validated.text, params = validated.params.len(), "Executing SQL");
            match self
                .executor
                .execute(&validated, &self.pool, self.statement_timeout, cancel)
                .await
            {
                Ok(result) => {
                    enter(Stage::Formatting);
                    let summary = self.formatter.format(&result, intent.entity_hint);
                    return RequestOutcome::Done(FormattedResponse::new(
                        entity,
                        summary,
                        source_tag(validated.source),
                    ));
                }
                Err(e) if e.is_invalid_statement() && !is_last => {
                    warn!(
                        generator = ?validated.source,
                        error = %e,
                        "Generated SQL does not fit the schema, falling back"
                    );
                    continue;
                }
                Err(e) => return RequestOutcome::failed(entity, error_kind(&e)),
            }
        }

        RequestOutcome::failed(entity, ErrorKind::ValidationRejected)
    }
}
