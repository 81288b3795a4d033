pub mod ai_sql_generator;
pub mod analysis_lookup;
pub mod fallback_sql_generator;
pub mod general_delegation;
pub mod intent_classifier;
pub mod query_executor;
pub mod query_orchestrator;
pub mod result_formatter;
pub mod sql_generator;
pub mod sql_validator;
