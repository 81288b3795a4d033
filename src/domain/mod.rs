pub mod error;
pub mod intent;
pub mod llm_config;
pub mod query;
pub mod response;
pub mod schema;
