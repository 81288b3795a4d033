use crate::domain::error::GenError;
use crate::domain::intent::DatabaseIntent;
use crate::domain::query::{GeneratedSql, SqlSource};
use crate::domain::schema::SchemaContext;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// One strategy in the ordered generator list tried by the orchestrator.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    fn source(&self) -> SqlSource;

    async fn generate_sql(
        &self,
        intent: &DatabaseIntent,
        schema: &SchemaContext,
        cancel: &CancellationToken,
    ) -> Result<GeneratedSql, GenError>;
}
