//! AI SQL Generator
//!
//! Asks the completion service for a PostgreSQL SELECT built against the
//! serialized schema, then pulls the first statement out of the reply.
//! Never retries; the orchestrator decides what happens on failure.

use super::sql_generator::SqlGenerator;
use crate::domain::error::GenError;
use crate::domain::intent::DatabaseIntent;
use crate::domain::query::{GeneratedSql, SqlSource};
use crate::domain::schema::SchemaContext;
use crate::infrastructure::llm_clients::CompletionClient;
use crate::infrastructure::response::clean_model_output;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static SQL_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)```\s*sql\s*\n?(.*?)```").unwrap());

static ANY_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").unwrap());

/// A bare SELECT, or a WITH that opens a CTE (so prose "with" is not taken).
static BARE_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\b(?:SELECT\b|WITH\s+(?:RECURSIVE\s+)?\w+\s+AS\s*\()[^;]*;?").unwrap()
});

static STATEMENT_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(SELECT|WITH)\b").unwrap());

fn build_system_prompt(schema: &SchemaContext, default_limit: u32) -> String {
    format!(
        r#"You are an expert SQL developer for a hospital management system. You write a single read-only PostgreSQL query that answers the user's question.

DATABASE SCHEMA:
{schema}

RULES:
1. Only SELECT (or WITH ... SELECT) statements. Never modify data.
2. Exactly one statement.
3. Use explicit JOINs when data spans multiple tables; LEFT JOIN for optional relationships such as room assignments.
4. Prefer role-filtered lookups on tables with a role filter (users.role = 'patient', 'doctor', 'nurse', 'staff', 'admin').
5. Current room occupancy means occupancy.discharged_at IS NULL.
6. Blood group counts come from patient_records.blood_group; blood stock comes from hospital_inventory where item_type = 'blood_unit'.
7. Never select password_hash.
8. Use short table aliases and order results logically.
9. Add LIMIT {limit} to list queries unless the user asks for a different number.

Reply with the query in a ```sql code block and nothing else."#,
        schema = schema.to_prompt_context(),
        limit = default_limit
    )
}

/// Pull the first SQL statement out of a model reply.
///
/// Tried in order: a ```sql fence, any fence whose body starts with
/// SELECT/WITH, the first bare statement, then the whole text. The result
/// always starts with SELECT or WITH.
pub fn extract_sql(output: &str) -> Option<String> {
    let cleaned = clean_model_output(output);

    let candidate = SQL_FENCE
        .captures(&cleaned)
        .map(|c| c[1].trim().to_string())
        .or_else(|| {
            ANY_FENCE
                .captures_iter(&cleaned)
                .map(|c| c[1].trim().to_string())
                .find(|body| STATEMENT_START.is_match(body))
        })
        .or_else(|| {
            BARE_STATEMENT
                .find(&cleaned)
                .map(|m| m.as_str().trim().to_string())
        })
        .unwrap_or_else(|| cleaned.trim().to_string());

    if STATEMENT_START.is_match(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

pub struct AiSqlGenerator {
    client: Arc<dyn CompletionClient>,
    timeout: Duration,
    default_limit: u32,
}

impl AiSqlGenerator {
    pub fn new(client: Arc<dyn CompletionClient>, timeout: Duration, default_limit: u32) -> Self {
        Self {
            client,
            timeout,
            default_limit,
        }
    }

    pub async fn generate(
        &self,
        nl_query: &str,
        schema: &SchemaContext,
        cancel: &CancellationToken,
    ) -> Result<GeneratedSql, GenError> {
        let system_prompt = build_system_prompt(schema, self.default_limit);
        let user_prompt = format!("USER REQUEST: {}", nl_query);

        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(GenError::Cancelled),
            reply = tokio::time::timeout(
                self.timeout,
                self.client.complete(&system_prompt, &user_prompt, self.timeout),
            ) => reply.map_err(|_| GenError::Timeout)??,
        };

        debug!(chars = reply.len(), "Completion received for SQL generation");

        extract_sql(&reply)
            .map(|sql| GeneratedSql::new(sql, SqlSource::AI))
            .ok_or(GenError::MalformedOutput)
    }
}

#[async_trait]
impl SqlGenerator for AiSqlGenerator {
    fn source(&self) -> SqlSource {
        SqlSource::AI
    }

    async fn generate_sql(
        &self,
        intent: &DatabaseIntent,
        schema: &SchemaContext,
        cancel: &CancellationToken,
    ) -> Result<GeneratedSql, GenError> {
        self.generate(&intent.raw_text, schema, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::CompletionError;
    use std::sync::Mutex;

    struct ScriptedClient {
        reply: Result<String, CompletionError>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn replying(reply: Result<String, CompletionError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(
            &self,
            system: &str,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(system.to_string());
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }
    }

    fn generator(client: Arc<ScriptedClient>) -> AiSqlGenerator {
        AiSqlGenerator::new(client, Duration::from_secs(1), 50)
    }

    #[test]
    fn test_extract_prefers_sql_fence() {
        let reply = "Here you go:\n```sql\nSELECT * FROM rooms LIMIT 5;\n```\nand also SELECT 2";
        assert_eq!(
            extract_sql(reply).as_deref(),
            Some("SELECT * FROM rooms LIMIT 5;")
        );
    }

    #[test]
    fn test_extract_generic_fence_with_select() {
        let reply = "```\nnot sql\n```\n```\nselect id from tools\n```";
        assert_eq!(extract_sql(reply).as_deref(), Some("select id from tools"));
    }

    #[test]
    fn test_extract_bare_statement() {
        let reply = "The query is SELECT COUNT(*) FROM rooms; hope that helps";
        assert_eq!(
            extract_sql(reply).as_deref(),
            Some("SELECT COUNT(*) FROM rooms;")
        );
    }

    #[test]
    fn test_extract_ignores_prose_with() {
        let reply = "Sure, with pleasure! SELECT 1";
        assert_eq!(extract_sql(reply).as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_extract_cte() {
        let reply = "WITH busy AS (SELECT room_id FROM occupancy) SELECT * FROM busy";
        assert_eq!(extract_sql(reply).as_deref(), Some(reply));
    }

    #[test]
    fn test_extract_strips_reasoning() {
        let reply = "<think>maybe DELETE first?</think>SELECT 1";
        assert_eq!(extract_sql(reply).as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_extract_rejects_non_sql() {
        assert_eq!(extract_sql("I cannot help with that."), None);
        assert_eq!(extract_sql(""), None);
    }

    #[tokio::test]
    async fn test_generate_uses_schema_prompt() {
        let client = ScriptedClient::replying(Ok("```sql\nSELECT * FROM rooms\n```".to_string()));
        let generated = generator(client.clone())
            .generate("show rooms", &SchemaContext::hospital(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(generated.text, "SELECT * FROM rooms");
        assert_eq!(generated.source, SqlSource::AI);
        assert!(!generated.validated);

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("patient_records"));
        assert!(prompts[0].contains("LIMIT 50"));
    }

    #[tokio::test]
    async fn test_generate_maps_completion_errors() {
        let cancel = CancellationToken::new();
        let schema = SchemaContext::hospital();

        let timeout = generator(ScriptedClient::replying(Err(CompletionError::Timeout)))
            .generate("show rooms", &schema, &cancel)
            .await;
        assert_eq!(timeout, Err(GenError::Timeout));

        let down = generator(ScriptedClient::replying(Err(CompletionError::Unavailable(
            "connection refused".to_string(),
        ))))
        .generate("show rooms", &schema, &cancel)
        .await;
        assert!(matches!(down, Err(GenError::Unavailable(_))));

        let prose = generator(ScriptedClient::replying(Ok("No idea.".to_string())))
            .generate("show rooms", &schema, &cancel)
            .await;
        assert_eq!(prose, Err(GenError::MalformedOutput));
    }

    #[tokio::test]
    async fn test_generate_honours_cancellation() {
        let client = Arc::new(ScriptedClient {
            reply: Ok("SELECT 1".to_string()),
            delay: Duration::from_secs(30),
            prompts: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = generator(client)
            .generate("show rooms", &SchemaContext::hospital(), &cancel)
            .await;
        assert_eq!(result, Err(GenError::Cancelled));
    }

    #[tokio::test]
    async fn test_generate_enforces_timeout_on_slow_client() {
        // The client ignores the timeout it is handed
        let client = Arc::new(ScriptedClient {
            reply: Ok("SELECT 1".to_string()),
            delay: Duration::from_secs(30),
            prompts: Mutex::new(Vec::new()),
        });
        let generator = AiSqlGenerator::new(client, Duration::from_millis(50), 50);

        let started = std::time::Instant::now();
        let result = generator
            .generate("show rooms", &SchemaContext::hospital(), &CancellationToken::new())
            .await;
        assert_eq!(result, Err(GenError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
