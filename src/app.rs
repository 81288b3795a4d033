use crate::application::use_cases::ai_sql_generator::AiSqlGenerator;
use crate::application::use_cases::analysis_lookup::AnalysisLookup;
use crate::application::use_cases::fallback_sql_generator::FallbackSqlGenerator;
use crate::application::use_cases::general_delegation::GeneralDelegation;
use crate::application::use_cases::query_orchestrator::{OrchestratorSettings, QueryOrchestrator};
use crate::application::use_cases::sql_generator::SqlGenerator;
use crate::domain::error::Result;
use crate::domain::schema::SchemaContext;
use crate::infrastructure::analysis_store::JsonFileAnalysisStore;
use crate::infrastructure::config::{AppConfig, ConfigService};
use crate::infrastructure::db::postgres::PgConnectionFactory;
use crate::infrastructure::db::ConnectionPool;
use crate::infrastructure::llm_clients::{CompletionClient, RouterClient};
use crate::interfaces::http::start_server;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter.0))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Wire the request pipeline from configuration and an open pool.
pub fn build_orchestrator(config: &AppConfig, pool: ConnectionPool) -> QueryOrchestrator {
    let settings = OrchestratorSettings::from_query_config(&config.query);
    let fallback = FallbackSqlGenerator::new(settings.default_limit, settings.max_limit);

    let mut generators: Vec<Arc<dyn SqlGenerator>> = Vec::new();
    let general = if config.llm.enabled {
        let generation_timeout = Duration::from_millis(config.llm.generation_timeout_ms);
        let client: Arc<dyn CompletionClient> = Arc::new(RouterClient::new(config.llm.clone()));
        generators.push(Arc::new(AiSqlGenerator::new(
            Arc::clone(&client),
            generation_timeout,
            settings.default_limit,
        )));
        GeneralDelegation::new(client, generation_timeout)
    } else {
        info!("LLM disabled; using template SQL only");
        GeneralDelegation::help_only()
    };
    generators.push(Arc::new(fallback));

    let analysis = AnalysisLookup::new(Arc::new(JsonFileAnalysisStore::new(
        config.analysis.results_dir.clone(),
    )));

    QueryOrchestrator::new(
        Arc::new(SchemaContext::hospital()),
        pool,
        generators,
        analysis,
        general,
        settings,
    )
}

pub async fn run() -> Result<()> {
    let mut config = ConfigService::load()?;
    init_tracing(&config);

    if let Err(e) = ConfigService::resolve_llm_key(&mut config.llm) {
        warn!(error = %e, "LLM API key could not be resolved; AI generation disabled");
        config.llm.enabled = false;
    }

    let password = ConfigService::database_password(&config.database)?;
    let factory = PgConnectionFactory::from_config(
        &config.database,
        &password,
        config.query.statement_timeout(),
    )?;

    // Fails fast when the database cannot be reached at startup
    let pool = ConnectionPool::connect(Arc::new(factory), config.pool.to_settings()).await?;

    let orchestrator = Arc::new(build_orchestrator(&config, pool.clone()));
    info!(
        schema = orchestrator.schema().version(),
        llm_enabled = config.llm.enabled,
        provider = ?config.llm.provider,
        "Query orchestrator ready"
    );

    let server = start_server(orchestrator, &config.http.bind_address, config.http.port)?;
    let served = server.await;

    pool.close();
    info!("Shut down");
    served.map_err(Into::into)
}
