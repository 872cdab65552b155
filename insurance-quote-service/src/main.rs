use insurance_quote_service::{
    ServiceConfig,
    collaborators::{
        Collaborators, EmbeddingKnowledgeBase, LanguageModel, OfflineModel, OpenRouterModel,
        OpenRouterVisionExtractor,
    },
    service::{AppState, router},
    workflow::build_runner,
};
use quote_flow::{InMemorySessionStorage, PostgresSessionStorage, SessionStorage};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "insurance_quote_service=debug,quote_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

async fn session_storage(config: &ServiceConfig) -> Arc<dyn SessionStorage> {
    let Some(database_url) = &config.database_url else {
        info!("Using in-memory session storage (set DATABASE_URL to use PostgreSQL)");
        return Arc::new(InMemorySessionStorage::new());
    };

    info!("Using PostgreSQL session storage");
    match PostgresSessionStorage::connect(database_url).await {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            error!(
                "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                e
            );
            Arc::new(InMemorySessionStorage::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    init_tracing();

    let model: Arc<dyn LanguageModel> = match &config.openrouter_api_key {
        Some(api_key) => Arc::new(OpenRouterModel::new(api_key, &config.llm_model)),
        None => {
            warn!("OPENROUTER_API_KEY not set, replies will use the offline fallback");
            Arc::new(OfflineModel)
        }
    };

    info!("Embedding knowledge base documents");
    let knowledge = EmbeddingKnowledgeBase::with_insurance_documents().await?;

    let collaborators = Collaborators::new(
        model,
        Arc::new(knowledge),
        Arc::new(OpenRouterVisionExtractor::new(
            config.openrouter_api_key.clone(),
            &config.vision_model,
        )),
    )
    .with_timeouts(config.timeouts);

    let runner = build_runner(
        collaborators.clone(),
        session_storage(&config).await,
        config.max_chat_messages,
    );

    let app = router(AppState {
        runner,
        collaborators,
    });

    let address = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Server running on http://{}", address);

    axum::serve(listener, app).await?;
    Ok(())
}
