//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{commentary_llm::OpenAiCommentaryAdapter, db::PgSombraStore},
    config::Config,
    error::ApiError,
    web::{
        eligibility_handler, history_handler, initialize_progress_handler, next_question_handler,
        record_response_handler,
        rest::ApiDoc,
        state::AppState,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use espelho_core::{SombraCatalog, SombraEngine};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgSombraStore::new(db_pool.clone()));
    info!("Running database migrations...");
    store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let commentary_adapter = Arc::new(OpenAiCommentaryAdapter::new(
        openai_client,
        config.commentary_model.clone(),
        Duration::from_secs(config.generation_timeout_secs),
    ));

    // --- 4. Load the Catalog & Build the Engine ---
    let catalog = match &config.catalog_path {
        Some(path) => {
            info!("Loading catalog override from {}", path.display());
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<SombraCatalog>(&raw)
                .map_err(|e| ApiError::Internal(format!("Invalid catalog file: {e}")))?
        }
        None => SombraCatalog::default(),
    };
    info!(
        "Catalog loaded: {} masters, {} questions",
        catalog.masters.len(),
        catalog.questions.len()
    );

    let engine = Arc::new(SombraEngine::new(store, commentary_adapter, catalog));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        engine,
        config: config.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    let api_router = Router::new()
        .route("/sombra/progress", post(initialize_progress_handler))
        .route("/sombra/eligibility", get(eligibility_handler))
        .route("/sombra/next-question", get(next_question_handler))
        .route(
            "/sombra/responses",
            post(record_response_handler).get(history_handler),
        )
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await.map_err(ApiError::Io)?;

    Ok(())
}
