use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slidesmith_core::artifact::{FsObjectStore, ObjectStore};
use slidesmith_core::compiler::JsonDeckCompiler;
use slidesmith_core::config::TextBackend;
use slidesmith_core::genai::{
    AnthropicTextClient, ImageGenerator, OllamaTextClient, OpenAiImageClient, TextGenerator,
};
use slidesmith_core::{
    load_config, JobDispatcher, JobRunner, JobStore, SqliteJobStore, StageExecutors,
};

use slidesmith_server::api::create_router;
use slidesmith_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("SLIDESMITH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Artifact root: {:?}", config.artifacts.root);

    // Create SQLite job store
    let job_store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    // Create artifact store
    let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.artifacts.root));

    // Create the text generation client
    let text: Arc<dyn TextGenerator> = match config.text_model.backend {
        TextBackend::Anthropic => {
            let api_key = match &config.text_model.api_key {
                Some(key) if !key.is_empty() => key.clone(),
                _ => bail!("text_model.api_key is required for the anthropic backend"),
            };
            let mut client = AnthropicTextClient::new(api_key, config.text_model.model.clone());
            if let Some(ref base) = config.text_model.api_base {
                client = client.with_api_base(base.clone());
            }
            info!("Using Anthropic text model: {}", config.text_model.model);
            Arc::new(client)
        }
        TextBackend::Ollama => {
            let mut client = OllamaTextClient::new(config.text_model.model.clone());
            if let Some(ref base) = config.text_model.api_base {
                client = client.with_api_base(base.clone());
            }
            info!("Using Ollama text model: {}", config.text_model.model);
            Arc::new(client)
        }
    };

    // Create the image generation client
    let mut image_client = OpenAiImageClient::new(
        config.image_model.api_key.clone(),
        config.image_model.model.clone(),
    )
    .with_size(config.image_model.size.clone());
    if let Some(ref base) = config.image_model.api_base {
        image_client = image_client.with_api_base(base.clone());
    }
    let image: Arc<dyn ImageGenerator> = Arc::new(image_client);
    info!("Using image model: {}", config.image_model.model);

    // Wire up the pipeline
    let executors = Arc::new(StageExecutors::new(
        text,
        image,
        Arc::new(JsonDeckCompiler::new()),
        Arc::clone(&objects),
        config.pipeline.clone(),
    ));
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&job_store),
        executors,
        config.pipeline.clone(),
    ));

    // Start the dispatcher
    let dispatcher = Arc::new(JobDispatcher::new(config.dispatch.clone()));
    dispatcher.start(Arc::clone(&runner));
    info!("Dispatcher started with {} workers", config.dispatch.workers);

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        job_store,
        objects,
        Arc::clone(&dispatcher),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    dispatcher.stop();
    info!("Dispatcher stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
