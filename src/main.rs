use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use voice_bridge::config::BridgeConfig;
use voice_bridge::conversation::{
    ConversationOrchestrator, GeneratorConfig, LlmResponseGenerator, OrchestratorConfig,
};
use voice_bridge::error::ConfigError;
use voice_bridge::identity::{FilePointerStore, SessionIdentityResolver};
use voice_bridge::lesson::seed::load_lessons_file;
use voice_bridge::lesson::{
    EducationalSessionEngine, EngineConfig, HttpReportGenerator, LlmPersonalizer,
};
use voice_bridge::llm::{LlmConfig, create_provider};
use voice_bridge::store::{Database, LibSqlBackend};
use voice_bridge::stream::ResponseStreamAdapter;
use voice_bridge::webhook::{BridgeState, bridge_routes};

/// Console logging, plus a daily-rolling file when `VOICE_BRIDGE_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("VOICE_BRIDGE_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "voice-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let config = BridgeConfig::from_env().context("invalid configuration")?;

    // ── Storage ───────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );

    if let Some(path) = &config.lessons_file {
        load_lessons_file(path, db.as_ref())
            .await
            .with_context(|| format!("loading lessons from {}", path.display()))?;
    }

    let pointer = Arc::new(FilePointerStore::new(&config.pointer_path));
    pointer
        .ensure_dir()
        .await
        .context("preparing session pointer directory")?;

    // ── LLM ───────────────────────────────────────────────────────────────
    let key_var = LlmConfig::api_key_var(config.llm_backend);
    let api_key = std::env::var(key_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

    let llm_config = LlmConfig {
        backend: config.llm_backend,
        api_key: SecretString::from(api_key),
        model: config
            .llm_model
            .clone()
            .unwrap_or_else(|| LlmConfig::default_model(config.llm_backend).to_string()),
    };
    let llm = create_provider(&llm_config).context("creating LLM provider")?;

    // ── Bridge components ─────────────────────────────────────────────────
    let reports = Arc::new(HttpReportGenerator::new(config.report_url.clone()));
    if !reports.is_configured() {
        tracing::warn!("VOICE_BRIDGE_REPORT_URL not set, lesson reports are disabled");
    }

    let engine = Arc::new(EducationalSessionEngine::new(
        Arc::clone(&db),
        Arc::new(LlmPersonalizer::new(llm.clone())),
        reports,
        EngineConfig {
            report_timeout: config.report_timeout,
            personalize_timeout: config.personalize_timeout,
            retry_window: config.retry_window,
        },
    ));

    let resolver = Arc::new(SessionIdentityResolver::new(
        pointer,
        config.identity_max_retries,
        config.identity_backoff_base,
    ));

    let generator = Arc::new(LlmResponseGenerator::new(
        llm.clone(),
        GeneratorConfig::default(),
    ));

    let orchestrator = Arc::new(ConversationOrchestrator::new(
        Arc::clone(&db),
        resolver,
        engine,
        generator,
        OrchestratorConfig {
            generation_timeout: config.generation_timeout,
            ..OrchestratorConfig::default()
        },
    ));

    let adapter = Arc::new(ResponseStreamAdapter::new(
        config.model_label.clone(),
        config.stream_mode,
    ));

    let app = bridge_routes(BridgeState {
        orchestrator,
        adapter,
    });

    // ── Serve ─────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;

    tracing::info!(
        port = config.port,
        model = llm.model_name(),
        stream_mode = ?config.stream_mode,
        "Voice bridge listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
