use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use inbox_assist::api::workflow_routes;
use inbox_assist::config::{ServerConfig, WorkflowConfig};
use inbox_assist::llm::{LlmAssistant, LlmConfig, create_provider};
use inbox_assist::mail::{GmailConfig, GmailMailStore};
use inbox_assist::notify::{SlackConfig, SlackNotifier};
use inbox_assist::store::{CheckpointStore, InMemoryCheckpointStore, LibSqlCheckpointStore};
use inbox_assist::workflow::{EngineDeps, WorkflowEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server = ServerConfig::from_env()?;

    // Console logging always; a daily rolling file when INBOX_LOG_DIR is set.
    let (file_layer, _log_guard) = match &server.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    let workflow = WorkflowConfig::from_env()?;
    let llm_config = LlmConfig::from_env()?;

    eprintln!("📬 Inbox Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({:?})", llm_config.model, llm_config.backend);
    eprintln!("   API: http://0.0.0.0:{}/api/workflow", server.port);
    eprintln!("   Slack actions: http://0.0.0.0:{}/slack/actions", server.port);

    // ── Checkpoints ──────────────────────────────────────────────────────
    let store: Arc<dyn CheckpointStore> = match &server.db_path {
        Some(path) => Arc::new(
            LibSqlCheckpointStore::new_local(path)
                .await
                .with_context(|| format!("opening checkpoint database at {}", path.display()))?,
        ),
        None => {
            tracing::warn!("Using in-memory checkpoints; paused runs will not survive a restart");
            Arc::new(InMemoryCheckpointStore::new())
        }
    };

    // ── Collaborators ────────────────────────────────────────────────────
    let llm = create_provider(&llm_config)?;
    let deps = EngineDeps {
        store,
        mail: Arc::new(GmailMailStore::new(GmailConfig::from_env()?)),
        assistant: Arc::new(LlmAssistant::new(llm)),
        notifier: Arc::new(SlackNotifier::new(SlackConfig::from_env()?)),
    };
    let engine = Arc::new(WorkflowEngine::new(workflow, deps));

    match engine.active_runs().await {
        Ok(runs) if !runs.is_empty() => {
            tracing::info!(count = runs.len(), "Resuming with paused workflow runs on record");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not list active runs"),
    }

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = workflow_routes(engine);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server.port))
        .await
        .with_context(|| format!("binding port {}", server.port))?;
    tracing::info!(port = server.port, "Workflow API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
            }
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
