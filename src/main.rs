use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use contact_cadence::api::api_routes;
use contact_cadence::cadence::CadenceController;
use contact_cadence::config::{DeliveryConfig, EngineConfig};
use contact_cadence::platform::{Delivery, DryRunDelivery, PatternResolver, WebhookDelivery};
use contact_cadence::store::{LibSqlRecordStore, RecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let delivery_config = DeliveryConfig::from_env().context("Invalid delivery configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📬 Contact Cadence v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", config.port);
    eprintln!("   Decision stream: ws://0.0.0.0:{}/ws", config.port);
    eprintln!(
        "   Send delay: {}-{}s, on delivery failure: {:?}",
        config.send_delay_min.as_secs(),
        config.send_delay_max.as_secs(),
        config.failure_policy
    );

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = Arc::new(
        LibSqlRecordStore::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Platform collaborators ──────────────────────────────────────────
    let delivery: Arc<dyn Delivery> = match &delivery_config.webhook_url {
        Some(url) => {
            eprintln!("   Delivery: webhook {url}");
            Arc::new(WebhookDelivery::new(&delivery_config)?)
        }
        None => {
            eprintln!("   Delivery: dry run (CADENCE_DELIVERY_URL not set)");
            Arc::new(DryRunDelivery)
        }
    };
    let resolver = Arc::new(
        PatternResolver::new(&config.profile_id_pattern).context("Invalid profile id pattern")?,
    );

    // ── Controller + HTTP ───────────────────────────────────────────────
    let controller = Arc::new(CadenceController::from_config(
        &config, store, delivery, resolver,
    ));
    let app = api_routes(controller);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!(port = config.port, "Cadence server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

/// stderr logging filtered by `RUST_LOG`, plus a daily rolling file when a
/// log directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cadence.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .init();

    guard
}
