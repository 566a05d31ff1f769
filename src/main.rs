use anyhow::{Context, Result};
use fleetpulse::api::{create_router, ApiState};
use fleetpulse::config::FleetConfig;
use fleetpulse::event::UpdateEventType;
use fleetpulse::status::HttpStatusProvider;
use fleetpulse::Scheduler;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetpulse=info".into()),
        )
        .init();

    info!("Fleetpulse starting...");

    let config = FleetConfig::from_env()?;

    let provider = HttpStatusProvider::new(
        config.provider.base_url.clone(),
        config.provider.request_timeout(),
    )?;
    info!(base_url = %config.provider.base_url, "Status provider configured");

    let scheduler = Scheduler::new(Arc::new(provider), &config);

    let defaults = config.schedule.intervals();
    for entity in &config.entities {
        scheduler
            .add_entity(entity.to_schedule(&defaults))
            .with_context(|| format!("invalid [[entities]] entry '{}'", entity.id))?;
    }

    // Lifecycle events in the service log
    let _log_subscription = scheduler.subscribe(|event| {
        match event.kind {
            UpdateEventType::StatusUpdate => {}
            UpdateEventType::ConnectivityLost => {
                warn!(entity_id = %event.entity_id, "Entity unreachable")
            }
            kind => info!(entity_id = %event.entity_id, event_type = %kind, "Entity event"),
        }
        Ok(())
    });

    scheduler.start();

    let app = create_router(Arc::new(ApiState {
        scheduler: scheduler.clone(),
    }))
    .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, entities = config.entities.len(), "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    scheduler.stop();
    info!("Fleetpulse stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
