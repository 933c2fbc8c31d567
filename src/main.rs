use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use tailorcraft_api::config::{init_tracing, load_config};
use tailorcraft_api::services::{AppServices, HttpPaymentGateway, PaymentGateway};
use tailorcraft_api::{build_router, db, events, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_tracing(config.log_level(), config.log_json);
    info!(environment = %config.environment, "starting tailorcraft-api");

    let pool = Arc::new(db::establish_connection_from_app_config(&config).await?);
    if config.auto_migrate {
        db::run_migrations(&pool).await?;
        info!("database migrations applied");
    }

    let (event_tx, event_rx) = tokio::sync::mpsc::channel(1024);
    let event_sender = events::EventSender::new(event_tx);
    tokio::spawn(events::process_events(event_rx));

    let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpPaymentGateway::new(&config.gateway)?);
    let services = AppServices::build(pool.clone(), &config, gateway, event_sender.clone());

    // Periodic sweep reverting orders whose checkout session expired.
    let expiry_payments = services.payments.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(15 * 60));
        loop {
            ticker.tick().await;
            if let Err(e) = expiry_payments.expire_stale_payments().await {
                error!(error = %e, "payment expiry sweep failed");
            }
        }
    });

    let state = AppState {
        db: pool,
        config: Arc::new(config.clone()),
        services,
        event_sender,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
