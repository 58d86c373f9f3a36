pub mod config;
pub mod store;
pub mod sync;
pub mod web;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use config::Configuration;
use locshare_shared::now_millis;
use store::Store;
use sync::TelemetryEngine;
use web::AppState;
use ws::WsState;
use ws::registry::SubscriberRegistry;

const HISTORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub async fn run_hub() -> anyhow::Result<()> {
    let config = Configuration::create()?;

    // Seed a settings file on first run so operators have something to edit.
    let settings_file = config::settings::settings_file_path(&config.data_dir);
    if !settings_file.exists() {
        config::settings::write_settings(
            &settings_file,
            &config::settings::Settings {
                listen_host: Some(config.listen_host.clone()),
                listen_port: Some(config.listen_port),
                cors_origins: Some(config.cors_origins.clone()),
                history_retention_days: Some(config.history_retention_days),
            },
        )?;
    }

    info!(
        host = %config.listen_host,
        port = config.listen_port,
        retention_days = config.history_retention_days,
        "starting hub"
    );

    let db_path_str = config.db_path.to_string_lossy().to_string();
    let store = Arc::new(Store::new(&db_path_str)?);

    let jwt_secret = config::jwt_secret::get_or_create_jwt_secret(&config.data_dir)?;

    let registry = Arc::new(SubscriberRegistry::new());
    let engine = Arc::new(TelemetryEngine::new(store.clone(), registry.clone()));

    let app_state = AppState {
        jwt_secret: jwt_secret.clone(),
        engine: engine.clone(),
        store: store.clone(),
        registry: registry.clone(),
        cors_origins: config.cors_origins.clone(),
    };

    let ws_state = WsState {
        engine: engine.clone(),
        registry: registry.clone(),
        jwt_secret,
    };

    let web_router = web::build_router(app_state);
    let ws_router = ws::ws_router(ws_state);
    let app = web_router.merge(ws_router);

    // Periodic history retention cleanup
    let store_for_cleanup = store.clone();
    let retention_ms = config.history_retention_days * 24 * 60 * 60 * 1000;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HISTORY_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let cutoff = now_millis() - retention_ms;
            let conn = store_for_cleanup.conn();
            let removed = store::locations::delete_older_than(&conn, cutoff)
                .and_then(|a| store::batteries::delete_older_than(&conn, cutoff).map(|b| a + b));
            match removed {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "pruned expired telemetry history"),
                Err(e) => warn!(error = %e, "history cleanup failed"),
            }
        }
    });

    let addr = format!("{}:{}", config.listen_host, config.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");

    let shutdown_notify = Arc::new(tokio::sync::Notify::new());
    let shutdown_notify_srv = shutdown_notify.clone();

    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_notify_srv.notified().await;
            })
            .await
    });

    shutdown_signal().await;

    info!("closing all live channels");
    registry.close_all().await;

    shutdown_notify.notify_one();

    if tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .is_err()
    {
        info!("graceful shutdown timed out, forcing exit");
    }

    info!("hub stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
