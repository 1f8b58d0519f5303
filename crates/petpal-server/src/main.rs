mod config;
mod sweep;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use petpal_api::auth::{AppState, AppStateInner};
use petpal_db::{BlobStore, Database};
use petpal_gateway::connection;
use petpal_gateway::dispatcher::Dispatcher;
use petpal_social::{Backend, MutationCoordinator};

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "petpal_server=debug,petpal_social=debug,petpal_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if !config.has_usable_secret() {
        eprintln!("FATAL: PETPAL_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    // Init database and blob storage
    let db = Arc::new(Database::open(&config.db_path)?);
    let blobs = BlobStore::new(config.storage_dir.clone(), &config.public_url).await?;

    let dispatcher = Dispatcher::new(db);
    let coordinator = MutationCoordinator::new(Backend::new(dispatcher.clone()), config.retention);

    tokio::spawn(sweep::run_sweep_loop(coordinator.clone(), config.sweep_interval_secs));

    let app_state: AppState = Arc::new(AppStateInner {
        coordinator,
        blobs,
        jwt_secret: config.jwt_secret.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(GatewayState {
            dispatcher,
            jwt_secret: config.jwt_secret.clone(),
        });

    let app = Router::new()
        .merge(petpal_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("PetPal server listening on {}", addr);
    info!(
        "Notification retention: {} per recipient, {} days",
        config.retention.max_per_recipient, config.retention.max_age_days
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.jwt_secret)
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
