use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use swole_challenge::config::parse_duration;
use swole_challenge::{LifecycleConfig, LifecycleController};
use swole_gateway::relay::RelayGateway;
use swole_gateway::{ChatGateway, ReactionSink, connection};

#[derive(Clone)]
struct ServerState {
    relay: RelayGateway,
    controller: Arc<LifecycleController>,
    shim_token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swole=debug,tower_http=info".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("SWOLE_DB_PATH").unwrap_or_else(|_| "swole.db".into());
    let host = std::env::var("SWOLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("SWOLE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    // Shared secret the platform shim presents on the gateway upgrade.
    let shim_token =
        std::env::var("SWOLE_SHIM_TOKEN").unwrap_or_else(|_| "dev-token-change-me".into());

    let mut cfg = LifecycleConfig::default();
    if let Ok(raw) = std::env::var("SWOLE_POLL_INTERVAL") {
        cfg.poll_interval = parse_duration(&raw)?;
    }

    // Init database
    let db = Arc::new(swole_db::Database::open(&PathBuf::from(&db_path))?);

    // Gateway + lifecycle controller
    let relay = RelayGateway::new();
    let gateway: Arc<dyn ChatGateway> = Arc::new(relay.clone());
    let controller = Arc::new(LifecycleController::new(db, gateway, cfg));
    tokio::spawn(controller.clone().run());

    let state = ServerState {
        relay,
        controller,
        shim_token,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Swole server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct ShimParams {
    token: String,
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(params): Query<ShimParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if params.token != state.shim_token {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let reactions: Arc<dyn ReactionSink> = state.controller.clone();
    ws.on_upgrade(move |socket| {
        connection::handle_shim_connection(socket, state.relay.clone(), reactions)
    })
    .into_response()
}
