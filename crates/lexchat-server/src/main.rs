use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use lexchat_api::chat;
use lexchat_api::middleware::require_auth;
use lexchat_api::{AppState, AppStateInner};
use lexchat_gateway::connection;
use lexchat_gateway::registry::Registry;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    registry: Registry,
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
                .unwrap_or_else(|_| "lexchat=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("LEXCHAT_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("LEXCHAT_DB_PATH").unwrap_or_else(|_| "lexchat.db".into());
    let host = std::env::var("LEXCHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("LEXCHAT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(lexchat_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let registry = Registry::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        registry: registry.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        app: app_state.clone(),
        registry: registry.clone(),
        jwt_secret: jwt_secret.clone(),
    };

    // Routes
    let chat_routes = Router::new()
        .route("/chat/conversations", get(chat::get_conversations))
        .route("/chat/messages/{partner_id}/{partner_type}", get(chat::get_messages))
        .route("/chat/messages/read/{partner_id}/{partner_type}", put(chat::mark_read))
        .route("/chat/unread", get(chat::unread_count))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(chat_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Lexchat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.registry, state.app.db.clone(), state.jwt_secret)
    })
}
