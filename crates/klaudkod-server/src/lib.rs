pub mod protocol;
pub mod session;
pub mod state;

use anyhow::Context;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use klaudkod_core::config::AppConfig;
use klaudkod_core::provider::OpenAiProvider;
use klaudkod_core::tool_registry::ToolRegistry;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub use state::AppState;

/// Build the axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = state.config.server.cors;

    let mut app = Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}

async fn health() -> &'static str {
    "OK"
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max_message_size = state.config.session.max_message_size;
    let session_id = Uuid::new_v4().to_string();

    ws.max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| session::handle_socket(socket, state, session_id))
}

/// Start the HTTP server and run until Ctrl-C.
pub async fn serve(config: AppConfig, tool_registry: Arc<ToolRegistry>) -> anyhow::Result<()> {
    let provider = Arc::new(OpenAiProvider::new(&config.provider));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, tool_registry, provider);
    let shutdown = state.shutdown.clone();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Starting klaudkod server on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await
        .context("Server failed")?;

    Ok(())
}
