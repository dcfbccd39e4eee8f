//! HTTP transport for the JSON-RPC tool surface, plus graceful shutdown.

use crate::config::ServerConfig;
use crate::rpc::schema::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::rpc::tools::{self, ToolState};
use crate::session::SessionConductor;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use log::{error, info};
use std::sync::Arc;

pub fn build_router(state: Arc<ToolState>) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .with_state(state)
}

async fn handle_rpc(
    State(state): State<Arc<ToolState>>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let id = request.id.clone();
    match tools::dispatch(&state, &request.method, request.params).await {
        Ok(result) => Json(JsonRpcResponse::ok(id, result)),
        Err(e) => {
            error!("{} failed: {e}", request.method);
            Json(JsonRpcResponse::err(id, JsonRpcError::from(&e)))
        }
    }
}

/// Bind, serve, and block until a Ctrl-C (or other registered signal) asks
/// for shutdown — at which point every live session is closed before
/// returning, so no debuggee is left running under a dead debugger.
pub async fn serve(config: ServerConfig, conductor: SessionConductor) -> anyhow::Result<()> {
    let bind = config.bind;
    let state = Arc::new(ToolState::new(conductor, config));
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("listening on {bind}");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut shutdown_tx = Some(shutdown_tx);
    ctrlc::set_handler(move || {
        if let Some(tx) = shutdown_tx.take() {
            let _ = tx.send(());
        }
    })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
            info!("shutdown signal received, closing sessions");
        })
        .await?;

    state.conductor.close_all().await;
    Ok(())
}
