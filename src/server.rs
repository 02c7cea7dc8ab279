//! HTTP surface and the tick pump: the service shell that stands in for
//! the host's main-thread callback. Handlers are thin adapters over the
//! entry points in `api`; the pump owns the executor and the flush and
//! retention cadences.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::api::{self, SubmitBatchRequest};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::host::CommandExecutor;
use crate::scheduler::CommandQueue;

#[derive(Clone)]
pub struct BridgeState {
    pub queue: Arc<RwLock<CommandQueue>>,
    pub config: Arc<BridgeConfig>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct CancelRequest {
    #[serde(default)]
    agent: String,
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

pub fn router(state: BridgeState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/batches", post(submit_handler))
        .route("/api/batches/{ticket}", get(poll_handler))
        .route("/api/batches/{ticket}/cancel", post(cancel_handler))
        .route("/api/queue", get(queue_status_handler))
        .layer(cors)
        .with_state(state)
}

async fn submit_handler(
    State(state): State<BridgeState>,
    Json(request): Json<SubmitBatchRequest>,
) -> impl IntoResponse {
    let persist = request.persist;
    let mut queue = state.queue.write().await;
    match api::submit_batch(&mut queue, &state.config, request) {
        Ok(response) => {
            // A hinted submission is durable before the ticket leaves the
            // process.
            if persist {
                if let Some(path) = state.config.state_path.as_deref() {
                    if let Err(error) = queue.save_to(path) {
                        tracing::error!(error = %error, "State flush after hinted submit failed");
                    }
                }
            }
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(error) => error_response(error).into_response(),
    }
}

async fn poll_handler(
    State(state): State<BridgeState>,
    Path(ticket): Path<String>,
) -> impl IntoResponse {
    let queue = state.queue.read().await;
    match api::poll(&queue, &ticket) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("Unknown ticket: {ticket}"),
            }),
        )
            .into_response(),
    }
}

async fn cancel_handler(
    State(state): State<BridgeState>,
    Path(ticket): Path<String>,
    Json(request): Json<CancelRequest>,
) -> impl IntoResponse {
    let cancelled = state.queue.write().await.cancel(&ticket, &request.agent);
    Json(CancelResponse { cancelled })
}

async fn queue_status_handler(State(state): State<BridgeState>) -> impl IntoResponse {
    let queue = state.queue.read().await;
    Json(api::queue_status(&queue))
}

fn error_response(error: BridgeError) -> (StatusCode, Json<ErrorBody>) {
    let status = match error {
        BridgeError::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        BridgeError::EmptyBatch => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
}

/// Serve the HTTP API until the shutdown token fires or the server fails.
/// Whichever way it returns, the token is cancelled on the way out: the
/// pump watches the same token, and a dead server must take it along
/// instead of leaving it ticking an unreachable queue.
pub async fn run_server(
    addr: SocketAddr,
    state: BridgeState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting bridge API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind bridge API server");
            shutdown.cancel();
            return Err(e);
        }
    };

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "Bridge API server failed");
    }
    shutdown.cancel();
    served
}

/// Drive the scheduling tick on the configured cadence until the shutdown
/// token fires. The pump owns the executor; the queue's own guarantee that
/// only one tick runs at a time falls out of holding the write lock for
/// the duration of each tick. Expired jobs are cleaned and the state file
/// flushed on their own slower cadences, plus one final flush on the way
/// out.
pub fn spawn_pump(
    state: BridgeState,
    mut executor: impl CommandExecutor + Send + 'static,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(state.config.tick_interval);
        let mut last_flush = Instant::now();
        let mut last_clean = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let mut queue = state.queue.write().await;
                    flush_if_dirty(&mut queue, &state.config);
                    tracing::info!("Pump stopped");
                    break;
                }
                _ = tick.tick() => {
                    let mut queue = state.queue.write().await;
                    queue.process_tick(&mut executor);
                    if last_clean.elapsed() >= state.config.clean_interval {
                        queue.clean_expired(state.config.retention);
                        last_clean = Instant::now();
                    }
                    if queue.needs_flush() && last_flush.elapsed() >= state.config.flush_interval {
                        flush_if_dirty(&mut queue, &state.config);
                        last_flush = Instant::now();
                    }
                }
            }
        }
    })
}

fn flush_if_dirty(queue: &mut CommandQueue, config: &BridgeConfig) {
    let Some(path) = config.state_path.as_deref() else {
        return;
    };
    if !queue.needs_flush() {
        return;
    }
    if let Err(error) = queue.save_to(path) {
        tracing::error!(error = %error, "State flush failed");
    }
}

/// Cancellation token that fires on SIGTERM or SIGINT. The pump and the
/// HTTP server both watch it and drain before exiting.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let signalled = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
            }
        }

        signalled.cancel();
    });

    token
}
