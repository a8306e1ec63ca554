//! Localhost HTTP API.
//!
//! JSON over HTTP/1.1 on `127.0.0.1:<port>`. Success envelope is
//! `{ok:true, ...}`; failures use `ApiError`'s envelope. Long-poll
//! routes additionally report `timedOut` and `nextAfter`.

mod error;
mod handlers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use argus_cdp::{CdpSession, SourceMode};
use argus_core::matching::TargetInfo;
use argus_core::record::WatcherRecord;
use argus_core::types::{LogEvent, NetworkRequestSummary};
use argus_core::util::now_ms;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::buffer::EventBuffer;
use crate::controllers::{Controller, EmulationSettings, ThrottleSettings};
use crate::ops::trace::TraceRecorder;
use crate::pipeline::PageContext;

pub use error::ApiError;

/// Wire-stable protocol version reported by `/status`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Per-request observability hook payload.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub endpoint: String,
    pub remote_address: String,
    pub query: Option<String>,
    pub ts: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<StateInner>,
}

pub struct StateInner {
    pub watcher_id: String,
    pub mode: SourceMode,
    pub record: StdMutex<WatcherRecord>,
    pub session: CdpSession,
    pub logs: Arc<EventBuffer<LogEvent>>,
    pub net: Arc<EventBuffer<NetworkRequestSummary>>,
    pub emulation: StdMutex<Controller<EmulationSettings>>,
    pub throttle: StdMutex<Controller<ThrottleSettings>>,
    pub trace: TraceRecorder,
    pub artifact_dir: PathBuf,
    pub page: Arc<StdMutex<PageContext>>,
    pub current_target: StdMutex<Option<TargetInfo>>,
    pub cancel: CancellationToken,
    /// Fan-out of `RequestInfo` to whoever supervises this watcher.
    pub request_hook: broadcast::Sender<RequestInfo>,
}

impl AppState {
    pub fn attached(&self) -> bool {
        self.inner.session.is_attached()
            && self
                .inner
                .current_target
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_some()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/logs", get(handlers::logs))
        .route("/tail", get(handlers::tail))
        .route("/net", get(handlers::net))
        .route("/net/tail", get(handlers::net_tail))
        .route("/eval", post(handlers::eval))
        .route("/trace/start", post(handlers::trace_start))
        .route("/trace/stop", post(handlers::trace_stop))
        .route("/screenshot", post(handlers::screenshot))
        .route("/snapshot", post(handlers::snapshot))
        .route("/dom/{op}", post(handlers::dom))
        .route(
            "/emulation",
            get(handlers::emulation_get).post(handlers::emulation_set),
        )
        .route(
            "/throttle",
            get(handlers::throttle_get).post(handlers::throttle_set),
        )
        .route("/storage/local", post(handlers::storage_local))
        .route("/reload", post(handlers::reload))
        .route("/shutdown", post(handlers::shutdown))
        .route("/targets", get(handlers::extension_only))
        .route("/attach", post(handlers::extension_only))
        .route("/detach", post(handlers::extension_only))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_hook,
        ))
        .with_state(state)
}

/// Bind-and-serve until the cancellation token fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
) -> std::io::Result<()> {
    let cancel = state.inner.cancel.clone();
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
}

async fn request_hook(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let info = RequestInfo {
        endpoint: request.uri().path().to_owned(),
        remote_address: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default(),
        query: request.uri().query().map(str::to_owned),
        ts: now_ms(),
    };
    tracing::debug!(endpoint = %info.endpoint, remote = %info.remote_address, "request");
    let _ = state.inner.request_hook.send(info);
    next.run(request).await
}
