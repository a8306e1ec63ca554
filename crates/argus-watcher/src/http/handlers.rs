//! Route handlers.

use std::time::Duration;

use argus_cdp::SourceMode;
use argus_core::filter::{LogFilter, LogFilterParams, NetFilter};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::buffer::{clamp_limit, clamp_wait_ms};
use crate::controllers::{EmulationSettings, ThrottleSettings};
use crate::error::WatcherError;
use crate::ops;
use crate::ops::dom::{DomOp, DomRequest};

use super::{ApiError, AppState, PROTOCOL_VERSION};

// ─── Small helpers ───────────────────────────────────────────────────

struct Params(Vec<(String, String)>);

impl Params {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn parse_u64(&self, key: &str) -> Result<Option<u64>, ApiError> {
        self.get(key)
            .map(|raw| {
                raw.parse::<u64>()
                    .map_err(|_| ApiError::validation(format!("{key} must be an integer")))
            })
            .transpose()
    }

    fn parse_i64(&self, key: &str) -> Result<Option<i64>, ApiError> {
        self.get(key)
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|_| ApiError::validation(format!("{key} must be an integer")))
            })
            .transpose()
    }

    fn parse_bool(&self, key: &str) -> Result<Option<bool>, ApiError> {
        self.get(key)
            .map(|raw| match raw {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ApiError::validation(format!("{key} must be a boolean"))),
            })
            .transpose()
    }
}

fn parse_body<T: DeserializeOwned>(bytes: &Bytes) -> Result<T, ApiError> {
    let result = if bytes.is_empty() {
        serde_json::from_value(Value::Object(Default::default()))
    } else {
        serde_json::from_slice(bytes)
    };
    result.map_err(|err| ApiError::validation(format!("invalid body: {err}")))
}

fn log_filter(params: &Params) -> Result<LogFilter, ApiError> {
    let mut levels = Vec::new();
    for raw in params.all("levels") {
        for piece in raw.split(',').filter(|p| !p.is_empty()) {
            levels.push(piece.parse().map_err(ApiError::validation)?);
        }
    }
    LogFilterParams {
        levels,
        match_patterns: params.all("match").map(str::to_owned).collect(),
        ignore_case: params.parse_bool("ignoreCase")?.unwrap_or(false),
        source: params.get("source").map(str::to_owned),
        since_ts: params.parse_i64("sinceTs")?,
    }
    .compile()
    .map_err(|err| ApiError::validation(err.to_string()))
}

fn net_filter(params: &Params) -> Result<NetFilter, ApiError> {
    Ok(NetFilter {
        since_ts: params.parse_i64("sinceTs")?,
        url: params.get("url").map(str::to_owned),
    })
}

fn ok(mut payload: Value) -> Json<Value> {
    if let Some(map) = payload.as_object_mut() {
        map.insert("ok".to_owned(), Value::Bool(true));
    }
    Json(payload)
}

// ─── Status and buffers ──────────────────────────────────────────────

pub(super) async fn status(State(state): State<AppState>) -> Json<Value> {
    let inner = &state.inner;
    let record = inner.record.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let target = inner
        .current_target
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    let page = inner.page.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let mode = match inner.mode {
        SourceMode::Cdp => "cdp",
        SourceMode::Extension => "extension",
    };
    ok(json!({
        "protocolVersion": PROTOCOL_VERSION,
        "mode": mode,
        "attached": state.attached(),
        "target": target,
        "page": {"url": page.url, "title": page.title},
        "buffers": {
            "logs": inner.logs.stats(),
            "net": inner.net.stats(),
        },
        "watcher": record,
    }))
}

pub(super) async fn logs(
    State(state): State<AppState>,
    Query(raw): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let params = Params(raw);
    let after = params.parse_u64("after")?.unwrap_or(0);
    let limit = clamp_limit(params.parse_u64("limit")?.map(|v| v as usize));
    let filter = log_filter(&params)?;
    let (events, next_after) = state
        .inner
        .logs
        .list_after(after, |event| filter.matches(event), limit);
    Ok(ok(json!({"events": events, "nextAfter": next_after})))
}

pub(super) async fn tail(
    State(state): State<AppState>,
    Query(raw): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let params = Params(raw);
    let after = params.parse_u64("after")?.unwrap_or(0);
    let limit = clamp_limit(params.parse_u64("limit")?.map(|v| v as usize));
    let wait_ms = clamp_wait_ms(params.parse_u64("waitMs")?);
    let filter = log_filter(&params)?;
    let (events, next_after, timed_out) = state
        .inner
        .logs
        .wait_for_after(
            after,
            |event| filter.matches(event),
            limit,
            Duration::from_millis(wait_ms),
        )
        .await;
    Ok(ok(json!({
        "events": events,
        "nextAfter": next_after,
        "timedOut": timed_out,
    })))
}

pub(super) async fn net(
    State(state): State<AppState>,
    Query(raw): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let params = Params(raw);
    let after = params.parse_u64("after")?.unwrap_or(0);
    let limit = clamp_limit(params.parse_u64("limit")?.map(|v| v as usize));
    let filter = net_filter(&params)?;
    let (requests, next_after) = state
        .inner
        .net
        .list_after(after, |summary| filter.matches(summary), limit);
    Ok(ok(json!({"requests": requests, "nextAfter": next_after})))
}

pub(super) async fn net_tail(
    State(state): State<AppState>,
    Query(raw): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let params = Params(raw);
    let after = params.parse_u64("after")?.unwrap_or(0);
    let limit = clamp_limit(params.parse_u64("limit")?.map(|v| v as usize));
    let wait_ms = clamp_wait_ms(params.parse_u64("waitMs")?);
    let filter = net_filter(&params)?;
    let (requests, next_after, timed_out) = state
        .inner
        .net
        .wait_for_after(
            after,
            |summary| filter.matches(summary),
            limit,
            Duration::from_millis(wait_ms),
        )
        .await;
    Ok(ok(json!({
        "requests": requests,
        "nextAfter": next_after,
        "timedOut": timed_out,
    })))
}

// ─── CDP-backed ops ──────────────────────────────────────────────────

pub(super) async fn eval(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = parse_body(&body)?;
    let response = ops::eval::eval(&state.inner.session, request).await?;
    Ok(ok(json!({
        "result": response.result,
        "type": response.kind,
        "exception": response.exception,
    })))
}

pub(super) async fn dom(
    State(state): State<AppState>,
    Path(op): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let Some(op) = DomOp::from_path(&op) else {
        return Err(ApiError::not_found(format!("unknown dom op: {op}")));
    };
    let request: DomRequest = parse_body(&body)?;
    let result = ops::dom::dom_op(&state.inner.session, op, request).await?;
    Ok(ok(result))
}

pub(super) async fn screenshot(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = parse_body(&body)?;
    let result =
        ops::screenshot::screenshot(&state.inner.session, &state.inner.artifact_dir, request)
            .await?;
    Ok(ok(result))
}

pub(super) async fn snapshot(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let result = ops::snapshot::snapshot(&state.inner.session).await?;
    Ok(ok(result))
}

pub(super) async fn trace_start(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let result = state.inner.trace.start(&state.inner.session).await?;
    Ok(ok(result))
}

pub(super) async fn trace_stop(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let result = state
        .inner
        .trace
        .stop(&state.inner.session, &state.inner.artifact_dir)
        .await?;
    Ok(ok(result))
}

pub(super) async fn storage_local(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = parse_body(&body)?;
    let result = ops::storage::local_storage(&state.inner.session, request).await?;
    Ok(ok(result))
}

pub(super) async fn reload(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = parse_body(&body)?;
    let (target_id, current_url) = {
        let target = state
            .inner
            .current_target
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let page = state.inner.page.lock().unwrap_or_else(|e| e.into_inner());
        let id = target.as_ref().map(|t| t.id.clone());
        let url = page
            .url
            .clone()
            .or_else(|| target.as_ref().map(|t| t.url.clone()));
        (id, url)
    };
    let Some(target_id) = target_id else {
        return Err(WatcherError::Cdp(argus_cdp::CdpError::NotAttached).into());
    };
    let current_url = current_url.unwrap_or_default();
    let result =
        ops::reload::reload(&state.inner.session, &target_id, &current_url, request).await?;
    Ok(ok(result))
}

// ─── Emulation / throttle ────────────────────────────────────────────

pub(super) async fn emulation_get(State(state): State<AppState>) -> Json<Value> {
    let controller = state
        .inner
        .emulation
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .state();
    ok(json!({"emulation": controller}))
}

pub(super) async fn emulation_set(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let settings: EmulationSettings = parse_body(&body)?;
    let desired = (settings != EmulationSettings::default()).then_some(settings);
    {
        let mut controller = state
            .inner
            .emulation
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        controller.set_desired(desired.clone());
    }

    if state.attached() {
        let effective = desired.unwrap_or_default();
        let applied = ops::emulation::apply_emulation(&state.inner.session, &effective).await;
        let mut controller = state
            .inner
            .emulation
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match applied {
            Ok(()) => controller.mark_applied(),
            Err(err) => controller.mark_failed(err.to_string()),
        }
    }

    let controller = state
        .inner
        .emulation
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .state();
    Ok(ok(json!({"emulation": controller})))
}

pub(super) async fn throttle_get(State(state): State<AppState>) -> Json<Value> {
    let controller = state
        .inner
        .throttle
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .state();
    ok(json!({"throttle": controller}))
}

pub(super) async fn throttle_set(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let settings: ThrottleSettings = parse_body(&body)?;
    let desired = (settings != ThrottleSettings::default()).then_some(settings);
    {
        let mut controller = state
            .inner
            .throttle
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        controller.set_desired(desired.clone());
    }

    if state.attached() {
        let effective = desired.unwrap_or_default();
        let applied = ops::emulation::apply_throttle(&state.inner.session, &effective).await;
        let mut controller = state
            .inner
            .throttle
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match applied {
            Ok(()) => controller.mark_applied(),
            Err(err) => controller.mark_failed(err.to_string()),
        }
    }

    let controller = state
        .inner
        .throttle
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .state();
    Ok(ok(json!({"throttle": controller})))
}

// ─── Lifecycle and fallbacks ─────────────────────────────────────────

pub(super) async fn shutdown(State(state): State<AppState>) -> Json<Value> {
    tracing::info!(watcher = %state.inner.watcher_id, "shutdown requested");
    state.inner.cancel.cancel();
    ok(json!({"stopping": true}))
}

pub(super) async fn extension_only(State(state): State<AppState>) -> ApiError {
    match state.inner.mode {
        SourceMode::Cdp => ApiError::not_found("route is only available in extension mode"),
        SourceMode::Extension => ApiError::not_found("extension bridge is not connected"),
    }
}

pub(super) async fn not_found() -> ApiError {
    ApiError::not_found("unknown route")
}
