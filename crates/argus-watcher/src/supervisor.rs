//! Watcher supervisor: wires source, pipeline, buffers, file logger,
//! HTTP server, and heartbeat together, and owns shutdown.

use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Context;
use argus_cdp::{CdpSession, CdpSource, SourceConfig, SourceEvent, SourceMode, Subscription};
use argus_core::record::{CdpEndpoint, WatcherRecord};
use argus_core::util::{argus_home, now_ms, registry_path};
use argus_core::IgnoreList;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::buffer::{EventBuffer, DEFAULT_CAPACITY};
use crate::config::WatcherOptions;
use crate::controllers::Controller;
use crate::filelog::{FileLogHeader, FileLogger};
use crate::heartbeat::run_heartbeat;
use crate::http::{self, AppState, StateInner};
use crate::netlog::NetworkCapture;
use crate::ops::emulation::{apply_emulation, apply_throttle};
use crate::ops::trace::TraceRecorder;
use crate::ops::OP_TIMEOUT;
use crate::pipeline::{PageContext, Pipeline, RawEvent};
use crate::sourcemap::{NoSourceMaps, SourceMapCache};

/// Run one watcher to completion (shutdown request, signal, or fatal
/// setup error).
pub async fn run_watcher(options: WatcherOptions) -> anyhow::Result<()> {
    let compiled_match = options
        .target_match
        .clone()
        .compile()
        .context("invalid target match")?;
    let ignore = IgnoreList::compile(&options.ignore_patterns).context("invalid ignore list")?;
    let registry = options.registry_path.clone().unwrap_or_else(registry_path);

    // Bind first: the record announces the real port.
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", options.port))
        .await
        .context("bind http port")?;
    let port = listener.local_addr()?.port();
    let watcher_id = options.id.clone().unwrap_or_else(generate_id);

    let record = build_record(&options, &watcher_id, port);
    {
        let path = registry.clone();
        let announced = record.clone();
        let now = announced.updated_at;
        tokio::task::spawn_blocking(move || {
            argus_registry::update_registry(&path, |reg| reg.set_watcher(announced, now))
        })
        .await?
        .context("announce watcher")?;
    }
    tracing::info!(id = %watcher_id, port, "watcher announced");

    let cancel = CancellationToken::new();
    let source = Arc::new(CdpSource::new(
        SourceConfig {
            chrome_host: options.chrome_host.clone(),
            chrome_port: options.chrome_port,
            target_match: compiled_match,
        },
        cancel.clone(),
    ));
    let session = source.session();

    let logs = Arc::new(EventBuffer::new(DEFAULT_CAPACITY));
    let net = Arc::new(EventBuffer::new(DEFAULT_CAPACITY));
    let page = Arc::new(StdMutex::new(PageContext::default()));

    let filelog = options.log_dir.clone().map(|dir| {
        FileLogger::spawn(
            dir,
            FileLogHeader {
                watcher_id: watcher_id.clone(),
                started_at: Utc::now(),
                chrome: format!("{}:{}", options.chrome_host, options.chrome_port),
                match_desc: options.target_match.describe(),
            },
            options.max_log_files,
        )
    });
    let (filelog_handle, filelog_task) = match filelog {
        Some((handle, task)) => (Some(handle), Some(task)),
        None => (None, None),
    };

    let pipeline = Pipeline::new(
        session.clone(),
        Arc::clone(&logs),
        NetworkCapture::new(Arc::clone(&net)),
        ignore,
        SourceMapCache::new(Arc::new(NoSourceMaps)),
        Arc::clone(&page),
        filelog_handle.clone(),
    );
    let (raw_tx, pipeline_task) = pipeline.spawn();
    let _event_subs = install_event_handlers(&session, &raw_tx);

    let artifact_dir = options
        .artifact_dir
        .clone()
        .unwrap_or_else(|| argus_home().join("artifacts").join(&watcher_id));
    let (request_hook, _) = broadcast::channel(64);
    let state = AppState {
        inner: Arc::new(StateInner {
            watcher_id: watcher_id.clone(),
            mode: SourceMode::Cdp,
            record: StdMutex::new(record),
            session: session.clone(),
            logs,
            net,
            emulation: StdMutex::new(Controller::default()),
            throttle: StdMutex::new(Controller::default()),
            trace: TraceRecorder::default(),
            artifact_dir,
            page: Arc::clone(&page),
            current_target: StdMutex::new(None),
            cancel: cancel.clone(),
            request_hook,
        }),
    };

    tokio::spawn(Arc::clone(&source).run());
    tokio::spawn(supervise_source(
        source.subscribe(),
        state.clone(),
        raw_tx.clone(),
        options.capture_network,
        cancel.clone(),
    ));
    tokio::spawn(run_heartbeat(
        registry.clone(),
        watcher_id.clone(),
        options.heartbeat_ms,
        cancel.clone(),
    ));

    let server = tokio::spawn(http::serve(listener, state.clone()));

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "http server error"),
        Err(err) => tracing::warn!(error = %err, "http server task failed"),
    }

    // Orderly stop: drop the registry entry, let the file logger drain.
    {
        let path = registry.clone();
        let id = watcher_id.clone();
        let result = tokio::task::spawn_blocking(move || {
            argus_registry::update_registry(&path, |reg| reg.remove_watcher(&id, now_ms()))
        })
        .await;
        if let Ok(Err(err)) = result {
            tracing::warn!(error = %err, "failed to remove registry entry");
        }
    }
    drop(raw_tx);
    drop(filelog_handle);
    let _ = pipeline_task.await;
    if let Some(task) = filelog_task {
        task.join().await;
    }

    tracing::info!(id = %watcher_id, "watcher stopped");
    Ok(())
}

fn build_record(options: &WatcherOptions, watcher_id: &str, port: u16) -> WatcherRecord {
    let now = now_ms();
    WatcherRecord {
        id: watcher_id.to_owned(),
        host: "127.0.0.1".to_owned(),
        port,
        pid: std::process::id(),
        cwd: std::env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default(),
        started_at: now,
        updated_at: now,
        target_match: (!options.target_match.is_empty()).then(|| options.target_match.clone()),
        cdp: Some(CdpEndpoint {
            host: options.chrome_host.clone(),
            port: options.chrome_port,
        }),
        include_timestamps: options.include_timestamps,
    }
}

/// Watcher id when none is configured: pid plus monotonic nanoseconds,
/// unique enough across restarts on one host.
fn generate_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("w{}-{:x}", std::process::id(), (nanos & 0xffff_ffff) as u64)
}

/// React to source lifecycle events: keep target/page state current,
/// re-enable network capture, re-apply desired controller state.
async fn supervise_source(
    mut events: broadcast::Receiver<SourceEvent>,
    state: AppState,
    raw_tx: mpsc::UnboundedSender<RawEvent>,
    capture_network: bool,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SourceEvent::Attached { target }) => {
                    {
                        let mut current = state
                            .inner
                            .current_target
                            .lock()
                            .unwrap_or_else(|e| e.into_inner());
                        *current = Some(target.clone());
                    }
                    {
                        let mut page = state.inner.page.lock().unwrap_or_else(|e| e.into_inner());
                        page.url = Some(target.url.clone());
                        page.title = Some(target.title.clone());
                    }
                    on_attach(&state, capture_network).await;
                }
                Ok(SourceEvent::PageNavigated { url, title }) => {
                    let _ = raw_tx.send(RawEvent::PageNavigated { url, title });
                }
                Ok(SourceEvent::Detached { reason }) => {
                    tracing::debug!(reason = %reason, "source detached");
                    {
                        let mut current = state
                            .inner
                            .current_target
                            .lock()
                            .unwrap_or_else(|e| e.into_inner());
                        *current = None;
                    }
                    state
                        .inner
                        .emulation
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .mark_detached();
                    state
                        .inner
                        .throttle
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .mark_detached();
                    let _ = raw_tx.send(RawEvent::Detached);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "source event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
}

async fn on_attach(state: &AppState, capture_network: bool) {
    let session = state.inner.session.clone();

    if capture_network
        && let Err(err) = session
            .send_and_wait("Network.enable", None, OP_TIMEOUT)
            .await
    {
        tracing::warn!(error = %err, "Network.enable failed");
    }

    let desired_emulation = state
        .inner
        .emulation
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .desired();
    if let Some(settings) = desired_emulation {
        let applied = apply_emulation(&session, &settings).await;
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

    let desired_throttle = state
        .inner
        .throttle
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .desired();
    if let Some(settings) = desired_throttle {
        let applied = apply_throttle(&session, &settings).await;
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
}

/// Bridge session events into the pipeline queue. Handlers stay
/// registered across re-attachments.
fn install_event_handlers(
    session: &CdpSession,
    raw_tx: &mpsc::UnboundedSender<RawEvent>,
) -> Vec<Subscription> {
    let mut subs = Vec::new();

    let tx = raw_tx.clone();
    subs.push(session.on_event("Runtime.consoleAPICalled", move |params| {
        let _ = tx.send(RawEvent::Console(params.clone()));
    }));
    let tx = raw_tx.clone();
    subs.push(session.on_event("Log.entryAdded", move |params| {
        let _ = tx.send(RawEvent::LogEntry(params.clone()));
    }));
    let tx = raw_tx.clone();
    subs.push(session.on_event("Runtime.exceptionThrown", move |params| {
        let _ = tx.send(RawEvent::Exception(params.clone()));
    }));

    for method in [
        "Network.requestWillBeSent",
        "Network.responseReceived",
        "Network.loadingFinished",
        "Network.loadingFailed",
    ] {
        let tx = raw_tx.clone();
        subs.push(session.on_event(method, move |params| {
            let _ = tx.send(RawEvent::Network {
                method: method.to_owned(),
                params: params.clone(),
            });
        }));
    }

    subs
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(error = %err, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
