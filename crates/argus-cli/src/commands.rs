//! Subcommand implementations: resolve the watcher, dispatch the typed
//! request, print the result.
//!
//! Human-readable text goes to stdout when `--json` is off; with
//! `--json` the machine payload owns stdout and anything human goes to
//! stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use argus_core::matching::TargetMatch;
use argus_core::record::WatcherRecord;
use argus_core::util::now_ms;
use argus_watcher::WatcherOptions;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::cli::{self, Cli, Command};
use crate::dispatch::{DispatchError, WatcherClient};
use crate::resolve::{list_watchers, resolve_watcher, ResolveFailure};

pub struct CliError {
    message: String,
    exit_code: u8,
}

impl CliError {
    fn new(message: impl Into<String>, exit_code: u8) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    pub fn report(&self) -> ExitCode {
        eprintln!("{}", self.message);
        ExitCode::from(self.exit_code)
    }
}

impl From<ResolveFailure> for CliError {
    fn from(err: ResolveFailure) -> Self {
        let mut message = err.message.clone();
        if !err.candidates.is_empty() {
            let ids: Vec<&str> = err.candidates.iter().map(|c| c.id.as_str()).collect();
            message.push_str(&format!(" Candidates: {}", ids.join(", ")));
        }
        Self::new(message, err.exit_code)
    }
}

impl From<DispatchError> for CliError {
    fn from(err: DispatchError) -> Self {
        Self::new(err.to_string(), err.exit_code())
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"), 1)
    }
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let registry = cli
        .registry
        .clone()
        .unwrap_or_else(argus_core::util::registry_path);
    let json = cli.json;
    let forget = cli.forget_unreachable;

    match cli.command {
        Command::Watch(opts) => watch(opts, cli.registry).await,
        Command::Ls => ls(&registry, json).await,
        Command::Status(opts) => {
            let ctx = Ctx::resolve(&registry, opts.id.as_deref(), json, forget).await?;
            let payload = ctx.get("/status", &[], None).await?;
            ctx.emit(&payload, |p| {
                if p["attached"].as_bool() == Some(true) {
                    println!(
                        "attached to {} ({})",
                        p["page"]["url"].as_str().unwrap_or("?"),
                        p["target"]["id"].as_str().unwrap_or("?"),
                    );
                } else {
                    println!("detached");
                }
                println!(
                    "logs: {} buffered (last id {}), net: {} buffered (last id {})",
                    p["buffers"]["logs"]["size"],
                    p["buffers"]["logs"]["lastId"],
                    p["buffers"]["net"]["size"],
                    p["buffers"]["net"]["lastId"],
                );
            });
            Ok(())
        }
        Command::Logs(opts) => logs(&registry, opts, json, forget, false).await,
        Command::Tail(opts) => logs(&registry, opts, json, forget, true).await,
        Command::Net(opts) => net(&registry, opts, json, forget).await,
        Command::Eval(opts) => {
            let ctx = Ctx::resolve(&registry, opts.id.as_deref(), json, forget).await?;
            let body = json!({
                "expression": opts.expression,
                "awaitPromise": !opts.no_await,
                "timeoutMs": opts.timeout_ms,
                "returnByValue": !opts.preview,
            });
            let timeout = opts.timeout_ms.map(|ms| Duration::from_millis(ms + 5_000));
            let payload = ctx.post("/eval", body, timeout).await?;
            ctx.emit(&payload, |p| {
                if !p["exception"].is_null() {
                    eprintln!(
                        "exception: {}",
                        p["exception"]["text"].as_str().unwrap_or("thrown")
                    );
                }
                println!(
                    "{}",
                    serde_json::to_string_pretty(&p["result"]).unwrap_or_default()
                );
            });
            Ok(())
        }
        Command::Dom(opts) => dom(&registry, opts, json, forget).await,
        Command::Screenshot(opts) => {
            let ctx = Ctx::resolve(&registry, opts.id.as_deref(), json, forget).await?;
            let payload = ctx
                .post("/screenshot", json!({"selector": opts.selector}), None)
                .await?;
            ctx.emit(&payload, |p| match p["path"].as_str() {
                Some(path) => println!("{path}"),
                None => println!("no element matched"),
            });
            Ok(())
        }
        Command::Snapshot(opts) => {
            let ctx = Ctx::resolve(&registry, opts.id.as_deref(), json, forget).await?;
            let payload = ctx.post("/snapshot", json!({}), None).await?;
            ctx.emit(&payload, |p| {
                println!(
                    "{} accessibility nodes",
                    p["nodes"].as_array().map_or(0, Vec::len)
                );
            });
            Ok(())
        }
        Command::Trace(opts) => {
            let ctx = Ctx::resolve(&registry, opts.id.as_deref(), json, forget).await?;
            let path = match opts.action.as_str() {
                "start" => "/trace/start",
                "stop" => "/trace/stop",
                other => {
                    return Err(CliError::new(
                        format!("unknown trace action: {other} (expected start or stop)"),
                        2,
                    ));
                }
            };
            let payload = ctx.post(path, json!({}), None).await?;
            ctx.emit(&payload, |p| {
                if let Some(path) = p["path"].as_str() {
                    println!("{path}");
                } else {
                    println!("tracing started");
                }
            });
            Ok(())
        }
        Command::Emulation(opts) => emulation(&registry, opts, json, forget).await,
        Command::Throttle(opts) => throttle(&registry, opts, json, forget).await,
        Command::Storage(opts) => {
            let ctx = Ctx::resolve(&registry, opts.id.as_deref(), json, forget).await?;
            let body = json!({
                "action": opts.action,
                "key": opts.key,
                "value": opts.value,
                "origin": opts.origin,
            });
            let payload = ctx.post("/storage/local", body, None).await?;
            ctx.emit(&payload, |p| {
                if let Some(keys) = p["keys"].as_array() {
                    for key in keys {
                        println!("{}", key.as_str().unwrap_or_default());
                    }
                } else if let Some(value) = p.get("value") {
                    println!("{value}");
                } else {
                    println!("ok");
                }
            });
            Ok(())
        }
        Command::Reload(opts) => {
            let ctx = Ctx::resolve(&registry, opts.id.as_deref(), json, forget).await?;
            let body = json!({
                "params": opts.params,
                "param": if opts.param.is_empty() { Value::Null } else { json!(opts.param) },
            });
            let payload = ctx.post("/reload", body, None).await?;
            ctx.emit(&payload, |p| {
                println!("reloaded {}", p["url"].as_str().unwrap_or("?"));
            });
            Ok(())
        }
        Command::Stop(opts) => {
            let ctx = Ctx::resolve(&registry, opts.id.as_deref(), json, forget).await?;
            let payload = ctx.post("/shutdown", json!({}), None).await?;
            ctx.emit(&payload, |_| println!("stopping {}", ctx.record.id));
            Ok(())
        }
    }
}

// ─── Context shared by client commands ───────────────────────────────

struct Ctx {
    record: WatcherRecord,
    client: WatcherClient,
    registry: PathBuf,
    json: bool,
    forget: bool,
}

impl Ctx {
    async fn resolve(
        registry: &Path,
        id: Option<&str>,
        json: bool,
        forget: bool,
    ) -> Result<Self, CliError> {
        let record = resolve_watcher(registry, id).await?;
        let client = WatcherClient::new(&record);
        Ok(Self {
            record,
            client,
            registry: registry.to_path_buf(),
            json,
            forget,
        })
    }

    async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<Value, CliError> {
        self.after(self.client.get(path, query, timeout).await).await
    }

    async fn post(
        &self,
        path: &str,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, CliError> {
        self.after(self.client.post(path, body, timeout).await).await
    }

    /// Opt-in cleanup: an unreachable watcher is removed from the
    /// registry; the underlying error is surfaced either way.
    async fn after(&self, result: Result<Value, DispatchError>) -> Result<Value, CliError> {
        if self.forget
            && let Err(DispatchError::Network(_)) = &result
        {
            let path = self.registry.clone();
            let id = self.record.id.clone();
            let removal = tokio::task::spawn_blocking(move || {
                argus_registry::update_registry(&path, |reg| reg.remove_watcher(&id, now_ms()))
            })
            .await;
            match removal {
                Ok(Ok(_)) => eprintln!("removed unreachable watcher {}", self.record.id),
                _ => tracing::warn!("failed to remove unreachable watcher"),
            }
        }
        result.map_err(CliError::from)
    }

    fn emit(&self, payload: &Value, human: impl FnOnce(&Value)) {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(payload).unwrap_or_default()
            );
        } else {
            human(payload);
        }
    }
}

// ─── Command bodies ──────────────────────────────────────────────────

async fn watch(opts: cli::WatchOpts, registry: Option<PathBuf>) -> Result<(), CliError> {
    let options = WatcherOptions {
        id: opts.id,
        port: opts.port,
        chrome_host: opts.chrome_host,
        chrome_port: opts.chrome_port,
        target_match: TargetMatch {
            url: opts.url,
            title: opts.title,
            url_regex: opts.url_regex,
            title_regex: opts.title_regex,
            kind: opts.kind,
            origin: opts.origin,
            target_id: opts.target_id,
            parent: opts.parent,
        },
        ignore_patterns: opts.ignore_patterns,
        log_dir: opts.log_dir.or_else(|| WatcherOptions::default().log_dir),
        max_log_files: opts.max_log_files,
        heartbeat_ms: opts.heartbeat_ms,
        capture_network: !opts.no_network,
        include_timestamps: opts.include_timestamps,
        registry_path: registry,
        artifact_dir: opts.artifact_dir,
    };
    argus_watcher::run_watcher(options).await.map_err(CliError::from)
}

async fn ls(registry: &Path, json: bool) -> Result<(), CliError> {
    let watchers = list_watchers(registry).await;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&watchers).unwrap_or_default()
        );
        return Ok(());
    }
    if watchers.is_empty() {
        println!("no watchers registered");
        return Ok(());
    }
    for watcher in watchers {
        let age_s = (now_ms() - watcher.updated_at) / 1000;
        println!(
            "{}  {}:{}  pid {}  {}  updated {}s ago",
            watcher.id, watcher.host, watcher.port, watcher.pid, watcher.cwd, age_s
        );
    }
    Ok(())
}

fn log_query(opts: &cli::LogsOpts) -> Vec<(String, String)> {
    let mut query = vec![("after".to_owned(), opts.after.to_string())];
    if let Some(limit) = opts.limit {
        query.push(("limit".to_owned(), limit.to_string()));
    }
    if !opts.levels.is_empty() {
        query.push(("levels".to_owned(), opts.levels.join(",")));
    }
    for pattern in &opts.matches {
        query.push(("match".to_owned(), pattern.clone()));
    }
    if opts.ignore_case {
        query.push(("ignoreCase".to_owned(), "true".to_owned()));
    }
    if let Some(source) = &opts.source {
        query.push(("source".to_owned(), source.clone()));
    }
    if let Some(since) = opts.since {
        query.push(("sinceTs".to_owned(), since.to_string()));
    }
    query
}

fn print_log_events(payload: &Value, include_timestamps: bool) {
    for event in payload["events"].as_array().into_iter().flatten() {
        let mut line = String::new();
        if include_timestamps
            && let Some(ts) = event["ts"].as_i64()
            && let Some(when) = DateTime::<Utc>::from_timestamp_millis(ts)
        {
            line.push_str(&when.to_rfc3339());
            line.push(' ');
        }
        line.push_str(&format!(
            "[{}] {}",
            event["level"].as_str().unwrap_or("?"),
            event["text"].as_str().unwrap_or(""),
        ));
        if let Some(file) = event["file"].as_str() {
            line.push_str(&format!(" at {file}"));
            if let Some(log_line) = event["line"].as_u64() {
                line.push_str(&format!(":{log_line}"));
                if let Some(col) = event["column"].as_u64() {
                    line.push_str(&format!(":{col}"));
                }
            }
        }
        println!("{line}");
    }
}

async fn logs(
    registry: &Path,
    opts: cli::LogsOpts,
    json: bool,
    forget: bool,
    tail: bool,
) -> Result<(), CliError> {
    let ctx = Ctx::resolve(registry, opts.id.as_deref(), json, forget).await?;
    let mut query = log_query(&opts);
    let (path, timeout) = if tail {
        if let Some(wait) = opts.wait_ms {
            query.push(("waitMs".to_owned(), wait.to_string()));
        }
        let wait = opts.wait_ms.unwrap_or(25_000);
        ("/tail", Some(Duration::from_millis(wait + 10_000)))
    } else {
        ("/logs", None)
    };
    let payload = ctx.get(path, &query, timeout).await?;
    let include_timestamps = ctx.record.include_timestamps;
    ctx.emit(&payload, |p| {
        if tail && p["timedOut"].as_bool() == Some(true) {
            eprintln!("timed out waiting for events (cursor {})", p["nextAfter"]);
        }
        print_log_events(p, include_timestamps);
    });
    Ok(())
}

async fn net(
    registry: &Path,
    opts: cli::NetOpts,
    json: bool,
    forget: bool,
) -> Result<(), CliError> {
    let ctx = Ctx::resolve(registry, opts.id.as_deref(), json, forget).await?;
    let mut query = vec![("after".to_owned(), opts.after.to_string())];
    if let Some(limit) = opts.limit {
        query.push(("limit".to_owned(), limit.to_string()));
    }
    if let Some(url) = &opts.url {
        query.push(("url".to_owned(), url.clone()));
    }
    if let Some(since) = opts.since {
        query.push(("sinceTs".to_owned(), since.to_string()));
    }
    let (path, timeout) = if opts.tail {
        if let Some(wait) = opts.wait_ms {
            query.push(("waitMs".to_owned(), wait.to_string()));
        }
        let wait = opts.wait_ms.unwrap_or(25_000);
        ("/net/tail", Some(Duration::from_millis(wait + 10_000)))
    } else {
        ("/net", None)
    };
    let payload = ctx.get(path, &query, timeout).await?;
    ctx.emit(&payload, |p| {
        for request in p["requests"].as_array().into_iter().flatten() {
            let status = request["status"]
                .as_i64()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_owned());
            let duration = request["durationMs"]
                .as_f64()
                .map(|d| format!(" {d:.0}ms"))
                .unwrap_or_default();
            let error = request["errorText"]
                .as_str()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default();
            println!(
                "{status} {} {}{duration}{error}",
                request["method"].as_str().unwrap_or("?"),
                request["url"].as_str().unwrap_or("?"),
            );
        }
    });
    Ok(())
}

async fn dom(
    registry: &Path,
    opts: cli::DomOpts,
    json: bool,
    forget: bool,
) -> Result<(), CliError> {
    let ctx = Ctx::resolve(registry, opts.id.as_deref(), json, forget).await?;
    let body = json!({
        "selector": opts.selector,
        "all": opts.all,
        "text": opts.text,
        "value": opts.value,
        "key": opts.key,
        "html": opts.html,
        "attribute": opts.attribute,
        "position": opts.position,
        "files": if opts.files.is_empty() { Value::Null } else { json!(opts.files) },
        "dx": opts.dx,
        "dy": opts.dy,
        "depth": opts.depth,
    });
    let payload = ctx.post(&format!("/dom/{}", opts.op), body, None).await?;
    ctx.emit(&payload, |p| {
        println!(
            "matched {} element(s), affected {}",
            p["matches"], p["affected"]
        );
    });
    Ok(())
}

async fn emulation(
    registry: &Path,
    opts: cli::EmulationOpts,
    json: bool,
    forget: bool,
) -> Result<(), CliError> {
    let ctx = Ctx::resolve(registry, opts.id.as_deref(), json, forget).await?;
    let is_set = opts.clear
        || opts.width.is_some()
        || opts.height.is_some()
        || opts.device_scale_factor.is_some()
        || opts.mobile
        || opts.touch
        || opts.user_agent.is_some();
    let payload = if is_set {
        let body = if opts.clear {
            json!({})
        } else {
            json!({
                "width": opts.width,
                "height": opts.height,
                "deviceScaleFactor": opts.device_scale_factor,
                "mobile": opts.mobile.then_some(true),
                "touch": opts.touch.then_some(true),
                "userAgent": opts.user_agent,
            })
        };
        ctx.post("/emulation", body, None).await?
    } else {
        ctx.get("/emulation", &[], None).await?
    };
    ctx.emit(&payload, |p| {
        println!(
            "{}",
            serde_json::to_string_pretty(&p["emulation"]).unwrap_or_default()
        );
    });
    Ok(())
}

async fn throttle(
    registry: &Path,
    opts: cli::ThrottleOpts,
    json: bool,
    forget: bool,
) -> Result<(), CliError> {
    let ctx = Ctx::resolve(registry, opts.id.as_deref(), json, forget).await?;
    let is_set = opts.clear
        || opts.cpu.is_some()
        || opts.offline
        || opts.latency_ms.is_some()
        || opts.download_bps.is_some()
        || opts.upload_bps.is_some()
        || opts.cache_disabled;
    let payload = if is_set {
        let body = if opts.clear {
            json!({})
        } else {
            json!({
                "cpuRate": opts.cpu,
                "offline": opts.offline.then_some(true),
                "latencyMs": opts.latency_ms,
                "downloadBps": opts.download_bps,
                "uploadBps": opts.upload_bps,
                "cacheDisabled": opts.cache_disabled.then_some(true),
            })
        };
        ctx.post("/throttle", body, None).await?
    } else {
        ctx.get("/throttle", &[], None).await?
    };
    ctx.emit(&payload, |p| {
        println!(
            "{}",
            serde_json::to_string_pretty(&p["throttle"]).unwrap_or_default()
        );
    });
    Ok(())
}
