//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "argus",
    about = "Browser telemetry watchers over the Chrome DevTools Protocol"
)]
pub struct Cli {
    /// Registry file (default: $ARGUS_REGISTRY_PATH or ~/.argus/registry.json)
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// On network failure, remove the unreachable watcher from the registry
    #[arg(long, global = true)]
    pub forget_unreachable: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a watcher attached to a browser target
    Watch(WatchOpts),
    /// List registered watchers
    Ls,
    /// Show one watcher's status
    Status(TargetOpts),
    /// Read captured console/exception events
    Logs(LogsOpts),
    /// Long-poll for new events
    Tail(LogsOpts),
    /// Read captured network request summaries
    Net(NetOpts),
    /// Evaluate a JS expression in the page
    Eval(EvalOpts),
    /// DOM inspection and mutation
    Dom(DomOpts),
    /// Capture a PNG screenshot to an artifact file
    Screenshot(ScreenshotOpts),
    /// Dump the accessibility tree
    Snapshot(TargetOpts),
    /// Chrome tracing to an artifact file
    Trace(TraceOpts),
    /// Show or set viewport/touch/user-agent overrides
    Emulation(EmulationOpts),
    /// Show or set CPU/network/cache throttling
    Throttle(ThrottleOpts),
    /// localStorage operations
    Storage(StorageOpts),
    /// Reload the target, optionally appending query params
    Reload(ReloadOpts),
    /// Stop a running watcher
    Stop(TargetOpts),
}

#[derive(clap::Args)]
pub struct TargetOpts {
    /// Watcher id (omit to resolve by cwd or liveness probe)
    pub id: Option<String>,
}

#[derive(clap::Args)]
pub struct WatchOpts {
    /// Explicit watcher id (default: generated)
    #[arg(long)]
    pub id: Option<String>,

    /// HTTP API port (0 = OS-assigned)
    #[arg(long, default_value = "0")]
    pub port: u16,

    /// Chrome DevTools host
    #[arg(long, default_value = "127.0.0.1")]
    pub chrome_host: String,

    /// Chrome DevTools port
    #[arg(long, default_value = "9222")]
    pub chrome_port: u16,

    /// Substring match on target URL
    #[arg(long)]
    pub url: Option<String>,

    /// Substring match on target title
    #[arg(long)]
    pub title: Option<String>,

    /// Regex match on target URL
    #[arg(long)]
    pub url_regex: Option<String>,

    /// Regex match on target title
    #[arg(long)]
    pub title_regex: Option<String>,

    /// Exact target type (page, iframe, worker)
    #[arg(long = "type")]
    pub kind: Option<String>,

    /// Exact origin (protocol+host+port) of the target URL
    #[arg(long)]
    pub origin: Option<String>,

    /// Exact target id
    #[arg(long)]
    pub target_id: Option<String>,

    /// Substring match on the parent target's URL
    #[arg(long)]
    pub parent: Option<String>,

    /// Stack-frame ignore pattern (regex, repeatable)
    #[arg(long = "ignore")]
    pub ignore_patterns: Vec<String>,

    /// Directory for rotating log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Keep at most this many log files per watcher
    #[arg(long, default_value = "5")]
    pub max_log_files: usize,

    /// Registry heartbeat interval in milliseconds
    #[arg(long, default_value = "15000")]
    pub heartbeat_ms: u64,

    /// Disable network capture
    #[arg(long)]
    pub no_network: bool,

    /// Include timestamps in human log output
    #[arg(long)]
    pub include_timestamps: bool,

    /// Artifact directory for screenshots and traces
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct LogsOpts {
    /// Watcher id
    pub id: Option<String>,

    /// Return events with id greater than this cursor
    #[arg(long, default_value = "0")]
    pub after: u64,

    /// Maximum number of events
    #[arg(long)]
    pub limit: Option<u64>,

    /// Level filter (repeatable; e.g. error,exception)
    #[arg(long = "level")]
    pub levels: Vec<String>,

    /// Regex over event text (repeatable, OR-ed)
    #[arg(long = "match")]
    pub matches: Vec<String>,

    /// Case-insensitive regex matching
    #[arg(long)]
    pub ignore_case: bool,

    /// Substring over the event source
    #[arg(long)]
    pub source: Option<String>,

    /// Only events at or after this epoch-ms timestamp
    #[arg(long)]
    pub since: Option<i64>,

    /// Long-poll timeout in milliseconds (tail only)
    #[arg(long)]
    pub wait_ms: Option<u64>,
}

#[derive(clap::Args)]
pub struct NetOpts {
    /// Watcher id
    pub id: Option<String>,

    #[arg(long, default_value = "0")]
    pub after: u64,

    #[arg(long)]
    pub limit: Option<u64>,

    /// Substring over the redacted URL
    #[arg(long)]
    pub url: Option<String>,

    /// Only requests at or after this epoch-ms timestamp
    #[arg(long)]
    pub since: Option<i64>,

    /// Long-poll for new requests
    #[arg(long)]
    pub tail: bool,

    #[arg(long)]
    pub wait_ms: Option<u64>,
}

#[derive(clap::Args)]
pub struct EvalOpts {
    /// JS expression
    pub expression: String,

    /// Watcher id
    pub id: Option<String>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Do not await returned promises
    #[arg(long)]
    pub no_await: bool,

    /// Return a bounded preview instead of the full value
    #[arg(long)]
    pub preview: bool,
}

#[derive(clap::Args)]
pub struct DomOpts {
    /// Operation: tree, info, hover, click, keydown, add, remove,
    /// modify, set-file, focus, fill, scroll, scroll-to
    pub op: String,

    /// Watcher id
    pub id: Option<String>,

    #[arg(long)]
    pub selector: String,

    /// Allow more than one match
    #[arg(long)]
    pub all: bool,

    /// Text refinement: exact string or /pattern/flags
    #[arg(long)]
    pub text: Option<String>,

    /// Value for fill / modify
    #[arg(long)]
    pub value: Option<String>,

    /// Key name for keydown
    #[arg(long)]
    pub key: Option<String>,

    /// Markup for add / modify
    #[arg(long)]
    pub html: Option<String>,

    /// Attribute name for modify
    #[arg(long)]
    pub attribute: Option<String>,

    /// Insertion position for add
    #[arg(long)]
    pub position: Option<String>,

    /// File path for set-file (repeatable)
    #[arg(long = "file")]
    pub files: Vec<String>,

    #[arg(long)]
    pub dx: Option<f64>,

    #[arg(long)]
    pub dy: Option<f64>,

    /// Depth bound for tree
    #[arg(long)]
    pub depth: Option<u32>,
}

#[derive(clap::Args)]
pub struct ScreenshotOpts {
    /// Watcher id
    pub id: Option<String>,

    /// Clip to the first element matching this selector
    #[arg(long)]
    pub selector: Option<String>,
}

#[derive(clap::Args)]
pub struct TraceOpts {
    /// start or stop
    pub action: String,

    /// Watcher id
    pub id: Option<String>,
}

#[derive(clap::Args)]
pub struct EmulationOpts {
    /// Watcher id
    pub id: Option<String>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    #[arg(long)]
    pub device_scale_factor: Option<f64>,

    #[arg(long)]
    pub mobile: bool,

    #[arg(long)]
    pub touch: bool,

    #[arg(long)]
    pub user_agent: Option<String>,

    /// Clear all overrides
    #[arg(long)]
    pub clear: bool,
}

#[derive(clap::Args)]
pub struct ThrottleOpts {
    /// Watcher id
    pub id: Option<String>,

    /// CPU slowdown factor (1.0 = none)
    #[arg(long)]
    pub cpu: Option<f64>,

    #[arg(long)]
    pub offline: bool,

    #[arg(long)]
    pub latency_ms: Option<f64>,

    /// Download throughput in bytes per second
    #[arg(long)]
    pub download_bps: Option<f64>,

    /// Upload throughput in bytes per second
    #[arg(long)]
    pub upload_bps: Option<f64>,

    #[arg(long)]
    pub cache_disabled: bool,

    /// Clear all throttling
    #[arg(long)]
    pub clear: bool,
}

#[derive(clap::Args)]
pub struct StorageOpts {
    /// Action: get, set, remove, list, clear
    pub action: String,

    /// Watcher id
    pub id: Option<String>,

    #[arg(long)]
    pub key: Option<String>,

    #[arg(long)]
    pub value: Option<String>,

    /// Require the page origin to equal this value
    #[arg(long)]
    pub origin: Option<String>,
}

#[derive(clap::Args)]
pub struct ReloadOpts {
    /// Watcher id
    pub id: Option<String>,

    /// One key=value to append (repeatable)
    #[arg(long = "param")]
    pub param: Vec<String>,

    /// Bulk form: k1=v1&k2=v2
    #[arg(long)]
    pub params: Option<String>,
}
