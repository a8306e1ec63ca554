//! Rotating per-session file logger.
//!
//! All writes funnel through one task so lines never interleave. A top
//! frame navigation closes the current file and bumps the index; the
//! next event lazily opens the successor. After each file creation the
//! watcher's own old files are pruned down to `max_files`, best-effort.
//! Any write error flips the logger into a failed state that silently
//! drops everything after it, keeping the event pipeline unharmed.

use std::path::{Path, PathBuf};

use argus_core::types::LogEvent;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_MAX_FILES: usize = 5;

/// Static header fields; page context is tracked by the writer task.
#[derive(Debug, Clone)]
pub struct FileLogHeader {
    pub watcher_id: String,
    pub started_at: DateTime<Utc>,
    /// `host:port` of the CDP endpoint.
    pub chrome: String,
    pub match_desc: String,
}

enum Msg {
    Event(Box<LogEvent>),
    Navigated { url: String, title: Option<String> },
}

/// Cheap cloneable handle; dropping every clone stops the writer task.
#[derive(Clone)]
pub struct FileLogger {
    tx: mpsc::UnboundedSender<Msg>,
}

pub struct FileLoggerTask {
    handle: JoinHandle<()>,
}

impl FileLoggerTask {
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

impl FileLogger {
    pub fn spawn(
        dir: PathBuf,
        header: FileLogHeader,
        max_files: usize,
    ) -> (Self, FileLoggerTask) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(writer_loop(dir, header, max_files, rx));
        (Self { tx }, FileLoggerTask { handle })
    }

    pub fn log(&self, event: LogEvent) {
        let _ = self.tx.send(Msg::Event(Box::new(event)));
    }

    pub fn navigated(&self, url: String, title: Option<String>) {
        let _ = self.tx.send(Msg::Navigated { url, title });
    }
}

struct Writer {
    dir: PathBuf,
    header: FileLogHeader,
    max_files: usize,
    session_stamp: String,
    index: u32,
    file: Option<tokio::fs::File>,
    failed: bool,
    page_url: Option<String>,
    page_title: Option<String>,
    last_written_page: Option<String>,
}

async fn writer_loop(
    dir: PathBuf,
    header: FileLogHeader,
    max_files: usize,
    mut rx: mpsc::UnboundedReceiver<Msg>,
) {
    let session_stamp = header
        .started_at
        .format("%Y-%m-%dT%H-%M-%SZ")
        .to_string();
    let mut writer = Writer {
        dir,
        header,
        max_files,
        session_stamp,
        index: 0,
        file: None,
        failed: false,
        page_url: None,
        page_title: None,
        last_written_page: None,
    };

    while let Some(msg) = rx.recv().await {
        match msg {
            Msg::Event(event) => writer.write_event(&event).await,
            Msg::Navigated { url, title } => writer.rotate(url, title).await,
        }
    }
    writer.flush().await;
}

impl Writer {
    fn current_path(&self) -> PathBuf {
        self.dir.join(format!(
            "watcher-{}-{}-{}.log",
            self.header.watcher_id, self.session_stamp, self.index
        ))
    }

    async fn write_event(&mut self, event: &LogEvent) {
        if self.failed {
            return;
        }
        if self.file.is_none() && !self.open_file().await {
            return;
        }

        let mut line = String::new();
        let ts = DateTime::<Utc>::from_timestamp_millis(event.ts)
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        line.push_str(&ts);
        line.push_str(&format!(" [{}] {}", event.level, event.text));
        if let Some(file) = &event.file {
            line.push_str(&format!(" at {file}"));
            if let Some(log_line) = event.line {
                line.push_str(&format!(":{log_line}"));
                if let Some(col) = event.column {
                    line.push_str(&format!(":{col}"));
                }
            }
        }
        if let Some(page) = &event.page_url
            && self.last_written_page.as_deref() != Some(page.as_str())
        {
            line.push_str(&format!(" page={page}"));
            self.last_written_page = Some(page.clone());
        }
        line.push('\n');

        let result = match self.file.as_mut() {
            Some(file) => file.write_all(line.as_bytes()).await,
            None => return,
        };
        if let Err(err) = result {
            self.fail(err);
        }
    }

    /// Close the current file and arrange for the next write to open the
    /// successor.
    async fn rotate(&mut self, url: String, title: Option<String>) {
        self.page_url = Some(url);
        self.page_title = title;
        if let Some(mut file) = self.file.take() {
            let _ = file.flush().await;
            self.index += 1;
        }
    }

    async fn open_file(&mut self) -> bool {
        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            self.fail(err);
            return false;
        }
        let path = self.current_path();
        let mut file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(err) => {
                self.fail(err);
                return false;
            }
        };

        let search_params = self
            .page_url
            .as_deref()
            .and_then(|u| url::Url::parse(u).ok())
            .and_then(|u| u.query().map(str::to_owned))
            .unwrap_or_default();
        let header = format!(
            "watcherId: {}\nstartedAt: {}\nchrome: {}\nmatch: {}\npageUrl: {}\npageSearchParams: {}\npageTitle: {}\n---\n",
            self.header.watcher_id,
            self.header.started_at.to_rfc3339(),
            self.header.chrome,
            self.header.match_desc,
            self.page_url.as_deref().unwrap_or(""),
            search_params,
            self.page_title.as_deref().unwrap_or(""),
        );
        if let Err(err) = file.write_all(header.as_bytes()).await {
            self.fail(err);
            return false;
        }
        self.file = Some(file);
        self.last_written_page = self.page_url.clone();

        // Best-effort prune; never blocks the writer.
        let dir = self.dir.clone();
        let watcher_id = self.header.watcher_id.clone();
        let max_files = self.max_files;
        tokio::task::spawn_blocking(move || prune_old_files(&dir, &watcher_id, max_files));
        true
    }

    async fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush().await;
        }
    }

    fn fail(&mut self, err: std::io::Error) {
        tracing::warn!(error = %err, dir = %self.dir.display(), "file logger disabled after write error");
        self.failed = true;
        self.file = None;
    }
}

/// Keep at most `max_files` files for this watcher id, removing oldest
/// by modification time.
fn prune_old_files(dir: &Path, watcher_id: &str, max_files: usize) {
    let prefix = format!("watcher-{watcher_id}-");
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !name.ends_with(".log") {
                return None;
            }
            let mtime = entry.metadata().ok()?.modified().ok()?;
            Some((mtime, entry.path()))
        })
        .collect();
    if files.len() <= max_files {
        return;
    }
    files.sort_by_key(|(mtime, _)| *mtime);
    let excess = files.len() - max_files;
    for (_, path) in files.into_iter().take(excess) {
        if let Err(err) = std::fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), error = %err, "log prune failed");
        }
    }
}
