//! Event pipeline: raw CDP events → LogEvents and request summaries.
//!
//! Session event handlers must not block, so they only enqueue the raw
//! params here; this task does the slow parts (source-map lookups, the
//! bounded `Runtime.getProperties` expansion) and owns insertion order
//! into both buffers, which therefore matches CDP arrival order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use argus_core::preview::{bound_args, coerce_text, preview_remote, Preview, MAX_OWN_PROPERTIES};
use argus_core::types::{LogEvent, LogLevel, SelectedLocation};
use argus_core::util::now_ms;
use argus_core::IgnoreList;
use argus_cdp::CdpSession;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::buffer::EventBuffer;
use crate::filelog::FileLogger;
use crate::netlog::NetworkCapture;
use crate::sourcemap::SourceMapCache;

/// Raw input consumed by the pipeline task, in CDP arrival order.
#[derive(Debug)]
pub enum RawEvent {
    /// `Runtime.consoleAPICalled` params.
    Console(Value),
    /// `Log.entryAdded` params.
    LogEntry(Value),
    /// `Runtime.exceptionThrown` params.
    Exception(Value),
    /// Any `Network.*` event.
    Network { method: String, params: Value },
    PageNavigated { url: String, title: Option<String> },
    Detached,
}

/// Page context shared with the HTTP server for `/status`.
#[derive(Debug, Default, Clone)]
pub struct PageContext {
    pub url: Option<String>,
    pub title: Option<String>,
}

pub struct Pipeline {
    session: CdpSession,
    logs: Arc<EventBuffer<LogEvent>>,
    capture: NetworkCapture,
    ignore: IgnoreList,
    sourcemaps: SourceMapCache,
    page: Arc<Mutex<PageContext>>,
    filelog: Option<FileLogger>,
}

impl Pipeline {
    pub fn new(
        session: CdpSession,
        logs: Arc<EventBuffer<LogEvent>>,
        capture: NetworkCapture,
        ignore: IgnoreList,
        sourcemaps: SourceMapCache,
        page: Arc<Mutex<PageContext>>,
        filelog: Option<FileLogger>,
    ) -> Self {
        Self {
            session,
            logs,
            capture,
            ignore,
            sourcemaps,
            page,
            filelog,
        }
    }

    /// Spawn the consumer task; feed it through the returned sender.
    pub fn spawn(mut self) -> (mpsc::UnboundedSender<RawEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                self.process(raw).await;
            }
        });
        (tx, handle)
    }

    async fn process(&mut self, raw: RawEvent) {
        match raw {
            RawEvent::Console(params) => self.on_console(params).await,
            RawEvent::LogEntry(params) => self.on_log_entry(params).await,
            RawEvent::Exception(params) => self.on_exception(params).await,
            RawEvent::Network { method, params } => self.capture.on_event(&method, &params),
            RawEvent::PageNavigated { url, title } => {
                {
                    let mut page = self.page.lock().unwrap_or_else(|e| e.into_inner());
                    page.url = Some(url.clone());
                    page.title.clone_from(&title);
                }
                if let Some(filelog) = &self.filelog {
                    filelog.navigated(url, title);
                }
            }
            RawEvent::Detached => self.capture.clear(),
        }
    }

    async fn on_console(&mut self, params: Value) {
        let level = params
            .get("type")
            .and_then(Value::as_str)
            .map(LogLevel::from_console_type)
            .unwrap_or(LogLevel::Info);

        let raw_args: Vec<Value> = params
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let text = raw_args
            .iter()
            .map(coerce_text)
            .collect::<Vec<_>>()
            .join(" ");

        let mut previews = Vec::with_capacity(raw_args.len());
        for arg in &raw_args {
            previews.push(self.preview_arg(arg).await);
        }
        let args = if previews.is_empty() {
            None
        } else {
            Some(bound_args(previews))
        };

        let location = self.select_location(params.get("stackTrace")).await;
        let ts = cdp_timestamp_ms(&params);
        self.emit(level, text, args, "console", location, ts);
    }

    async fn on_log_entry(&mut self, params: Value) {
        let entry = &params["entry"];
        let level = entry
            .get("level")
            .and_then(Value::as_str)
            .map(LogLevel::from_console_type)
            .unwrap_or(LogLevel::Info);
        let text = entry
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let mut location = self.select_location(entry.get("stackTrace")).await;
        if location.is_none()
            && let Some(file) = entry.get("url").and_then(Value::as_str)
            && !file.is_empty()
            && !self.ignore.is_ignored(file)
        {
            location = Some(SelectedLocation {
                file: file.to_owned(),
                line: entry.get("lineNumber").and_then(Value::as_u64).unwrap_or(0) as u32 + 1,
                column: 1,
            });
        }

        let ts = entry
            .get("timestamp")
            .and_then(Value::as_f64)
            .map(|t| t as i64)
            .unwrap_or_else(now_ms);
        self.emit(level, text, None, "console", location, ts);
    }

    async fn on_exception(&mut self, params: Value) {
        let details = &params["exceptionDetails"];
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("uncaught exception")
            .to_owned();

        let mut location = self.select_location(details.get("stackTrace")).await;
        if location.is_none()
            && let Some(file) = details.get("url").and_then(Value::as_str)
            && !file.is_empty()
            && !self.ignore.is_ignored(file)
        {
            location = Some(SelectedLocation {
                file: file.to_owned(),
                line: details
                    .get("lineNumber")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32
                    + 1,
                column: details
                    .get("columnNumber")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32
                    + 1,
            });
        }

        let ts = cdp_timestamp_ms(&params);
        self.emit(LogLevel::Exception, text, None, "exception", location, ts);
    }

    fn emit(
        &self,
        level: LogLevel,
        text: String,
        args: Option<Vec<Value>>,
        source: &str,
        location: Option<SelectedLocation>,
        ts: i64,
    ) {
        let (page_url, page_title) = {
            let page = self.page.lock().unwrap_or_else(|e| e.into_inner());
            (page.url.clone(), page.title.clone())
        };
        let mut event = LogEvent {
            id: 0,
            ts,
            level,
            text,
            args,
            source: source.to_owned(),
            file: None,
            line: None,
            column: None,
            page_url,
            page_title,
        };
        event.set_location(location);
        if let Some(filelog) = &self.filelog {
            filelog.log(event.clone());
        }
        self.logs.push(event);
    }

    /// Walk stack frames in order; per frame: convert to 1-based, skip
    /// ignored files, prefer a non-ignored source-mapped location, fall
    /// back to the generated one. None when every frame is ignored.
    async fn select_location(&self, stack: Option<&Value>) -> Option<SelectedLocation> {
        let frames = stack?.get("callFrames")?.as_array()?;
        for frame in frames {
            let file = frame.get("url").and_then(Value::as_str).unwrap_or_default();
            if file.is_empty() {
                continue;
            }
            let line = frame
                .get("lineNumber")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32
                + 1;
            let column = frame
                .get("columnNumber")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32
                + 1;

            if self.ignore.is_ignored(file) {
                continue;
            }
            if let Some(resolved) = self.sourcemaps.resolve(file, line, column).await
                && !self.ignore.is_ignored(&resolved.file)
            {
                return Some(resolved);
            }
            return Some(SelectedLocation {
                file: file.to_owned(),
                line,
                column,
            });
        }
        None
    }

    /// Preview one argument, expanding bare objects with a single
    /// bounded `Runtime.getProperties` call when a session is attached.
    async fn preview_arg(&self, arg: &Value) -> Value {
        match preview_remote(arg) {
            Preview::Value(value) => value,
            Preview::Fetch(object_id) => match self.fetch_properties(&object_id).await {
                Some(value) => value,
                None => Value::String(
                    arg.get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("Object")
                        .to_owned(),
                ),
            },
        }
    }

    async fn fetch_properties(&self, object_id: &str) -> Option<Value> {
        let result = self
            .session
            .send_and_wait(
                "Runtime.getProperties",
                Some(serde_json::json!({
                    "objectId": object_id,
                    "ownProperties": true,
                    "generatePreview": false,
                })),
                Duration::from_secs(2),
            )
            .await
            .ok()?;
        let props = result.get("result")?.as_array()?;
        let mut map = Map::new();
        for prop in props.iter().take(MAX_OWN_PROPERTIES) {
            let Some(name) = prop.get("name").and_then(Value::as_str) else {
                continue;
            };
            let rendered = prop
                .get("value")
                .map(coerce_text)
                .unwrap_or_else(|| "undefined".to_owned());
            map.insert(name.to_owned(), Value::String(rendered));
        }
        Some(Value::Object(map))
    }
}

fn cdp_timestamp_ms(params: &Value) -> i64 {
    params
        .get("timestamp")
        .and_then(Value::as_f64)
        .map(|t| t as i64)
        .unwrap_or_else(now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::{MappedSource, NoSourceMaps, SourceMapResolver};
    use argus_core::types::NetworkRequestSummary;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixture {
        tx: mpsc::UnboundedSender<RawEvent>,
        logs: Arc<EventBuffer<LogEvent>>,
        net: Arc<EventBuffer<NetworkRequestSummary>>,
        page: Arc<Mutex<PageContext>>,
    }

    fn fixture_with(
        ignore: IgnoreList,
        resolver: Arc<dyn SourceMapResolver>,
    ) -> Fixture {
        let logs = Arc::new(EventBuffer::new(1_000));
        let net = Arc::new(EventBuffer::new(1_000));
        let page = Arc::new(Mutex::new(PageContext::default()));
        let pipeline = Pipeline::new(
            CdpSession::new(),
            Arc::clone(&logs),
            NetworkCapture::new(Arc::clone(&net)),
            ignore,
            SourceMapCache::new(resolver),
            Arc::clone(&page),
            None,
        );
        let (tx, _handle) = pipeline.spawn();
        Fixture {
            tx,
            logs,
            net,
            page,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(IgnoreList::default(), Arc::new(NoSourceMaps))
    }

    async fn drain(logs: &EventBuffer<LogEvent>, expected: usize) -> Vec<LogEvent> {
        let (items, _, timed_out) = logs
            .wait_for_after(0, |_| true, expected, Duration::from_secs(2))
            .await;
        assert!(!timed_out, "expected {expected} events");
        items
    }

    #[tokio::test]
    async fn console_log_becomes_info_event() {
        let fx = fixture();
        fx.tx
            .send(RawEvent::Console(json!({
                "type": "log",
                "timestamp": 1_700_000_000_000.0_f64,
                "args": [
                    {"type": "string", "value": "hello from e2e"},
                    {"type": "number", "value": 1_700_000_000_000_u64},
                ],
            })))
            .unwrap();

        let events = drain(&fx.logs, 1).await;
        let event = &events[0];
        assert_eq!(event.level, LogLevel::Info);
        assert_eq!(event.source, "console");
        assert_eq!(event.text, "hello from e2e 1700000000000");
        assert_eq!(event.ts, 1_700_000_000_000);
        assert!(event.id >= 1);
        assert_eq!(
            event.args.as_ref().unwrap()[0],
            json!("hello from e2e")
        );
    }

    #[tokio::test]
    async fn exception_uses_description_and_stack() {
        let fx = fixture();
        fx.tx
            .send(RawEvent::Exception(json!({
                "timestamp": 5.0,
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": {"description": "Error: boom\n    at fail (app.js:2:9)"},
                    "stackTrace": {"callFrames": [
                        {"url": "https://app.example/app.js", "lineNumber": 1, "columnNumber": 8},
                    ]},
                },
            })))
            .unwrap();

        let events = drain(&fx.logs, 1).await;
        let event = &events[0];
        assert_eq!(event.level, LogLevel::Exception);
        assert_eq!(event.source, "exception");
        assert!(event.text.starts_with("Error: boom"));
        assert_eq!(event.file.as_deref(), Some("https://app.example/app.js"));
        assert_eq!(event.line, Some(2), "0-based CDP line becomes 1-based");
        assert_eq!(event.column, Some(9));
    }

    #[tokio::test]
    async fn ignored_frames_are_skipped() {
        let ignore = IgnoreList::compile(&["vendor".to_owned()]).unwrap();
        let fx = fixture_with(ignore, Arc::new(NoSourceMaps));
        fx.tx
            .send(RawEvent::Console(json!({
                "type": "error",
                "args": [{"type": "string", "value": "x"}],
                "stackTrace": {"callFrames": [
                    {"url": "https://cdn/vendor.js", "lineNumber": 10, "columnNumber": 0},
                    {"url": "https://app/src.js", "lineNumber": 4, "columnNumber": 2},
                ]},
            })))
            .unwrap();

        let events = drain(&fx.logs, 1).await;
        assert_eq!(events[0].file.as_deref(), Some("https://app/src.js"));
        assert_eq!(events[0].line, Some(5));
    }

    #[tokio::test]
    async fn all_frames_ignored_means_no_location() {
        let ignore = IgnoreList::compile(&["vendor".to_owned()]).unwrap();
        let fx = fixture_with(ignore, Arc::new(NoSourceMaps));
        fx.tx
            .send(RawEvent::Console(json!({
                "type": "log",
                "args": [{"type": "string", "value": "x"}],
                "stackTrace": {"callFrames": [
                    {"url": "https://cdn/vendor.js", "lineNumber": 1, "columnNumber": 1},
                ]},
            })))
            .unwrap();

        let events = drain(&fx.logs, 1).await;
        assert!(events[0].file.is_none());
    }

    struct StaticMap;
    impl MappedSource for StaticMap {
        fn original_position(&self, _line: u32, _column: u32) -> Option<SelectedLocation> {
            Some(SelectedLocation {
                file: "src/main.ts".into(),
                line: 30,
                column: 7,
            })
        }
    }
    struct StaticResolver;
    #[async_trait]
    impl SourceMapResolver for StaticResolver {
        async fn fetch(&self, file: &str) -> Option<Arc<dyn MappedSource>> {
            (file == "https://app/bundle.js").then(|| Arc::new(StaticMap) as Arc<dyn MappedSource>)
        }
    }

    #[tokio::test]
    async fn source_mapped_location_preferred() {
        let fx = fixture_with(IgnoreList::default(), Arc::new(StaticResolver));
        fx.tx
            .send(RawEvent::Console(json!({
                "type": "log",
                "args": [{"type": "string", "value": "x"}],
                "stackTrace": {"callFrames": [
                    {"url": "https://app/bundle.js", "lineNumber": 100, "columnNumber": 5},
                ]},
            })))
            .unwrap();

        let events = drain(&fx.logs, 1).await;
        assert_eq!(events[0].file.as_deref(), Some("src/main.ts"));
        assert_eq!(events[0].line, Some(30));
    }

    #[tokio::test]
    async fn ignored_resolved_source_falls_back_to_generated() {
        let ignore = IgnoreList::compile(&["main\\.ts".to_owned()]).unwrap();
        let fx = fixture_with(ignore, Arc::new(StaticResolver));
        fx.tx
            .send(RawEvent::Console(json!({
                "type": "log",
                "args": [{"type": "string", "value": "x"}],
                "stackTrace": {"callFrames": [
                    {"url": "https://app/bundle.js", "lineNumber": 100, "columnNumber": 5},
                ]},
            })))
            .unwrap();

        let events = drain(&fx.logs, 1).await;
        assert_eq!(events[0].file.as_deref(), Some("https://app/bundle.js"));
        assert_eq!(events[0].line, Some(101));
    }

    #[tokio::test]
    async fn page_context_is_stamped_on_events() {
        let fx = fixture();
        fx.tx
            .send(RawEvent::PageNavigated {
                url: "https://app/page".into(),
                title: Some("App".into()),
            })
            .unwrap();
        fx.tx
            .send(RawEvent::Console(json!({
                "type": "log",
                "args": [{"type": "string", "value": "after nav"}],
            })))
            .unwrap();

        let events = drain(&fx.logs, 1).await;
        assert_eq!(events[0].page_url.as_deref(), Some("https://app/page"));
        assert_eq!(events[0].page_title.as_deref(), Some("App"));
        assert_eq!(
            fx.page.lock().unwrap().url.as_deref(),
            Some("https://app/page")
        );
    }

    #[tokio::test]
    async fn network_events_flow_to_net_buffer_in_order() {
        let fx = fixture();
        fx.tx
            .send(RawEvent::Network {
                method: "Network.requestWillBeSent".into(),
                params: json!({"requestId": "r1", "timestamp": 1.0,
                    "request": {"url": "https://e.com/a", "method": "GET"}}),
            })
            .unwrap();
        fx.tx
            .send(RawEvent::Network {
                method: "Network.loadingFinished".into(),
                params: json!({"requestId": "r1", "timestamp": 1.5}),
            })
            .unwrap();

        let (items, _, timed_out) = fx
            .net
            .wait_for_after(0, |_| true, 10, Duration::from_secs(2))
            .await;
        assert!(!timed_out);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://e.com/a");
    }

    #[tokio::test]
    async fn log_entry_added_maps_level_and_url() {
        let fx = fixture();
        fx.tx
            .send(RawEvent::LogEntry(json!({
                "entry": {
                    "source": "network",
                    "level": "warning",
                    "text": "mixed content",
                    "timestamp": 123.0,
                    "url": "https://app/page.html",
                    "lineNumber": 9,
                },
            })))
            .unwrap();

        let events = drain(&fx.logs, 1).await;
        assert_eq!(events[0].level, LogLevel::Warning);
        assert_eq!(events[0].text, "mixed content");
        assert_eq!(events[0].file.as_deref(), Some("https://app/page.html"));
        assert_eq!(events[0].line, Some(10));
    }
}
