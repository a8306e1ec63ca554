//! Network capture: aggregate `Network.*` events into request summaries.

use std::collections::HashMap;
use std::sync::Arc;

use argus_core::redact::redact_url;
use argus_core::types::NetworkRequestSummary;
use argus_core::util::now_ms;
use serde_json::Value;

use crate::buffer::EventBuffer;

/// One request still in flight, keyed by CDP `requestId`.
#[derive(Debug, Clone)]
struct Pending {
    ts: i64,
    method: String,
    url: String,
    resource_type: Option<String>,
    status: Option<i64>,
    /// CDP monotonic timestamp (seconds) of `requestWillBeSent`.
    start_time: Option<f64>,
}

pub struct NetworkCapture {
    inflight: HashMap<String, Pending>,
    buffer: Arc<EventBuffer<NetworkRequestSummary>>,
}

impl NetworkCapture {
    pub fn new(buffer: Arc<EventBuffer<NetworkRequestSummary>>) -> Self {
        Self {
            inflight: HashMap::new(),
            buffer,
        }
    }

    /// Route one `Network.*` event.
    pub fn on_event(&mut self, method: &str, params: &Value) {
        match method {
            "Network.requestWillBeSent" => self.on_request_will_be_sent(params),
            "Network.responseReceived" => self.on_response_received(params),
            "Network.loadingFinished" => self.on_loading_finished(params),
            "Network.loadingFailed" => self.on_loading_failed(params),
            _ => {}
        }
    }

    /// Drop the in-flight table; no orphan entries are committed.
    pub fn clear(&mut self) {
        self.inflight.clear();
    }

    #[cfg(test)]
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    fn on_request_will_be_sent(&mut self, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let request = &params["request"];
        let url = request
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.inflight.insert(
            request_id.to_owned(),
            Pending {
                ts: now_ms(),
                method: request
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or("GET")
                    .to_owned(),
                url: redact_url(url),
                resource_type: params.get("type").and_then(Value::as_str).map(str::to_owned),
                status: None,
                start_time: params.get("timestamp").and_then(Value::as_f64),
            },
        );
    }

    fn on_response_received(&mut self, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        if let Some(pending) = self.inflight.get_mut(request_id) {
            pending.status = params["response"].get("status").and_then(Value::as_i64);
            if pending.resource_type.is_none() {
                pending.resource_type =
                    params.get("type").and_then(Value::as_str).map(str::to_owned);
            }
        }
    }

    fn on_loading_finished(&mut self, params: &Value) {
        self.commit(params, None);
    }

    fn on_loading_failed(&mut self, params: &Value) {
        let error_text = params
            .get("errorText")
            .and_then(Value::as_str)
            .unwrap_or("loading failed")
            .to_owned();
        self.commit(params, Some(error_text));
    }

    fn commit(&mut self, params: &Value, error_text: Option<String>) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let Some(pending) = self.inflight.remove(request_id) else {
            return;
        };

        let duration_ms = match (pending.start_time, params.get("timestamp").and_then(Value::as_f64))
        {
            (Some(start), Some(end)) => Some(((end - start) * 1000.0).max(0.0)),
            _ => None,
        };

        self.buffer.push(NetworkRequestSummary {
            id: 0,
            ts: pending.ts,
            method: pending.method,
            url: pending.url,
            resource_type: pending.resource_type,
            status: pending.status,
            encoded_data_length: params.get("encodedDataLength").and_then(Value::as_f64),
            error_text,
            duration_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capture() -> (NetworkCapture, Arc<EventBuffer<NetworkRequestSummary>>) {
        let buffer = Arc::new(EventBuffer::new(100));
        (NetworkCapture::new(Arc::clone(&buffer)), buffer)
    }

    fn send(capture: &mut NetworkCapture, id: &str, url: &str, start: f64) {
        capture.on_event(
            "Network.requestWillBeSent",
            &json!({
                "requestId": id,
                "timestamp": start,
                "type": "Fetch",
                "request": {"url": url, "method": "POST"},
            }),
        );
    }

    #[test]
    fn finished_request_commits_full_summary() {
        let (mut capture, buffer) = capture();
        send(&mut capture, "r1", "https://api.example.com/v1?token=shh&q=x", 10.0);
        capture.on_event(
            "Network.responseReceived",
            &json!({"requestId": "r1", "response": {"status": 201}}),
        );
        capture.on_event(
            "Network.loadingFinished",
            &json!({"requestId": "r1", "timestamp": 10.25, "encodedDataLength": 1024.0}),
        );

        let (items, _) = buffer.list_after(0, |_| true, 10);
        assert_eq!(items.len(), 1);
        let summary = &items[0];
        assert_eq!(summary.method, "POST");
        assert_eq!(summary.status, Some(201));
        assert_eq!(summary.encoded_data_length, Some(1024.0));
        assert!((summary.duration_ms.unwrap() - 250.0).abs() < 1.0);
        assert!(summary.url.contains("token=redacted"));
        assert!(summary.url.contains("q="));
        assert!(!summary.url.contains("shh"));
        assert_eq!(capture.inflight_len(), 0);
    }

    #[test]
    fn failed_request_commits_error_text() {
        let (mut capture, buffer) = capture();
        send(&mut capture, "r2", "https://down.example/", 5.0);
        capture.on_event(
            "Network.loadingFailed",
            &json!({"requestId": "r2", "timestamp": 5.1, "errorText": "net::ERR_CONNECTION_REFUSED"}),
        );

        let (items, _) = buffer.list_after(0, |_| true, 10);
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].error_text.as_deref(),
            Some("net::ERR_CONNECTION_REFUSED")
        );
    }

    #[test]
    fn duration_is_clamped_non_negative() {
        let (mut capture, buffer) = capture();
        send(&mut capture, "r3", "https://e.com/", 10.0);
        capture.on_event(
            "Network.loadingFinished",
            &json!({"requestId": "r3", "timestamp": 9.0}),
        );
        let (items, _) = buffer.list_after(0, |_| true, 10);
        assert_eq!(items[0].duration_ms, Some(0.0));
    }

    #[test]
    fn finish_for_unknown_request_is_ignored() {
        let (mut capture, buffer) = capture();
        capture.on_event(
            "Network.loadingFinished",
            &json!({"requestId": "ghost", "timestamp": 1.0}),
        );
        let (items, _) = buffer.list_after(0, |_| true, 10);
        assert!(items.is_empty());
    }

    #[test]
    fn detach_clears_without_committing() {
        let (mut capture, buffer) = capture();
        send(&mut capture, "r4", "https://e.com/a", 1.0);
        send(&mut capture, "r5", "https://e.com/b", 2.0);
        assert_eq!(capture.inflight_len(), 2);

        capture.clear();
        assert_eq!(capture.inflight_len(), 0);
        let (items, _) = buffer.list_after(0, |_| true, 10);
        assert!(items.is_empty(), "no orphan entries committed");

        // A late finish after the clear is also ignored.
        capture.on_event(
            "Network.loadingFinished",
            &json!({"requestId": "r4", "timestamp": 3.0}),
        );
        let (items, _) = buffer.list_after(0, |_| true, 10);
        assert!(items.is_empty());
    }
}
