//! Typed HTTP dispatch to a resolved watcher.

use std::time::Duration;

use argus_core::record::WatcherRecord;
use serde_json::Value;

/// Per-endpoint request deadline; long-polls add their wait on top.
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum DispatchError {
    /// Could not reach the watcher at all.
    Network(String),
    /// The watcher answered with `ok:false`.
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(message) => write!(f, "{message}"),
            Self::Api { message, .. } => f.write_str(message),
        }
    }
}

impl DispatchError {
    /// Validation failures exit 2, everything else exits 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Api { status, code, .. }
                if *status == 400 || code.as_deref() == Some("validation") =>
            {
                2
            }
            _ => 1,
        }
    }
}

pub struct WatcherClient {
    base: String,
    http: reqwest::Client,
}

impl WatcherClient {
    pub fn new(record: &WatcherRecord) -> Self {
        Self {
            base: format!("http://{}:{}", record.host, record.port),
            http: reqwest::Client::new(),
        }
    }

    pub async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<Value, DispatchError> {
        let request = self
            .http
            .get(format!("{}{path}", self.base))
            .query(query)
            .timeout(timeout.unwrap_or(DEFAULT_DISPATCH_TIMEOUT));
        Self::finish(request.send().await).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, DispatchError> {
        let request = self
            .http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .timeout(timeout.unwrap_or(DEFAULT_DISPATCH_TIMEOUT));
        Self::finish(request.send().await).await
    }

    async fn finish(
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<Value, DispatchError> {
        let response = response.map_err(|err| DispatchError::Network(err.to_string()))?;
        let status = response.status().as_u16();
        let payload: Value = response
            .json()
            .await
            .map_err(|err| DispatchError::Network(format!("invalid response body: {err}")))?;

        if payload.get("ok").and_then(Value::as_bool) == Some(false) {
            let error = &payload["error"];
            return Err(DispatchError::Api {
                status,
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("watcher reported an error")
                    .to_owned(),
                code: error
                    .get("code")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            });
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_exit_2() {
        let err = DispatchError::Api {
            status: 400,
            message: "bad".into(),
            code: Some("validation".into()),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn runtime_errors_exit_1() {
        let network = DispatchError::Network("refused".into());
        assert_eq!(network.exit_code(), 1);
        let api = DispatchError::Api {
            status: 409,
            message: "detached".into(),
            code: Some("cdp_not_attached".into()),
        };
        assert_eq!(api.exit_code(), 1);
    }
}
