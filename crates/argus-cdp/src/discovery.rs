//! Target discovery against the browser's HTTP endpoint.

use std::time::Duration;

use argus_core::matching::TargetInfo;

use crate::error::CdpError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Fetch the current target list from `http://<host>:<port>/json/list`.
pub async fn fetch_targets(
    client: &reqwest::Client,
    host: &str,
    port: u16,
) -> Result<Vec<TargetInfo>, CdpError> {
    let url = format!("http://{host}:{port}/json/list");
    let response = client
        .get(&url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|err| CdpError::Discovery(format!("{url}: {err}")))?;
    if !response.status().is_success() {
        return Err(CdpError::Discovery(format!(
            "{url}: HTTP {}",
            response.status()
        )));
    }
    response
        .json::<Vec<TargetInfo>>()
        .await
        .map_err(|err| CdpError::Discovery(format!("{url}: invalid body: {err}")))
}
