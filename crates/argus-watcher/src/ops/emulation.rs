//! Idempotent application of emulation and throttle settings. Called on
//! explicit POSTs and again on every re-attach.

use argus_cdp::{CdpError, CdpSession};
use serde_json::json;

use crate::controllers::{EmulationSettings, ThrottleSettings};
use crate::ops::OP_TIMEOUT;

pub async fn apply_emulation(
    session: &CdpSession,
    settings: &EmulationSettings,
) -> Result<(), CdpError> {
    match (settings.width, settings.height) {
        (Some(width), Some(height)) => {
            session
                .send_and_wait(
                    "Emulation.setDeviceMetricsOverride",
                    Some(json!({
                        "width": width,
                        "height": height,
                        "deviceScaleFactor": settings.device_scale_factor.unwrap_or(1.0),
                        "mobile": settings.mobile.unwrap_or(false),
                    })),
                    OP_TIMEOUT,
                )
                .await?;
        }
        _ => {
            session
                .send_and_wait("Emulation.clearDeviceMetricsOverride", None, OP_TIMEOUT)
                .await?;
        }
    }

    if let Some(touch) = settings.touch {
        session
            .send_and_wait(
                "Emulation.setTouchEmulationEnabled",
                Some(json!({"enabled": touch})),
                OP_TIMEOUT,
            )
            .await?;
    }

    if let Some(user_agent) = &settings.user_agent {
        session
            .send_and_wait(
                "Emulation.setUserAgentOverride",
                Some(json!({"userAgent": user_agent})),
                OP_TIMEOUT,
            )
            .await?;
    }

    Ok(())
}

pub async fn apply_throttle(
    session: &CdpSession,
    settings: &ThrottleSettings,
) -> Result<(), CdpError> {
    if let Some(rate) = settings.cpu_rate {
        session
            .send_and_wait(
                "Emulation.setCPUThrottlingRate",
                Some(json!({"rate": rate})),
                OP_TIMEOUT,
            )
            .await?;
    }

    if settings.offline.is_some()
        || settings.latency_ms.is_some()
        || settings.download_bps.is_some()
        || settings.upload_bps.is_some()
    {
        session
            .send_and_wait(
                "Network.emulateNetworkConditions",
                Some(json!({
                    "offline": settings.offline.unwrap_or(false),
                    "latency": settings.latency_ms.unwrap_or(0.0),
                    "downloadThroughput": settings.download_bps.unwrap_or(-1.0),
                    "uploadThroughput": settings.upload_bps.unwrap_or(-1.0),
                })),
                OP_TIMEOUT,
            )
            .await?;
    }

    if let Some(disabled) = settings.cache_disabled {
        session
            .send_and_wait(
                "Network.setCacheDisabled",
                Some(json!({"cacheDisabled": disabled})),
                OP_TIMEOUT,
            )
            .await?;
    }

    Ok(())
}
