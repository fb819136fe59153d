use super::{FailureReason, Outcome, ProbeBackend, ProbeError};
use crate::profile::{Profile, Protocol};
use reqwest::{Client, Proxy};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// URL test: fetch `test_url` through the profile's tunnel.
pub async fn probe(
    profile: &Profile,
    backend: &dyn ProbeBackend,
    test_url: &str,
    timeout: Duration,
) -> Outcome {
    match backend.url_test(profile, test_url, timeout).await {
        Ok(latency_ms) => Outcome::Success { latency_ms },
        Err(ProbeError::PluginNotFound(plugin)) => {
            warn!(profile = %profile.id, %plugin, "URL test needs a missing plugin");
            Outcome::failure(FailureReason::PluginNotFound(plugin))
        }
        Err(e) => {
            warn!(profile = %profile.id, error = %e, "URL test failed");
            Outcome::failure(FailureReason::Generic(Some(e.to_string())))
        }
    }
}

/// Proxy URL for protocols reqwest can tunnel through natively.
fn proxy_url(profile: &Profile) -> Option<String> {
    let host = match profile.server.trim().parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
        _ => profile.server.trim().to_string(),
    };
    match profile.protocol {
        Protocol::Socks => Some(format!("socks5h://{}:{}", host, profile.port)),
        Protocol::Http => Some(format!("http://{}:{}", host, profile.port)),
        _ => None,
    }
}

/// Fetch `url` through the profile's proxy and time the round trip.
///
/// Any HTTP response counts as a completed round trip.
pub(crate) async fn fetch_through_proxy(
    profile: &Profile,
    url: &str,
    timeout: Duration,
) -> Result<u32, ProbeError> {
    if !profile.has_endpoint() {
        return Err(ProbeError::InvalidConfig(format!(
            "profile {} has no server address",
            profile.id
        )));
    }
    let proxy = proxy_url(profile).ok_or_else(|| {
        ProbeError::Failed(format!(
            "{} profiles need the tunnel core for URL tests",
            profile.protocol.name()
        ))
    })?;

    let proxy = Proxy::all(&proxy).map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;
    let client = Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .build()
        .map_err(|e| ProbeError::Failed(format!("failed to build HTTP client: {}", e)))?;

    let start = Instant::now();
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(format!("{} timed out after {:?}", url, timeout))
        } else {
            ProbeError::Failed(e.to_string())
        }
    })?;
    let elapsed = start.elapsed();

    debug!(profile = %profile.id, status = %response.status(), ?elapsed, "URL test response");
    Ok(elapsed.as_millis().min(u32::MAX as u128) as u32)
}
