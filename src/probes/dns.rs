//! Host resolution for ICMP and TCP probes.

use super::ProbeBackend;
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("host {0} is not resolvable")]
pub struct Unresolvable(pub String);

/// Parse `host` as a literal IP address, accepting bracketed IPv6.
pub fn literal_ip(host: &str) -> Option<IpAddr> {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.parse().ok()
}

/// Resolve `host` to a single address.
///
/// Literal addresses are returned without a lookup. Otherwise one lookup is
/// made and the first answer wins. No retries, no caching.
pub async fn resolve(backend: &dyn ProbeBackend, host: &str) -> Result<IpAddr, Unresolvable> {
    if let Some(ip) = literal_ip(host) {
        return Ok(ip);
    }

    match backend.lookup_host(host.trim()).await {
        Ok(addrs) => addrs.into_iter().next().ok_or_else(|| {
            debug!(%host, "lookup returned no addresses");
            Unresolvable(host.to_string())
        }),
        Err(e) => {
            debug!(%host, error = %e, "lookup failed");
            Err(Unresolvable(host.to_string()))
        }
    }
}
