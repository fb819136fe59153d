//! TCP connection probe implementation.

use super::dns;
use super::{FailureReason, Outcome, ProbeBackend, ProbeError};
use crate::profile::Profile;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// TCP reachability probe.
pub async fn probe(profile: &Profile, backend: &dyn ProbeBackend, timeout: Duration) -> Outcome {
    if !profile.can_tcp_ping() {
        return Outcome::failure(FailureReason::TcpUnavailable);
    }
    if !profile.has_endpoint() {
        return Outcome::failure(FailureReason::InvalidConfig);
    }

    let addr = match dns::resolve(backend, &profile.server).await {
        Ok(addr) => addr,
        Err(_) => return Outcome::failure(FailureReason::DomainNotFound),
    };

    match backend.tcp_connect(addr, profile.port, timeout).await {
        Ok(latency_ms) => Outcome::Success { latency_ms },
        Err(e) => {
            let message = e.to_string();
            warn!(profile = %profile.id, %addr, port = profile.port, error = %message, "TCP ping failed");
            Outcome::failure(classify_error(&message))
        }
    }
}

/// Map connect error text onto a failure reason.
///
/// Best-effort: the markers are errno names and the `failed:` prefix that
/// [`connect`] writes for socket-level errors. Anything else falls back to
/// `Generic`.
pub fn classify_error(message: &str) -> FailureReason {
    if message.contains("ECONNREFUSED") {
        FailureReason::ConnectionRefused
    } else if message.contains("ENETUNREACH") {
        FailureReason::NetworkUnreachable
    } else if !message.contains("failed:") {
        FailureReason::Timeout
    } else {
        FailureReason::Generic(Some(message.to_string()))
    }
}

/// Open a TCP connection to `addr:port` and report how long it took.
pub(crate) async fn connect(addr: IpAddr, port: u16, timeout: Duration) -> Result<u32, ProbeError> {
    let target = SocketAddr::new(addr, port);
    let start = Instant::now();

    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(target)).await {
        Ok(Ok(stream)) => {
            let elapsed = start.elapsed();
            drop(stream);
            debug!(%target, ?elapsed, "TCP connect ok");
            Ok(elapsed.as_millis().min(u32::MAX as u128) as u32)
        }
        Ok(Err(e)) => Err(ProbeError::Failed(format!(
            "connect {} failed: {}: {}",
            target,
            errno_name(&e),
            e
        ))),
        Err(_) => Err(ProbeError::Timeout(format!("connect {}: i/o timeout", target))),
    }
}

fn errno_name(e: &std::io::Error) -> &'static str {
    match e.raw_os_error() {
        Some(libc::ECONNREFUSED) => "ECONNREFUSED",
        Some(libc::ENETUNREACH) => "ENETUNREACH",
        Some(libc::EHOSTUNREACH) => "EHOSTUNREACH",
        Some(libc::ECONNRESET) => "ECONNRESET",
        Some(libc::ETIMEDOUT) => "ETIMEDOUT",
        Some(libc::EACCES) => "EACCES",
        Some(libc::EPERM) => "EPERM",
        _ => match e.kind() {
            std::io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
            std::io::ErrorKind::TimedOut => "ETIMEDOUT",
            _ => "EIO",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::testing::ScriptedBackend;
    use crate::profile::{GroupId, ProfileId, Protocol};

    fn profile(server: &str, port: u16, protocol: Protocol) -> Profile {
        Profile::new(ProfileId(7), GroupId(1), "p", server, port, protocol)
    }

    #[test]
    fn test_classify_refused() {
        assert_eq!(
            classify_error("connect 10.0.0.1:443 failed: ECONNREFUSED: Connection refused"),
            FailureReason::ConnectionRefused
        );
    }

    #[test]
    fn test_classify_unreachable() {
        assert_eq!(
            classify_error("connect 10.0.0.1:443 failed: ENETUNREACH: Network is unreachable"),
            FailureReason::NetworkUnreachable
        );
    }

    #[test]
    fn test_classify_timeout_without_marker() {
        assert_eq!(
            classify_error("connect 10.0.0.1:443: i/o timeout"),
            FailureReason::Timeout
        );
    }

    #[test]
    fn test_classify_other_failures_are_generic() {
        let msg = "connect 10.0.0.1:443 failed: EACCES: Permission denied";
        assert_eq!(
            classify_error(msg),
            FailureReason::Generic(Some(msg.to_string()))
        );
    }

    #[tokio::test]
    async fn test_incapable_profile() {
        let backend = ScriptedBackend::default();
        let outcome = probe(&profile("10.0.0.1", 443, Protocol::Tuic), &backend, Duration::from_secs(3)).await;
        assert_eq!(outcome, Outcome::failure(FailureReason::TcpUnavailable));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_port_zero_is_invalid_config() {
        let backend = ScriptedBackend::default();
        let outcome = probe(&profile("10.0.0.1", 0, Protocol::Socks), &backend, Duration::from_secs(3)).await;
        assert_eq!(outcome, Outcome::failure(FailureReason::InvalidConfig));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_connects_to_resolved_address_and_port() {
        let backend = ScriptedBackend::default().with_host("proxy.example", "192.0.2.5");
        let outcome = probe(&profile("proxy.example", 8388, Protocol::Shadowsocks), &backend, Duration::from_secs(3)).await;
        assert_eq!(outcome, Outcome::Success { latency_ms: 20 });
        let targets = backend.tcp_targets.lock().unwrap().clone();
        assert_eq!(targets, vec![("192.0.2.5".parse().unwrap(), 8388)]);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let backend = ScriptedBackend {
            tcp: || Err(ProbeError::Failed("connect 10.0.0.1:443 failed: ECONNREFUSED: Connection refused (os error 111)".into())),
            ..Default::default()
        };
        let outcome = probe(&profile("10.0.0.1", 443, Protocol::Socks), &backend, Duration::from_secs(3)).await;
        assert_eq!(outcome, Outcome::failure(FailureReason::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_real_refused_connection_is_classified() {
        // Bind then drop to get a local port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1".parse().unwrap(), port, Duration::from_secs(3))
            .await
            .unwrap_err();
        assert_eq!(classify_error(&err.to_string()), FailureReason::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_real_connect_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let latency = connect("127.0.0.1".parse().unwrap(), port, Duration::from_secs(3)).await;
        assert!(latency.is_ok());
    }
}
