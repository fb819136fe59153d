use super::dns;
use super::{FailureReason, Outcome, ProbeBackend, ProbeError};
use crate::profile::Profile;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// ICMP reachability probe.
pub async fn probe(profile: &Profile, backend: &dyn ProbeBackend, timeout: Duration) -> Outcome {
    if !profile.can_icmp_ping() {
        return Outcome::failure(FailureReason::IcmpUnavailable);
    }
    let addr = match dns::resolve(backend, &profile.server).await {
        Ok(addr) => addr,
        Err(_) => return Outcome::failure(FailureReason::DomainNotFound),
    };

    match backend.icmp_echo(addr, timeout).await {
        Ok(latency_ms) => Outcome::Success { latency_ms },
        Err(e) => {
            warn!(profile = %profile.id, %addr, error = %e, "ICMP ping failed");
            Outcome::failure(FailureReason::Generic(Some(e.to_string())))
        }
    }
}

/// Send one echo request using the system `ping` binary.
/// Future: raw sockets via `socket2` to avoid the fork/exec per probe.
pub(crate) async fn system_ping(addr: IpAddr, timeout: Duration) -> Result<u32, ProbeError> {
    let start = Instant::now();

    // -W takes whole seconds on busybox and older iputils.
    let timeout_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;

    let mut command = tokio::process::Command::new("ping");
    if addr.is_ipv6() {
        command.arg("-6");
    }
    let output = tokio::time::timeout(
        timeout + Duration::from_secs(1),
        command
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(timeout_secs.to_string())
            .arg("-q")
            .arg(addr.to_string())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ProbeError::Timeout(format!("no reply from {} within {:?}", addr, timeout)))?
    .map_err(|e| ProbeError::Failed(format!("failed to execute ping: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            format!("no reply from {}", addr)
        } else {
            stderr.trim().to_string()
        };
        return Err(ProbeError::Failed(message));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let rtt_ms = extract_rtt(&stdout).unwrap_or_else(|| {
        debug!(%addr, "ping succeeded but RTT was not parsed, using wall clock");
        start.elapsed().as_secs_f64() * 1000.0
    });

    Ok(rtt_ms.round().max(0.0) as u32)
}

fn extract_rtt(output: &str) -> Option<f64> {
    // "... time=14.2 ms"
    if let Some(pos) = output.find("time=") {
        let rest = &output[pos + 5..];
        let end = rest.find(|c: char| c == ' ' || c == 'm').unwrap_or(rest.len());
        if let Ok(v) = rest[..end].parse::<f64>() {
            return Some(v);
        }
    }

    // "rtt min/avg/max/mdev = 14.188/14.188/14.188/0.000 ms"
    if let Some(pos) = output.find(" = ") {
        if output[..pos].contains("rtt") || output[..pos].contains("round-trip") {
            let parts: Vec<&str> = output[pos + 3..].split('/').collect();
            if parts.len() >= 2 {
                return parts[1].parse::<f64>().ok();
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::testing::ScriptedBackend;
    use crate::profile::{GroupId, ProfileId, Protocol};

    fn profile(server: &str, protocol: Protocol) -> Profile {
        Profile::new(ProfileId(1), GroupId(1), "p", server, 443, protocol)
    }

    #[test]
    fn test_extract_rtt_from_summary() {
        let out = "--- 8.8.8.8 ping statistics ---\n1 packets transmitted, 1 received\nrtt min/avg/max/mdev = 14.188/14.500/14.188/0.000 ms\n";
        assert_eq!(extract_rtt(out), Some(14.5));
    }

    #[test]
    fn test_extract_rtt_from_reply_line() {
        assert_eq!(extract_rtt("64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=9.81 ms"), Some(9.81));
    }

    #[test]
    fn test_extract_rtt_missing() {
        assert_eq!(extract_rtt("garbage"), None);
    }

    #[tokio::test]
    async fn test_incapable_profile_makes_no_calls() {
        let backend = ScriptedBackend::default();
        let outcome = probe(&profile("1.1.1.1", Protocol::Direct), &backend, Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::failure(FailureReason::IcmpUnavailable));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let backend = ScriptedBackend::default();
        let outcome = probe(&profile("nowhere.invalid", Protocol::Socks), &backend, Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::failure(FailureReason::DomainNotFound));
    }

    #[tokio::test]
    async fn test_resolved_host_success() {
        let backend = ScriptedBackend::default().with_host("proxy.example", "10.0.0.1");
        let outcome = probe(&profile("proxy.example", Protocol::Socks), &backend, Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::Success { latency_ms: 10 });
    }

    #[tokio::test]
    async fn test_port_is_ignored() {
        let backend = ScriptedBackend::default();
        let mut p = profile("10.0.0.1", Protocol::Socks);
        p.port = 0;
        let outcome = probe(&p, &backend, Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::Success { latency_ms: 10 });
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_server_is_domain_not_found() {
        let backend = ScriptedBackend::default();
        let outcome = probe(&profile("", Protocol::Socks), &backend, Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::failure(FailureReason::DomainNotFound));
    }

    #[tokio::test]
    async fn test_echo_error_is_generic() {
        let backend = ScriptedBackend {
            icmp: || Err(ProbeError::Failed("operation not permitted".into())),
            ..Default::default()
        };
        let outcome = probe(&profile("10.0.0.1", Protocol::Socks), &backend, Duration::from_secs(5)).await;
        assert_eq!(
            outcome,
            Outcome::failure(FailureReason::Generic(Some("operation not permitted".into())))
        );
    }
}
