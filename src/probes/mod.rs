//! Probe strategies for proxy profiles.
//!
//! Each strategy takes one profile and yields one [`Outcome`]. Network access
//! goes through a [`ProbeBackend`] so the strategies carry no state of their
//! own and can run concurrently.

use crate::config::TestSettings;
use crate::profile::Profile;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

pub mod backend;
pub mod dns;
pub mod icmp;
pub mod tcp;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

pub use self::backend::SystemBackend;

/// Which strategy a test run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeKind {
    IcmpPing,
    TcpPing,
    UrlTest,
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::IcmpPing => write!(f, "icmp"),
            ProbeKind::TcpPing => write!(f, "tcp"),
            ProbeKind::UrlTest => write!(f, "url"),
        }
    }
}

impl std::str::FromStr for ProbeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "icmp" | "icmp-ping" => Ok(ProbeKind::IcmpPing),
            "tcp" | "tcp-ping" => Ok(ProbeKind::TcpPing),
            "url" | "url-test" => Ok(ProbeKind::UrlTest),
            other => anyhow::bail!("unknown probe kind '{}' (expected icmp, tcp or url)", other),
        }
    }
}

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    InvalidConfig,
    DomainNotFound,
    IcmpUnavailable,
    TcpUnavailable,
    ConnectionRefused,
    NetworkUnreachable,
    Timeout,
    PluginNotFound(String),
    Generic(Option<String>),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::InvalidConfig => write!(f, "invalid profile configuration"),
            FailureReason::DomainNotFound => write!(f, "domain not found"),
            FailureReason::IcmpUnavailable => write!(f, "ICMP ping not supported by this profile"),
            FailureReason::TcpUnavailable => write!(f, "TCP ping not supported by this profile"),
            FailureReason::ConnectionRefused => write!(f, "connection refused"),
            FailureReason::NetworkUnreachable => write!(f, "network unreachable"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::PluginNotFound(plugin) => write!(f, "plugin not found: {}", plugin),
            FailureReason::Generic(Some(message)) => write!(f, "{}", message),
            FailureReason::Generic(None) => write!(f, "unknown error"),
        }
    }
}

/// Terminal result of probing one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success { latency_ms: u32 },
    Failure { reason: FailureReason },
}

impl Outcome {
    pub fn failure(reason: FailureReason) -> Self {
        Outcome::Failure { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success { latency_ms } => write!(f, "{} ms", latency_ms),
            Outcome::Failure { reason } => write!(f, "{}", reason),
        }
    }
}

/// Errors raised by the network primitives.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("plugin {0} is not installed")]
    PluginNotFound(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Failed(String),
}

/// Network primitives used by the probe strategies.
///
/// Latencies are returned in milliseconds.
#[async_trait::async_trait]
pub trait ProbeBackend: Send + Sync {
    /// Forward DNS lookup.
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, ProbeError>;

    /// Send a single ICMP echo request.
    async fn icmp_echo(&self, addr: IpAddr, timeout: Duration) -> Result<u32, ProbeError>;

    /// Open (and drop) a TCP connection.
    async fn tcp_connect(&self, addr: IpAddr, port: u16, timeout: Duration)
        -> Result<u32, ProbeError>;

    /// Build a tunnel through `profile` and fetch `url` over it.
    async fn url_test(&self, profile: &Profile, url: &str, timeout: Duration)
        -> Result<u32, ProbeError>;
}

/// Run the strategy selected by `kind` against one profile.
pub async fn probe(
    kind: ProbeKind,
    profile: &Profile,
    backend: &dyn ProbeBackend,
    settings: &TestSettings,
) -> Outcome {
    match kind {
        ProbeKind::IcmpPing => icmp::probe(profile, backend, settings.icmp_timeout()).await,
        ProbeKind::TcpPing => tcp::probe(profile, backend, settings.tcp_timeout()).await,
        ProbeKind::UrlTest => {
            url::probe(profile, backend, &settings.test_url, settings.url_timeout()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_kind_parse() {
        assert_eq!("icmp".parse::<ProbeKind>().unwrap(), ProbeKind::IcmpPing);
        assert_eq!("TCP".parse::<ProbeKind>().unwrap(), ProbeKind::TcpPing);
        assert_eq!("url-test".parse::<ProbeKind>().unwrap(), ProbeKind::UrlTest);
        assert!("udp".parse::<ProbeKind>().is_err());
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(
            FailureReason::PluginNotFound("naive".into()).to_string(),
            "plugin not found: naive"
        );
        assert_eq!(FailureReason::Generic(None).to_string(), "unknown error");
        assert_eq!(
            FailureReason::Generic(Some("boom".into())).to_string(),
            "boom"
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Success { latency_ms: 42 }.to_string(), "42 ms");
        assert_eq!(Outcome::failure(FailureReason::Timeout).to_string(), "timeout");
    }
}
