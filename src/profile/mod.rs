//! Saved proxy profiles and their persisted test status.

pub mod protocol;

pub use self::protocol::{Protocol, Transport};

use serde::{Deserialize, Serialize};

/// Row identifier of a profile in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId(pub i64);

/// Identifier of a profile group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub i64);

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of the last connectivity test, as written back to the store.
///
/// The integer codes are the ones stored in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProfileStatus {
    /// Never tested, or results were cleared.
    #[default]
    Initial,
    Available,
    /// Probe failed in a way that may be transient.
    Unreachable,
    /// Profile cannot be tested as configured (missing plugin, bad host).
    Invalid,
    /// Probe failed with an obvious error.
    Unavailable,
}

impl ProfileStatus {
    pub fn code(self) -> i64 {
        match self {
            ProfileStatus::Invalid => -1,
            ProfileStatus::Initial => 0,
            ProfileStatus::Available => 1,
            ProfileStatus::Unreachable => 2,
            ProfileStatus::Unavailable => 3,
        }
    }

    /// Unknown codes read back as `Initial`.
    pub fn from_code(code: i64) -> Self {
        match code {
            -1 => ProfileStatus::Invalid,
            1 => ProfileStatus::Available,
            2 => ProfileStatus::Unreachable,
            3 => ProfileStatus::Unavailable,
            _ => ProfileStatus::Initial,
        }
    }
}

impl std::fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileStatus::Initial => write!(f, "initial"),
            ProfileStatus::Available => write!(f, "available"),
            ProfileStatus::Unreachable => write!(f, "unreachable"),
            ProfileStatus::Invalid => write!(f, "invalid"),
            ProfileStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// The `(status, latency, error)` triple written back after a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: ProfileStatus,
    pub latency_ms: u32,
    pub error: Option<String>,
}

impl StatusUpdate {
    /// Back to the untested state.
    pub fn reset() -> Self {
        Self {
            status: ProfileStatus::Initial,
            latency_ms: 0,
            error: None,
        }
    }
}

/// A saved proxy profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub group_id: GroupId,
    pub name: String,
    pub server: String,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default)]
    pub status: ProfileStatus,
    #[serde(default)]
    pub latency_ms: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl Profile {
    /// Build an untested profile.
    pub fn new(
        id: ProfileId,
        group_id: GroupId,
        name: impl Into<String>,
        server: impl Into<String>,
        port: u16,
        protocol: Protocol,
    ) -> Self {
        Self {
            id,
            group_id,
            name: name.into(),
            server: server.into(),
            port,
            protocol,
            status: ProfileStatus::Initial,
            latency_ms: 0,
            error: None,
        }
    }

    pub fn can_icmp_ping(&self) -> bool {
        self.protocol.can_icmp_ping()
    }

    pub fn can_tcp_ping(&self) -> bool {
        self.protocol.can_tcp_ping()
    }

    /// Name of the external plugin this profile needs, if any.
    pub fn required_plugin(&self) -> Option<&'static str> {
        self.protocol.required_plugin()
    }

    /// A profile with no server or port 0 can never be probed.
    pub fn has_endpoint(&self) -> bool {
        !self.server.trim().is_empty() && self.port != 0
    }

    /// Label used in logs and CLI output.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.server
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            ProfileStatus::Initial,
            ProfileStatus::Available,
            ProfileStatus::Unreachable,
            ProfileStatus::Invalid,
            ProfileStatus::Unavailable,
        ] {
            assert_eq!(ProfileStatus::from_code(status.code()), status);
        }
    }

    #[test]
    fn test_unknown_status_code_is_initial() {
        assert_eq!(ProfileStatus::from_code(42), ProfileStatus::Initial);
    }

    #[test]
    fn test_endpoint_requires_server_and_port() {
        let mut p = Profile::new(ProfileId(1), GroupId(1), "a", "1.2.3.4", 0, Protocol::Socks);
        assert!(!p.has_endpoint());
        p.port = 1080;
        assert!(p.has_endpoint());
        p.server = "  ".to_string();
        assert!(!p.has_endpoint());
    }

    #[test]
    fn test_display_name_falls_back_to_server() {
        let p = Profile::new(ProfileId(1), GroupId(1), "", "example.org", 443, Protocol::Http);
        assert_eq!(p.display_name(), "example.org");
    }
}
