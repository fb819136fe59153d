//! Proxy protocol kinds and the probe capabilities they imply.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Stream transport used by V2Ray-family protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Ws,
    Http,
    Grpc,
    Quic,
}

impl FromStr for Transport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "tcp" => Ok(Transport::Tcp),
            "ws" => Ok(Transport::Ws),
            "http" | "h2" => Ok(Transport::Http),
            "grpc" => Ok(Transport::Grpc),
            "quic" => Ok(Transport::Quic),
            other => bail!("unknown transport '{}'", other),
        }
    }
}

/// Proxy protocol of a profile.
///
/// Only the settings that change how a profile can be probed are kept here;
/// everything else belongs to the tunnel core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Protocol {
    Socks,
    Http,
    Shadowsocks,
    Vmess {
        #[serde(default)]
        transport: Transport,
    },
    Vless {
        #[serde(default)]
        transport: Transport,
    },
    Trojan {
        #[serde(default)]
        transport: Transport,
    },
    Naive {
        #[serde(default)]
        quic: bool,
    },
    Mieru,
    Hysteria {
        version: u8,
        #[serde(default)]
        fake_tcp: bool,
    },
    Tuic,
    Juicity,
    WireGuard,
    Ssh,
    ShadowTls,
    AnyTls,
    Direct,
}

impl Protocol {
    pub fn can_icmp_ping(&self) -> bool {
        !matches!(self, Protocol::Direct)
    }

    pub fn can_tcp_ping(&self) -> bool {
        match self {
            Protocol::Direct | Protocol::Tuic | Protocol::Juicity | Protocol::WireGuard => false,
            Protocol::Hysteria { version, fake_tcp } => *version == 1 && *fake_tcp,
            Protocol::Naive { quic } => !quic,
            Protocol::Vmess { transport }
            | Protocol::Vless { transport }
            | Protocol::Trojan { transport } => *transport != Transport::Quic,
            _ => true,
        }
    }

    pub fn required_plugin(&self) -> Option<&'static str> {
        match self {
            Protocol::Naive { .. } => Some("naive"),
            Protocol::Mieru => Some("mieru"),
            Protocol::Juicity => Some("juicity"),
            _ => None,
        }
    }

    /// Short lowercase name, also accepted by `FromStr`.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Socks => "socks",
            Protocol::Http => "http",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Vmess { .. } => "vmess",
            Protocol::Vless { .. } => "vless",
            Protocol::Trojan { .. } => "trojan",
            Protocol::Naive { .. } => "naive",
            Protocol::Mieru => "mieru",
            Protocol::Hysteria { .. } => "hysteria",
            Protocol::Tuic => "tuic",
            Protocol::Juicity => "juicity",
            Protocol::WireGuard => "wireguard",
            Protocol::Ssh => "ssh",
            Protocol::ShadowTls => "shadowtls",
            Protocol::AnyTls => "anytls",
            Protocol::Direct => "direct",
        }
    }

    /// Parse a protocol name with an optional transport hint.
    ///
    /// The hint means `quic` for naive, `faketcp` for hysteria v1 and the
    /// stream transport for vmess/vless/trojan. Hysteria is written as
    /// `hysteria` (v2) or `hysteria1`.
    pub fn parse(name: &str, transport: Option<&str>) -> Result<Self> {
        let hint = transport.unwrap_or("").to_ascii_lowercase();
        let protocol = match name.to_ascii_lowercase().as_str() {
            "socks" | "socks5" => Protocol::Socks,
            "http" => Protocol::Http,
            "shadowsocks" | "ss" => Protocol::Shadowsocks,
            "vmess" => Protocol::Vmess {
                transport: hint.parse()?,
            },
            "vless" => Protocol::Vless {
                transport: hint.parse()?,
            },
            "trojan" => Protocol::Trojan {
                transport: hint.parse()?,
            },
            "naive" => Protocol::Naive {
                quic: hint == "quic",
            },
            "mieru" => Protocol::Mieru,
            "hysteria" | "hysteria2" => Protocol::Hysteria {
                version: 2,
                fake_tcp: false,
            },
            "hysteria1" => Protocol::Hysteria {
                version: 1,
                fake_tcp: hint == "faketcp",
            },
            "tuic" => Protocol::Tuic,
            "juicity" => Protocol::Juicity,
            "wireguard" | "wg" => Protocol::WireGuard,
            "ssh" => Protocol::Ssh,
            "shadowtls" => Protocol::ShadowTls,
            "anytls" => Protocol::AnyTls,
            "direct" => Protocol::Direct,
            other => bail!("unknown protocol '{}'", other),
        };
        Ok(protocol)
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Protocol::parse(s, None)
    }
}
