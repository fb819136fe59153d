//! Probe backend talking to the local network stack.

use super::{icmp, tcp, url, ProbeBackend, ProbeError};
use crate::profile::Profile;
use anyhow::{Context, Result};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver;

/// Backend built on the system resolver, the `ping` binary, tokio sockets
/// and reqwest proxy tunnels.
pub struct SystemBackend {
    resolver: TokioAsyncResolver,
    plugin_dirs: Vec<PathBuf>,
}

impl SystemBackend {
    /// Use the system resolver configuration (from /etc/resolv.conf).
    pub fn from_system_conf(plugin_dirs: Vec<PathBuf>) -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .context("Failed to create DNS resolver")?;
        Ok(Self {
            resolver,
            plugin_dirs,
        })
    }

    /// Locate a plugin binary in the configured directories, then `PATH`.
    pub fn find_plugin(&self, plugin: &str) -> Option<PathBuf> {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect::<Vec<_>>())
            .unwrap_or_default();
        find_plugin_in(plugin, self.plugin_dirs.iter().chain(search_path.iter()))
    }
}

fn find_plugin_in<'a>(plugin: &str, dirs: impl Iterator<Item = &'a PathBuf>) -> Option<PathBuf> {
    let candidates = [
        plugin.to_string(),
        format!("{}-plugin", plugin),
        format!("lib{}.so", plugin),
    ];
    for dir in dirs {
        for name in &candidates {
            let path = Path::new(dir).join(name);
            if path.is_file() {
                return Some(path);
            }
        }
    }
    None
}

#[async_trait::async_trait]
impl ProbeBackend for SystemBackend {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, ProbeError> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ProbeError::Failed(e.to_string()))?;
        Ok(lookup.iter().collect())
    }

    async fn icmp_echo(&self, addr: IpAddr, timeout: Duration) -> Result<u32, ProbeError> {
        icmp::system_ping(addr, timeout).await
    }

    async fn tcp_connect(
        &self,
        addr: IpAddr,
        port: u16,
        timeout: Duration,
    ) -> Result<u32, ProbeError> {
        tcp::connect(addr, port, timeout).await
    }

    async fn url_test(
        &self,
        profile: &Profile,
        url: &str,
        timeout: Duration,
    ) -> Result<u32, ProbeError> {
        if let Some(plugin) = profile.required_plugin() {
            match self.find_plugin(plugin) {
                Some(path) => debug!(%plugin, path = %path.display(), "plugin found"),
                None => return Err(ProbeError::PluginNotFound(plugin.to_string())),
            }
        }
        url::fetch_through_proxy(profile, url, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_plugin_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libnaive.so"), b"").unwrap();
        let dirs = vec![dir.path().to_path_buf()];

        let found = find_plugin_in("naive", dirs.iter());
        assert_eq!(found, Some(dir.path().join("libnaive.so")));
        assert_eq!(find_plugin_in("mieru", dirs.iter()), None);
    }
}
