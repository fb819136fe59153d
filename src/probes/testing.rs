//! Scripted backend for unit tests.

use super::{ProbeBackend, ProbeError};
use crate::profile::Profile;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Scripted = fn() -> Result<u32, ProbeError>;

pub struct ScriptedBackend {
    pub hosts: HashMap<String, Vec<IpAddr>>,
    pub icmp: Scripted,
    pub tcp: Scripted,
    pub url: Scripted,
    pub calls: AtomicUsize,
    pub tcp_targets: Mutex<Vec<(IpAddr, u16)>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            hosts: HashMap::new(),
            icmp: || Ok(10),
            tcp: || Ok(20),
            url: || Ok(30),
            calls: AtomicUsize::new(0),
            tcp_targets: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedBackend {
    pub fn with_host(mut self, host: &str, ip: &str) -> Self {
        self.hosts
            .entry(host.to_string())
            .or_default()
            .push(ip.parse().unwrap());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProbeBackend for ScriptedBackend {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| ProbeError::Failed(format!("no such host: {}", host)))
    }

    async fn icmp_echo(&self, _addr: IpAddr, _timeout: Duration) -> Result<u32, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.icmp)()
    }

    async fn tcp_connect(
        &self,
        addr: IpAddr,
        port: u16,
        _timeout: Duration,
    ) -> Result<u32, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tcp_targets.lock().unwrap().push((addr, port));
        (self.tcp)()
    }

    async fn url_test(
        &self,
        _profile: &Profile,
        _url: &str,
        _timeout: Duration,
    ) -> Result<u32, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.url)()
    }
}
