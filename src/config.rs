//! TOML configuration for proxyping.
//!
//! A layered model: compiled-in defaults, an optional config file located via
//! the `PROXYPING_CONFIG` environment variable or the system path, and CLI
//! overrides applied by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default URL fetched by URL tests.
pub const DEFAULT_TEST_URL: &str = "http://cp.cloudflare.com/";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub test: TestSettings,
    #[serde(default)]
    pub plugins: PluginConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .test
            .validate()
            .with_context(|| format!("invalid [test] section in {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try, in order: `PROXYPING_CONFIG`, `/etc/proxyping/proxyping.toml`,
    /// then compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("PROXYPING_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PROXYPING_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/proxyping/proxyping.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding the profile store.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/proxyping.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection test
// ---------------------------------------------------------------------------

/// Settings for a test run. Passed explicitly into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    /// Maximum number of probes in flight.
    pub concurrency: usize,
    pub icmp_timeout_ms: u64,
    pub tcp_timeout_ms: u64,
    pub url_timeout_ms: u64,
    pub test_url: String,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            icmp_timeout_ms: 5000,
            tcp_timeout_ms: 3000,
            url_timeout_ms: 3000,
            test_url: DEFAULT_TEST_URL.to_string(),
        }
    }
}

impl TestSettings {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.test_url.trim().is_empty() {
            bail!("test_url must not be empty");
        }
        if self.icmp_timeout_ms == 0 || self.tcp_timeout_ms == 0 || self.url_timeout_ms == 0 {
            bail!("probe timeouts must be greater than zero");
        }
        Ok(())
    }

    pub fn icmp_timeout(&self) -> Duration {
        Duration::from_millis(self.icmp_timeout_ms)
    }

    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_timeout_ms)
    }

    pub fn url_timeout(&self) -> Duration {
        Duration::from_millis(self.url_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Directories searched for protocol plugin binaries before `PATH`.
    pub search_dirs: Vec<PathBuf>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            search_dirs: vec![PathBuf::from("/usr/lib/proxyping/plugins")],
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.test.concurrency, 5);
        assert_eq!(cfg.test.icmp_timeout(), Duration::from_millis(5000));
        assert_eq!(cfg.test.tcp_timeout(), Duration::from_millis(3000));
        assert_eq!(cfg.test.test_url, DEFAULT_TEST_URL);
        assert!(cfg.test.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[test]\nconcurrency = 12\n\n[logging]\njson = true").unwrap();

        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.test.concurrency, 12);
        assert_eq!(cfg.test.url_timeout_ms, 3000);
        assert!(cfg.logging.json);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.database.path, PathBuf::from("data/proxyping.db"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[test]\nconcurrency = 0").unwrap();
        assert!(AppConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_empty_url_rejected() {
        let settings = TestSettings {
            test_url: " ".into(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
