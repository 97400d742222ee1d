use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Default Prism gateway port, appended to endpoints given without one.
pub const DEFAULT_PRISM_PORT: u16 = 9440;

/// Top-level configuration for the exporter.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often each Prism endpoint is scraped. Default: 30s.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Listen address for the /metrics server. Default: ":9100".
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Prism API connection configuration.
    #[serde(default)]
    pub prism: PrismConfig,

    /// Metric registry behavior.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Prism API connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PrismConfig {
    /// Prism endpoints (host, host:port or full URL). One scrape loop per entry.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Username for HTTP basic auth.
    #[serde(default)]
    pub username: String,

    /// Password for HTTP basic auth.
    #[serde(default)]
    pub password: String,

    /// Skip TLS certificate verification (self-signed Prism certs). Default: false.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Per-request timeout. Default: 30s.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// VM list page size. Default: 500.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum number of VM list requests per cycle. Default: 1000.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum concurrent per-VM stats requests. Default: 8.
    #[serde(default = "default_stats_concurrency")]
    pub stats_concurrency: usize,
}

/// Metric registry behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Publishes a series may miss before it is evicted. 0 keeps series forever.
    /// Default: 10.
    #[serde(default = "default_max_stale_cycles")]
    pub max_stale_cycles: u64,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_listen_addr() -> String {
    ":9100".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_page_size() -> usize {
    500
}

fn default_max_pages() -> usize {
    1000
}

fn default_stats_concurrency() -> usize {
    8
}

fn default_max_stale_cycles() -> u64 {
    10
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poll_interval: default_poll_interval(),
            listen_addr: default_listen_addr(),
            prism: PrismConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl Default for PrismConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            username: String::new(),
            password: String::new(),
            insecure_skip_verify: false,
            timeout: default_timeout(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            stats_concurrency: default_stats_concurrency(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_stale_cycles: default_max_stale_cycles(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let mut cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.apply_env_overrides()?;
        cfg.validate()?;

        Ok(cfg)
    }

    /// Build configuration from defaults and environment variables only.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;

        Ok(cfg)
    }

    /// Override fields from `PRISM_IPS`, `PRISM_USER`, `PRISM_PASS`,
    /// `LISTEN_ADDR` and `POLL_INTERVAL` when they are set and non-empty.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(ips) = env_var("PRISM_IPS") {
            self.prism.endpoints = ips
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(user) = env_var("PRISM_USER") {
            self.prism.username = user;
        }

        if let Some(pass) = env_var("PRISM_PASS") {
            self.prism.password = pass;
        }

        if let Some(addr) = env_var("LISTEN_ADDR") {
            self.listen_addr = addr;
        }

        if let Some(interval) = env_var("POLL_INTERVAL") {
            self.poll_interval = humantime::parse_duration(&interval)
                .with_context(|| format!("parsing POLL_INTERVAL {interval:?}"))?;
        }

        Ok(())
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.prism.endpoints.is_empty() {
            bail!("prism.endpoints is required");
        }

        if self.prism.endpoints.iter().any(|e| e.trim().is_empty()) {
            bail!("prism.endpoints must not contain empty entries");
        }

        if self.prism.username.is_empty() {
            bail!("prism.username is required");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be positive");
        }

        if self.prism.timeout.is_zero() {
            bail!("prism.timeout must be positive");
        }

        if self.prism.page_size == 0 {
            bail!("prism.page_size must be positive");
        }

        if self.prism.max_pages == 0 {
            bail!("prism.max_pages must be positive");
        }

        if self.prism.stats_concurrency == 0 {
            bail!("prism.stats_concurrency must be positive");
        }

        Ok(())
    }
}

impl PrismConfig {
    /// Returns the configured endpoints as base URLs.
    pub fn base_urls(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|e| normalize_endpoint(e))
            .collect()
    }
}

/// Turns `host`, `host:port` or a full URL into a base URL without a
/// trailing slash. Missing scheme defaults to https, missing port to 9440.
/// A bare IPv6 literal cannot carry a port; it is bracketed and gets the
/// default one.
pub fn normalize_endpoint(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('/');

    let (scheme, rest) = match raw.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("https", raw),
    };

    if !rest.starts_with('[') && rest.matches(':').count() > 1 {
        return format!("{scheme}://[{rest}]:{DEFAULT_PRISM_PORT}");
    }

    let has_port = match rest.rsplit_once(':') {
        // Bracketed IPv6 without port ends in ']'.
        Some((_, port)) => !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()),
        None => false,
    };

    if has_port {
        format!("{scheme}://{rest}")
    } else {
        format!("{scheme}://{rest}:{DEFAULT_PRISM_PORT}")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
