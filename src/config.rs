//! Configuration loading and validation.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result, ValidationError};
use crate::filter::FailurePolicy;

/// Main configuration for the domainwall service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// What to do with traffic that cannot be attributed to a tenant.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub dns: DnsSettings,

    #[serde(default)]
    pub proxy: ProxySettings,

    pub rules: RulesSettings,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Which rules apply to a DNS query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchScope {
    /// Only the rules of the tenant owning the source IP.
    #[default]
    Tenant,
    /// The rules of every active tenant, whatever the source IP.
    Global,
}

/// DNS responder settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsSettings {
    #[serde(default = "default_dns_listen")]
    pub listen: SocketAddr,

    /// Bound instead of `listen` when the process may not bind privileged ports.
    #[serde(default = "default_dns_fallback_listen")]
    pub fallback_listen: Option<SocketAddr>,

    /// Upstream DNS resolver address (e.g., "1.1.1.1:53").
    #[serde(default = "default_upstream")]
    pub upstream: SocketAddr,

    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    #[serde(default = "default_sinkhole_ipv4")]
    pub sinkhole_ipv4: Ipv4Addr,

    #[serde(default = "default_sinkhole_ipv6")]
    pub sinkhole_ipv6: Ipv6Addr,

    /// TTL of synthesized answers, kept short so rule changes propagate.
    #[serde(default = "default_block_ttl")]
    pub block_ttl_secs: u32,

    #[serde(default = "default_answer_cache_ttl")]
    pub answer_cache_ttl_secs: u64,

    #[serde(default = "default_answer_cache_capacity")]
    pub answer_cache_capacity: u64,

    #[serde(default)]
    pub scope: MatchScope,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            listen: default_dns_listen(),
            fallback_listen: default_dns_fallback_listen(),
            upstream: default_upstream(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            sinkhole_ipv4: default_sinkhole_ipv4(),
            sinkhole_ipv6: default_sinkhole_ipv6(),
            block_ttl_secs: default_block_ttl(),
            answer_cache_ttl_secs: default_answer_cache_ttl(),
            answer_cache_capacity: default_answer_cache_capacity(),
            scope: MatchScope::default(),
        }
    }
}

impl DnsSettings {
    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub const fn answer_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.answer_cache_ttl_secs)
    }
}

/// Intercepting proxy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_proxy_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Peers whose `X-Forwarded-For` header is trusted.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_proxy_listen(),
            connect_timeout_secs: default_connect_timeout(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl ProxySettings {
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Where tenants, rules and whitelists come from and how often they are reloaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesSettings {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    pub source: RuleSourceConfig,
}

impl RulesSettings {
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Rule store backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum RuleSourceConfig {
    /// A TOML document on the local filesystem, re-read on every refresh.
    File { path: PathBuf },
    /// The admin service's JSON API.
    Remote {
        url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_store_timeout")]
        timeout_secs: u64,
    },
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_dns_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 53)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_dns_fallback_listen() -> Option<SocketAddr> {
    Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5353))
}

const fn default_upstream() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 53)
}

const fn default_upstream_timeout_ms() -> u64 {
    3000
}

const fn default_sinkhole_ipv4() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

const fn default_sinkhole_ipv6() -> Ipv6Addr {
    Ipv6Addr::LOCALHOST
}

const fn default_block_ttl() -> u32 {
    60
}

const fn default_answer_cache_ttl() -> u64 {
    30
}

const fn default_answer_cache_capacity() -> u64 {
    10_000
}

const fn default_proxy_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3128)
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_refresh_interval() -> u64 {
    60
}

const fn default_store_timeout() -> u64 {
    10
}

const fn default_metrics_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9100)
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.dns.upstream_timeout_ms == 0 {
            return Err(ValidationError::ZeroUpstreamTimeout);
        }
        if self.dns.answer_cache_ttl_secs == 0 {
            return Err(ValidationError::ZeroAnswerCacheTtl);
        }
        if self.dns.block_ttl_secs == 0 {
            return Err(ValidationError::ZeroBlockTtl);
        }
        if self.proxy.connect_timeout_secs == 0 {
            return Err(ValidationError::ZeroConnectTimeout);
        }
        if self.rules.refresh_interval_secs == 0 {
            return Err(ValidationError::ZeroRefreshInterval);
        }

        match &self.rules.source {
            RuleSourceConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ValidationError::EmptyStorePath);
                }
            }
            RuleSourceConfig::Remote {
                url, timeout_secs, ..
            } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ValidationError::InvalidStoreUrl { url: url.clone() });
                }
                if *timeout_secs == 0 {
                    return Err(ValidationError::ZeroStoreTimeout);
                }
            }
        }

        Ok(())
    }
}
