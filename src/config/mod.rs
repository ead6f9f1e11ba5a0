//! Configuration module

use crate::dialer::{self, DialOpt, IpFamily};
use crate::dns::{self, Resolver};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default outbound interface
    #[serde(rename = "interface-name")]
    pub interface_name: Option<String>,

    /// Default routing mark (0 = unset)
    #[serde(rename = "routing-mark")]
    pub routing_mark: u32,

    /// Race all candidate addresses concurrently
    #[serde(rename = "tcp-concurrent")]
    pub tcp_concurrent: bool,

    /// Preferred family for dual-stack dials (ipv4, ipv6)
    pub prefer: Option<String>,

    /// Fallback release interval in milliseconds
    #[serde(rename = "fallback-delay", default = "default_fallback_delay")]
    pub fallback_delay: u64,

    /// TCP fast open
    pub tfo: bool,

    /// Multipath TCP
    pub mptcp: bool,

    /// Log level
    #[serde(default = "default_log_level", rename = "log-level")]
    pub log_level: Option<String>,

    /// DNS configuration for proxy server hosts
    pub dns: DnsConfig,
}

impl Config {
    /// Load configuration from file (synchronous)
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from file (async)
    pub async fn load_async<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_str(&content)
    }

    /// Load from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.prefer_family()?;

        if self.fallback_delay == 0 {
            return Err(Error::config("fallback-delay must be greater than 0"));
        }

        for ns in self.dns.nameserver.iter().chain(&self.dns.fallback) {
            if Resolver::parse_nameserver(ns).is_none() {
                return Err(Error::config(format!("Invalid nameserver: {}", ns)));
            }
        }

        Ok(())
    }

    /// Parsed `prefer` value
    pub fn prefer_family(&self) -> Result<Option<IpFamily>> {
        match self.prefer.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("") => Ok(None),
            Some("ipv4") | Some("4") => Ok(Some(IpFamily::V4)),
            Some("ipv6") | Some("6") => Ok(Some(IpFamily::V6)),
            Some(other) => Err(Error::config(format!("Unknown prefer value: {}", other))),
        }
    }

    /// Options every dial gets before call-site options
    pub fn default_options(&self) -> Result<Vec<DialOpt>> {
        let mut opts = Vec::new();
        match self.prefer_family()? {
            Some(IpFamily::V4) => opts.push(DialOpt::prefer_ipv4()),
            Some(IpFamily::V6) => opts.push(DialOpt::prefer_ipv6()),
            None => {}
        }
        if self.tfo {
            opts.push(DialOpt::tfo(true));
        }
        if self.mptcp {
            opts.push(DialOpt::mptcp(true));
        }
        Ok(opts)
    }

    /// Push this configuration into the process-wide dialer controls
    pub fn apply(&self) -> Result<()> {
        self.validate()?;

        dialer::set_default_interface(self.interface_name.clone().unwrap_or_default());
        dialer::set_default_routing_mark(self.routing_mark);
        dialer::set_default_options(self.default_options()?);

        let strategy = dialer::strategy();
        strategy.set_concurrent(self.tcp_concurrent);
        strategy.set_fallback_delay(Duration::from_millis(self.fallback_delay));

        if self.dns.enable {
            dns::set_proxy_server_resolver(Arc::new(Resolver::new(&self.dns)?));
        }

        info!(
            interface = self.interface_name.as_deref().unwrap_or(""),
            routing_mark = self.routing_mark,
            tcp_concurrent = self.tcp_concurrent,
            "dialer configuration applied"
        );
        Ok(())
    }

    /// Save configuration to file
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).await?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interface_name: None,
            routing_mark: 0,
            tcp_concurrent: false,
            prefer: None,
            fallback_delay: default_fallback_delay(),
            tfo: false,
            mptcp: false,
            log_level: default_log_level(),
            dns: DnsConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> Option<String> {
    Some("info".to_string())
}

fn default_fallback_delay() -> u64 {
    300
}

/// DNS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Use this section to build the proxy server resolver
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Nameservers (empty = system configuration)
    pub nameserver: Vec<String>,

    /// Fallback nameservers, tried for IPv4 when the main ones fail
    pub fallback: Vec<String>,

    /// Resolve AAAA records
    #[serde(default = "default_true")]
    pub ipv6: bool,

    /// How long a merged lookup waits for AAAA, in milliseconds
    #[serde(rename = "ipv6-timeout", default = "default_ipv6_timeout")]
    pub ipv6_timeout: u64,

    /// Static hosts
    pub hosts: HashMap<String, String>,

    /// Cache size
    #[serde(rename = "cache-size", default = "default_cache_size")]
    pub cache_size: usize,
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            enable: true,
            nameserver: Vec::new(),
            fallback: Vec::new(),
            ipv6: true,
            ipv6_timeout: default_ipv6_timeout(),
            hosts: HashMap::new(),
            cache_size: default_cache_size(),
        }
    }
}

fn default_ipv6_timeout() -> u64 {
    100
}

fn default_cache_size() -> usize {
    4096
}
