//! DNS resolver implementation

use super::DnsCache;
use crate::config::DnsConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Which address families a lookup asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupMode {
    V4,
    V6,
    Any,
}

impl fmt::Display for LookupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupMode::V4 => write!(f, "ipv4"),
            LookupMode::V6 => write!(f, "ipv6"),
            LookupMode::Any => write!(f, "any"),
        }
    }
}

/// Capability: turn a host name into addresses of the requested families.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<IpAddr>>;

    async fn lookup_ipv6(&self, host: &str) -> Result<Vec<IpAddr>>;

    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>>;

    /// Upstream description, used in logs
    fn server(&self) -> String {
        String::new()
    }

    async fn lookup(&self, host: &str, mode: LookupMode) -> Result<Vec<IpAddr>> {
        match mode {
            LookupMode::V4 => self.lookup_ipv4(host).await,
            LookupMode::V6 => self.lookup_ipv6(host).await,
            LookupMode::Any => self.lookup_ip(host).await,
        }
    }
}

/// DNS resolver with caching and multiple upstream servers
pub struct Resolver {
    /// Main resolver
    resolver: TokioAsyncResolver,
    /// Fallback resolver
    fallback: Option<TokioAsyncResolver>,
    /// DNS cache
    cache: Arc<DnsCache>,
    /// Hosts mapping
    hosts: HashMap<String, IpAddr>,
    /// Enable IPv6
    ipv6: bool,
    /// IPv6 timeout (wait this long for IPv6 before returning IPv4 only)
    ipv6_timeout: Duration,
    /// Upstreams, for logging
    servers: String,
}

impl Resolver {
    /// Create new resolver from config
    pub fn new(config: &DnsConfig) -> Result<Self> {
        let cache = Arc::new(DnsCache::new(config.cache_size));

        // Build hosts map
        let mut hosts = HashMap::new();
        for (domain, ip_str) in &config.hosts {
            if let Ok(ip) = ip_str.parse() {
                hosts.insert(domain.clone(), ip);
            }
        }

        let resolver = Self::build_resolver(&config.nameserver)?;

        let fallback = if !config.fallback.is_empty() {
            Some(Self::build_resolver(&config.fallback)?)
        } else {
            None
        };

        let servers = if config.nameserver.is_empty() {
            "system".to_string()
        } else {
            config.nameserver.join(",")
        };

        Ok(Resolver {
            resolver,
            fallback,
            cache,
            hosts,
            ipv6: config.ipv6,
            ipv6_timeout: Duration::from_millis(config.ipv6_timeout),
            servers,
        })
    }

    /// Resolver using the system configuration
    pub fn system() -> Result<Self> {
        Self::new(&DnsConfig::default())
    }

    /// Build resolver from nameserver list
    fn build_resolver(nameservers: &[String]) -> Result<TokioAsyncResolver> {
        if nameservers.is_empty() {
            // Use system default
            let resolver = TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|e| Error::dns(format!("Failed to create system resolver: {}", e)))?;
            return Ok(resolver);
        }

        let mut config = ResolverConfig::new();

        for ns in nameservers {
            let ns_config = Self::parse_nameserver(ns)
                .ok_or_else(|| Error::config(format!("Invalid nameserver: {}", ns)))?;
            config.add_name_server(ns_config);
        }

        let mut opts = ResolverOpts::default();
        opts.cache_size = 0; // We use our own cache
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        opts.rotate = true;

        Ok(TokioAsyncResolver::tokio(config, opts))
    }

    /// Parse nameserver string
    pub(crate) fn parse_nameserver(ns: &str) -> Option<NameServerConfig> {
        // Handle different formats:
        // - 8.8.8.8
        // - 8.8.8.8:53
        // - tcp://8.8.8.8
        // - tls://1.1.1.1#cloudflare-dns.com
        // - https://1.1.1.1/dns-query#cloudflare-dns.com

        let (ns, tls_name) = match ns.split_once('#') {
            Some((addr, name)) => (addr, Some(name.to_string())),
            None => (ns, None),
        };

        let (protocol, rest, default_port) = if let Some(rest) = ns.strip_prefix("https://") {
            (Protocol::Https, rest.split('/').next()?, 443)
        } else if let Some(rest) = ns.strip_prefix("tls://") {
            (Protocol::Tls, rest, 853)
        } else if let Some(rest) = ns.strip_prefix("tcp://") {
            (Protocol::Tcp, rest, 53)
        } else if let Some(rest) = ns.strip_prefix("udp://") {
            (Protocol::Udp, rest, 53)
        } else {
            (Protocol::Udp, ns, 53)
        };

        let socket_addr = Self::parse_socket_addr(rest, default_port)?;
        let tls_dns_name = match protocol {
            Protocol::Https | Protocol::Tls => {
                Some(tls_name.unwrap_or_else(|| socket_addr.ip().to_string()))
            }
            _ => None,
        };

        Some(NameServerConfig {
            socket_addr,
            protocol,
            tls_dns_name,
            trust_negative_responses: true,
            bind_addr: None,
            tls_config: None,
        })
    }

    fn parse_socket_addr(s: &str, default_port: u16) -> Option<SocketAddr> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Some(addr);
        }
        let ip = s.trim_start_matches('[').trim_end_matches(']');
        ip.parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, default_port))
    }

    /// Resolve with hosts, cache and upstream, in that order
    async fn resolve(&self, host: &str, mode: LookupMode) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        if let Some(ip) = self.hosts.get(host) {
            debug!("DNS {} -> {} (hosts)", host, ip);
            return Ok(vec![*ip]);
        }

        if let Some(ips) = self.cache.get(host, mode) {
            debug!("DNS {} -> {:?} (cache)", host, ips);
            return Ok(ips);
        }

        let answer = match mode {
            LookupMode::V4 => Answer::complete(self.lookup_v4(host).await?),
            LookupMode::V6 => Answer::complete(self.lookup_v6(host).await?),
            LookupMode::Any => self.lookup_any(host).await?,
        };

        if answer.ips.is_empty() {
            return Err(Error::dns(format!("No IP found for {}", host)));
        }

        self.store(host, mode, &answer);
        debug!("DNS {} -> {:?}", host, answer.ips);
        Ok(answer.ips)
    }

    /// Cache an answer unless one of its families is missing
    fn store(&self, host: &str, mode: LookupMode, answer: &Answer) {
        if !answer.complete {
            debug!("DNS {} answer for {} is partial, not cached", mode, host);
            return;
        }
        let ttl = answer.valid_until.saturating_duration_since(Instant::now());
        self.cache.insert(host, mode, answer.ips.clone(), ttl);
    }

    async fn lookup_v4(&self, host: &str) -> Result<(Vec<IpAddr>, Instant)> {
        match self.resolver.ipv4_lookup(host).await {
            Ok(response) => {
                let ips = response.iter().map(|a| IpAddr::V4(a.0)).collect();
                Ok((ips, response.valid_until()))
            }
            Err(e) => {
                let Some(ref fallback) = self.fallback else {
                    return Err(Error::dns(format!("IPv4 lookup failed for {}: {}", host, e)));
                };
                debug!("Trying fallback resolver for {}", host);
                let response = fallback
                    .ipv4_lookup(host)
                    .await
                    .map_err(|e| Error::dns(format!("IPv4 lookup failed for {}: {}", host, e)))?;
                let ips = response.iter().map(|a| IpAddr::V4(a.0)).collect();
                Ok((ips, response.valid_until()))
            }
        }
    }

    async fn lookup_v6(&self, host: &str) -> Result<(Vec<IpAddr>, Instant)> {
        if !self.ipv6 {
            return Err(Error::dns("IPv6 is disabled"));
        }
        let response = self
            .resolver
            .ipv6_lookup(host)
            .await
            .map_err(|e| Error::dns(format!("IPv6 lookup failed for {}: {}", host, e)))?;
        let ips = response.iter().map(|aaaa| IpAddr::V6(aaaa.0)).collect();
        Ok((ips, response.valid_until()))
    }

    async fn lookup_any(&self, host: &str) -> Result<Answer> {
        if !self.ipv6 {
            return Ok(Answer::complete(self.lookup_v4(host).await?));
        }

        // Query IPv4 and IPv6 concurrently for lower latency
        let ipv4_future = self.lookup_v4(host);
        let ipv6_future = tokio::time::timeout(self.ipv6_timeout, self.lookup_v6(host));
        let (ipv4_result, ipv6_result) = tokio::join!(ipv4_future, ipv6_future);

        if ipv6_result.is_err() {
            debug!("IPv6 lookup timed out for {}", host);
        }
        merge_any(host, ipv4_result, ipv6_result.ok())
    }

    /// Clear DNS cache
    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("DNS cache cleared");
    }

    /// Get number of live cache entries
    pub fn cache_size(&self) -> usize {
        self.cache.purge_expired();
        self.cache.len()
    }
}

/// Upstream answer plus whether every requested family answered
#[derive(Debug)]
struct Answer {
    ips: Vec<IpAddr>,
    valid_until: Instant,
    complete: bool,
}

impl Answer {
    fn complete((ips, valid_until): (Vec<IpAddr>, Instant)) -> Self {
        Answer {
            ips,
            valid_until,
            complete: true,
        }
    }
}

/// Merge the A and AAAA halves of an "any" lookup. `ipv6` is `None` when the
/// AAAA query timed out. The merged answer is complete only if both halves
/// answered.
fn merge_any(
    host: &str,
    ipv4: Result<(Vec<IpAddr>, Instant)>,
    ipv6: Option<Result<(Vec<IpAddr>, Instant)>>,
) -> Result<Answer> {
    let mut ips = Vec::new();
    let mut valid_until: Option<Instant> = None;
    let mut complete = true;
    let mut last_err = None;

    match ipv4 {
        Ok((v4, until)) => {
            ips.extend(v4);
            valid_until = Some(until);
        }
        Err(e) => {
            debug!("IPv4 lookup failed for {}: {}", host, e);
            complete = false;
            last_err = Some(e);
        }
    }

    match ipv6 {
        Some(Ok((v6, until))) => {
            ips.extend(v6);
            valid_until = Some(valid_until.map_or(until, |v| v.min(until)));
        }
        Some(Err(e)) => {
            debug!("IPv6 lookup failed for {}: {}", host, e);
            complete = false;
            last_err = Some(e);
        }
        None => complete = false,
    }

    match valid_until {
        Some(valid_until) => Ok(Answer {
            ips,
            valid_until,
            complete,
        }),
        None => Err(last_err.unwrap_or_else(|| Error::dns(format!("No IP found for {}", host)))),
    }
}

#[async_trait]
impl Resolve for Resolver {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.resolve(host, LookupMode::V4).await
    }

    async fn lookup_ipv6(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.resolve(host, LookupMode::V6).await
    }

    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.resolve(host, LookupMode::Any).await
    }

    fn server(&self) -> String {
        self.servers.clone()
    }
}
