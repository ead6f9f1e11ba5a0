//! DNS resolver module
//!
//! The dialer only consumes resolution results. This module holds the
//! resolver capability trait, the default hickory-backed resolver used for
//! proxy server hosts, and the family-scoped lookup helpers.

mod cache;
mod resolver;

pub use cache::DnsCache;
pub use resolver::{LookupMode, Resolve, Resolver};

use crate::{Error, Result};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Resolver used for proxy server hosts when no override is given
static PROXY_SERVER_RESOLVER: OnceLock<RwLock<Option<Arc<dyn Resolve>>>> = OnceLock::new();

fn proxy_server_slot() -> &'static RwLock<Option<Arc<dyn Resolve>>> {
    PROXY_SERVER_RESOLVER.get_or_init(|| RwLock::new(None))
}

/// Replace the process-wide proxy server resolver
pub fn set_proxy_server_resolver(resolver: Arc<dyn Resolve>) {
    debug!("proxy server resolver set to [{}]", resolver.server());
    *proxy_server_slot().write() = Some(resolver);
}

/// Get the process-wide proxy server resolver, building a system one on first use
pub fn proxy_server_resolver() -> Result<Arc<dyn Resolve>> {
    if let Some(r) = proxy_server_slot().read().as_ref() {
        return Ok(r.clone());
    }

    let mut slot = proxy_server_slot().write();
    if let Some(r) = slot.as_ref() {
        return Ok(r.clone());
    }
    let resolver: Arc<dyn Resolve> = Arc::new(Resolver::system()?);
    *slot = Some(resolver.clone());
    Ok(resolver)
}

fn literal(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
}

/// Look up `host` through `resolver`, treating an empty answer as an error.
pub async fn lookup_with_resolver(
    host: &str,
    mode: LookupMode,
    resolver: &dyn Resolve,
) -> Result<Vec<IpAddr>> {
    if let Some(ip) = literal(host) {
        return Ok(vec![ip]);
    }

    let ips = resolver.lookup(host, mode).await?;
    if ips.is_empty() {
        return Err(Error::dns(format!("couldn't find ip for {}", host)));
    }
    Ok(ips)
}

pub async fn lookup_ipv4_with_resolver(host: &str, resolver: &dyn Resolve) -> Result<Vec<IpAddr>> {
    lookup_with_resolver(host, LookupMode::V4, resolver).await
}

pub async fn lookup_ipv6_with_resolver(host: &str, resolver: &dyn Resolve) -> Result<Vec<IpAddr>> {
    lookup_with_resolver(host, LookupMode::V6, resolver).await
}

pub async fn lookup_ip_with_resolver(host: &str, resolver: &dyn Resolve) -> Result<Vec<IpAddr>> {
    lookup_with_resolver(host, LookupMode::Any, resolver).await
}

/// Look up a proxy server host with the process-wide resolver.
pub async fn lookup_proxy_server_host(host: &str, mode: LookupMode) -> Result<Vec<IpAddr>> {
    if let Some(ip) = literal(host) {
        return Ok(vec![ip]);
    }
    let resolver = proxy_server_resolver()?;
    lookup_with_resolver(host, mode, resolver.as_ref()).await
}

pub async fn lookup_ipv4_proxy_server_host(host: &str) -> Result<Vec<IpAddr>> {
    lookup_proxy_server_host(host, LookupMode::V4).await
}

pub async fn lookup_ipv6_proxy_server_host(host: &str) -> Result<Vec<IpAddr>> {
    lookup_proxy_server_host(host, LookupMode::V6).await
}

pub async fn lookup_ip_proxy_server_host(host: &str) -> Result<Vec<IpAddr>> {
    lookup_proxy_server_host(host, LookupMode::Any).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Empty;

    #[async_trait]
    impl Resolve for Empty {
        async fn lookup_ipv4(&self, _host: &str) -> Result<Vec<IpAddr>> {
            Ok(vec![])
        }

        async fn lookup_ipv6(&self, _host: &str) -> Result<Vec<IpAddr>> {
            Ok(vec![])
        }

        async fn lookup_ip(&self, _host: &str) -> Result<Vec<IpAddr>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_empty_answer_is_error() {
        let res = lookup_ip_with_resolver("example.com", &Empty).await;
        assert!(matches!(res, Err(Error::Dns(_))));
    }

    #[tokio::test]
    async fn test_literal_skips_resolver() {
        let ips = lookup_ipv6_with_resolver("[2001:db8::1]", &Empty).await.unwrap();
        assert_eq!(ips, vec!["2001:db8::1".parse::<IpAddr>().unwrap()]);

        let ips = lookup_ipv4_proxy_server_host("127.0.0.1").await.unwrap();
        assert_eq!(ips, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }
}
