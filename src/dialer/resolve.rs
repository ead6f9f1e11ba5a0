//! Destination to candidate address list

use super::network::Network;
use super::options::DialOptions;
use crate::common::net::{split_host_port, unmap};
use crate::common::Context;
use crate::dns::{self, LookupMode};
use crate::{Error, Result};
use std::net::IpAddr;
use tracing::debug;

/// Resolve `address` into candidate IPs for `network`, plus the port.
///
/// Candidates keep the resolver's order, are unmapped to plain IPv4 where
/// needed, and are limited to the family the token asks for.
pub async fn parse_addr(
    ctx: &Context,
    network: Network,
    address: &str,
    opts: &DialOptions,
) -> Result<(Vec<IpAddr>, u16)> {
    let (host, port) = split_host_port(address)?;
    let mode = network.lookup_mode();
    debug!(network = %network, host = %host, mode = %mode, "resolving dial target");

    let ips = match opts.resolver() {
        Some(resolver) => {
            ctx.run(dns::lookup_with_resolver(&host, mode, resolver.as_ref()))
                .await
        }
        None => ctx.run(dns::lookup_proxy_server_host(&host, mode)).await,
    }
    .map_err(Error::dns_resolve)?;

    let ips = ips
        .into_iter()
        .map(unmap)
        .filter(|ip| match mode {
            LookupMode::V4 => ip.is_ipv4(),
            LookupMode::V6 => ip.is_ipv6(),
            LookupMode::Any => true,
        })
        .collect();
    Ok((ips, port))
}
