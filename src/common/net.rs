//! Network utilities

use crate::{Error, Result};
use socket2::{SockRef, TcpKeepalive};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream, keepalive: Option<Duration>) {
    let _ = stream.set_nodelay(true);
    if let Some(interval) = keepalive {
        let sock = SockRef::from(stream);
        let _ = sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(interval));
    }
}

/// Split "host:port" or "[v6]:port" into host and numeric port.
pub fn split_host_port(address: &str) -> Result<(String, u16)> {
    let missing_port = || Error::address(format!("{}: missing port in address", address));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| Error::address(format!("{}: missing ']' in address", address)))?;
        let host = &rest[..end];
        let port = rest[end + 1..].strip_prefix(':').ok_or_else(missing_port)?;
        (host, port)
    } else {
        let idx = address.rfind(':').ok_or_else(missing_port)?;
        let host = &address[..idx];
        if host.contains(':') {
            return Err(Error::address(format!("{}: too many colons in address", address)));
        }
        (host, &address[idx + 1..])
    };

    let port = port
        .parse::<u16>()
        .map_err(|_| Error::address(format!("{}: invalid port {:?}", address, port)))?;
    Ok((host.to_string(), port))
}

/// Fold an IPv4-mapped IPv6 address back to plain IPv4.
#[inline]
pub fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Partition addresses by family, keeping the resolver's order in each.
pub fn sort_addrs(ips: &[IpAddr]) -> (Vec<IpAddr>, Vec<IpAddr>) {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for ip in ips {
        match unmap(*ip) {
            ip @ IpAddr::V4(_) => v4.push(ip),
            ip @ IpAddr::V6(_) => v6.push(ip),
        }
    }
    (v4, v6)
}

/// Unicast address outside loopback, link-local, multicast and unspecified.
pub fn is_global_unicast(ip: IpAddr) -> bool {
    match unmap(ip) {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_multicast()
                || v4.is_link_local()
                || v4 == Ipv4Addr::BROADCAST)
        }
        IpAddr::V6(v6) => {
            !(v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || is_unicast_link_local(&v6))
        }
    }
}

fn is_unicast_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Resolve a listen address to a socket address; an empty host means "any".
pub fn parse_bind_addr(address: &str, ipv6: bool) -> Result<SocketAddr> {
    let (host, port) = split_host_port(address)?;
    let ip = if host.is_empty() || host == "*" {
        if ipv6 {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
    } else if host == "localhost" {
        if ipv6 {
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    } else {
        host.parse::<IpAddr>()
            .map_err(|_| Error::address(format!("{}: listen host must be an IP", address)))?
    };
    Ok(SocketAddr::new(unmap(ip), port))
}
