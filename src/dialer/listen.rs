//! Listening sockets under the same policy bundle as dials

use super::network::{IpFamily, Network};
use super::options::DialOptions;
use super::sys;
use crate::common::net::parse_bind_addr;
use crate::common::Context;
use crate::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, UdpSocket};
use tracing::debug;

const LISTEN_BACKLOG: i32 = 1024;

/// Bound listener; which variant depends on the network token
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

impl Listener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Tcp(l) => l.local_addr(),
            Listener::Udp(s) => s.local_addr(),
        }
    }

    pub fn into_tcp(self) -> Option<TcpListener> {
        match self {
            Listener::Tcp(l) => Some(l),
            Listener::Udp(_) => None,
        }
    }

    pub fn into_udp(self) -> Option<UdpSocket> {
        match self {
            Listener::Udp(s) => Some(s),
            Listener::Tcp(_) => None,
        }
    }
}

fn bind_socket(network: Network, addr: SocketAddr, opts: &DialOptions) -> Result<Socket> {
    let domain = Domain::for_address(addr);
    let socket = if network.is_tcp() {
        Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?
    } else {
        Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?
    };
    socket.set_nonblocking(true)?;

    if let Some(name) = opts.interface_name() {
        let iface = sys::resolve_interface(name)?;
        sys::bind_to_interface(&socket, &iface, addr.ip())?;
    }
    if opts.addr_reuse() {
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
    }
    if let Some(mark) = opts.routing_mark() {
        sys::set_routing_mark(&socket, mark)?;
    }

    socket.bind(&addr.into())?;
    if network.is_tcp() {
        socket.listen(LISTEN_BACKLOG)?;
    }
    Ok(socket)
}

/// Bind `address` for `network` under `opts`.
pub async fn listen_with(
    ctx: &Context,
    network: Network,
    address: &str,
    opts: &DialOptions,
) -> Result<Listener> {
    let addr = parse_bind_addr(address, network.family() == Some(IpFamily::V6))?;

    ctx.run(async {
        let socket = bind_socket(network, addr, opts)?;
        let listener = if network.is_tcp() {
            Listener::Tcp(TcpListener::from_std(socket.into())?)
        } else {
            Listener::Udp(UdpSocket::from_std(socket.into())?)
        };
        debug!(
            network = %network,
            addr = %addr,
            interface = ?opts.interface_name(),
            "listening"
        );
        Ok::<_, Error>(listener)
    })
    .await
}
