//! Single connect attempt to one resolved address

use super::conn::{Conn, UdpConn};
use super::network::Network;
use super::options::{DialOptions, Transport};
use super::sys::{self, BoundInterface};
use crate::common::net::configure_tcp_stream;
use crate::common::Context;
use crate::{Error, Result};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpSocket, UdpSocket};
use tracing::{debug, trace};

/// Capability: open a connection to `addr` over `network`.
#[async_trait]
pub trait NetDialer: Send + Sync {
    async fn dial(&self, network: Network, addr: SocketAddr) -> Result<Conn>;
}

/// Built-in socket dialer.
///
/// Policy state (bound interface, mark, MPTCP) is set on a per-attempt copy,
/// so concurrent attempts sharing one [`DialOptions`] never see each other's
/// state.
#[derive(Debug, Clone, Default)]
pub struct SystemDialer {
    /// Per-attempt connect timeout
    pub timeout: Option<Duration>,
    /// TCP keep-alive idle time
    pub keepalive: Option<Duration>,
    /// Source address to bind before connecting
    pub local_addr: Option<IpAddr>,
    interface: Option<BoundInterface>,
    routing_mark: Option<u32>,
    multipath: bool,
}

impl SystemDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    pub fn with_local_addr(mut self, addr: IpAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn bound_interface(&self) -> Option<&BoundInterface> {
        self.interface.as_ref()
    }

    fn bind_interface(&mut self, name: &str) -> Result<()> {
        self.interface = Some(sys::resolve_interface(name)?);
        Ok(())
    }

    fn set_routing_mark(&mut self, mark: u32) {
        self.routing_mark = Some(mark);
    }

    fn set_multipath_tcp(&mut self, enable: bool) {
        self.multipath = enable;
    }

    fn socket(&self, network: Network, addr: SocketAddr, fast_open: bool) -> Result<Socket> {
        let domain = Domain::for_address(addr);
        let socket = if !network.is_tcp() {
            Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?
        } else if self.multipath {
            match sys::new_mptcp_socket(domain) {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, "MPTCP socket creation failed, falling back to TCP");
                    Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?
                }
            }
        } else {
            Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?
        };
        socket.set_nonblocking(true)?;

        if let Some(ref iface) = self.interface {
            sys::bind_to_interface(&socket, iface, addr.ip())?;
        }
        if let Some(mark) = self.routing_mark {
            sys::set_routing_mark(&socket, mark)?;
        }
        if let Some(local) = self.local_addr {
            socket.bind(&SocketAddr::new(local, 0).into())?;
        }
        if fast_open && network.is_tcp() && !sys::enable_fast_open_connect(&socket)? {
            debug!(addr = %addr, "TCP fast open unavailable, using a plain connect");
        }
        Ok(socket)
    }

    async fn connect(&self, network: Network, addr: SocketAddr, fast_open: bool) -> Result<Conn> {
        let socket = self.socket(network, addr, fast_open)?;

        let fut = async {
            if network.is_tcp() {
                let stream = TcpSocket::from_std_stream(socket.into()).connect(addr).await?;
                configure_tcp_stream(&stream, self.keepalive);
                Ok::<_, Error>(Box::new(stream) as Conn)
            } else {
                socket.connect(&addr.into())?;
                let udp = UdpSocket::from_std(socket.into())?;
                Ok::<_, Error>(Box::new(UdpConn::new(udp)) as Conn)
            }
        };

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut).await?,
            None => fut.await,
        }
    }

    /// Connect with TCP fast open requested
    pub async fn dial_fast_open(&self, network: Network, addr: SocketAddr) -> Result<Conn> {
        self.connect(network, addr, true).await
    }
}

#[async_trait]
impl NetDialer for SystemDialer {
    async fn dial(&self, network: Network, addr: SocketAddr) -> Result<Conn> {
        self.connect(network, addr, false).await
    }
}

/// Open one connection to `ip:port` under `opts`.
///
/// A custom transport receives the endpoint as-is; interface, mark, MPTCP
/// and fast open only shape the built-in dialer.
pub async fn connect(
    ctx: &Context,
    network: Network,
    ip: IpAddr,
    port: u16,
    opts: &DialOptions,
) -> Result<Conn> {
    let addr = SocketAddr::new(ip, port);

    let template = match &opts.transport {
        Transport::Custom(dialer) => return ctx.run(dialer.dial(network, addr)).await,
        Transport::System(template) => template,
    };

    let mut dialer = template.clone();
    if let Some(ref name) = opts.interface_name {
        dialer.bind_interface(name)?;
    }
    if let Some(mark) = opts.routing_mark {
        dialer.set_routing_mark(mark);
    }
    if opts.mptcp {
        dialer.set_multipath_tcp(true);
    }

    trace!(network = %network, addr = %addr, tfo = opts.tfo, "connecting");
    if opts.tfo {
        return ctx.run(dialer.dial_fast_open(network, addr)).await;
    }
    ctx.run(dialer.dial(network, addr)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::options::{apply_options_with, DialDefaults, DialOpt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_system_dialer_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let opts = DialOptions::default();
        let conn = connect(&Context::background(), Network::Tcp4, addr.ip(), addr.port(), &opts)
            .await
            .unwrap();
        assert_eq!(conn.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_fast_open_dial_delivers_first_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let opts = apply_options_with(&DialDefaults::default(), &[DialOpt::tfo(true)]);
        let mut conn = connect(&Context::background(), Network::Tcp4, addr.ip(), addr.port(), &opts)
            .await
            .unwrap();
        conn.write_all(b"syn data").await.unwrap();

        let (mut accepted, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 8];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"syn data");
    }

    #[tokio::test]
    async fn test_system_dialer_udp() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let conn = connect(
            &Context::background(),
            Network::Udp,
            addr.ip(),
            addr.port(),
            &DialOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(conn.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_missing_interface_fails_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let opts = apply_options_with(&DialDefaults::default(), &[DialOpt::interface("nope-if0")]);
        let err = connect(&Context::background(), Network::Tcp, addr.ip(), addr.port(), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Interface(_)));
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NetDialer for Counting {
        async fn dial(&self, _network: Network, addr: SocketAddr) -> Result<Conn> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::connect(addr, Error::internal("refused by test")))
        }
    }

    #[tokio::test]
    async fn test_custom_transport_bypasses_policy() {
        let custom = Arc::new(Counting::default());
        // The interface does not exist; a custom transport never looks at it.
        let opts = apply_options_with(
            &DialDefaults::default(),
            &[
                DialOpt::interface("nope-if0"),
                DialOpt::tfo(true),
                DialOpt::net_dialer(custom.clone()),
            ],
        );
        let err = connect(
            &Context::background(),
            Network::Tcp,
            "192.0.2.1".parse().unwrap(),
            80,
            &opts,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        assert_eq!(custom.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_template_is_not_mutated() {
        let template = SystemDialer::new().with_timeout(Duration::from_secs(1));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let opts = apply_options_with(
            &DialDefaults::default(),
            &[DialOpt::system_dialer(template), DialOpt::mptcp(true)],
        );
        let _conn = connect(&Context::background(), Network::Tcp, addr.ip(), addr.port(), &opts)
            .await
            .unwrap();

        match opts.transport() {
            Transport::System(d) => {
                assert!(!d.multipath);
                assert!(d.bound_interface().is_none());
            }
            Transport::Custom(_) => panic!("expected system transport"),
        }
    }
}
