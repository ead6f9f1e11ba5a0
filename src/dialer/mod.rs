//! Outbound connection establishment
//!
//! A dial call folds its options into a [`DialOptions`] bundle, resolves the
//! destination into candidate addresses, and races them with the strategy
//! pair that is active when the call starts:
//!
//! | network            | serial (default)          | concurrent                          |
//! |--------------------|---------------------------|-------------------------------------|
//! | `tcp4` `udp6` ...  | try addresses in order    | flat race over all addresses        |
//! | `tcp` `udp`        | IPv4 chain vs IPv6 chain  | flat race, or family race if a family is preferred |
//!
//! In a family race the preferred family wins whenever it succeeds before the
//! next fallback tick; a faster fallback success is held until then.

mod conn;
mod connect;
mod listen;
mod network;
mod options;
mod race;
mod resolve;
mod strategy;
mod sys;

pub use conn::{Conn, Connection, UdpConn};
pub use connect::{NetDialer, SystemDialer};
pub use listen::Listener;
pub use network::{IpFamily, Network};
pub use options::{
    apply_options, apply_options_with, default_interface, default_options, default_routing_mark,
    set_default_interface, set_default_options, set_default_routing_mark, DialDefaults, DialOpt,
    DialOptions, Transport,
};
pub use resolve::parse_addr;
pub use strategy::{
    set_tcp_concurrent, strategy, tcp_concurrent, Strategy, StrategySelector,
    DEFAULT_FALLBACK_DELAY,
};
pub use sys::BoundInterface;

use crate::common::Context;
use crate::Result;
use race::DialPlan;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::debug;

/// Dial `address` over `network` with the process-wide defaults plus `opts`.
pub async fn dial_context(
    ctx: &Context,
    network: &str,
    address: &str,
    opts: &[DialOpt],
) -> Result<Conn> {
    dial_with(ctx, &strategy(), network, address, apply_options(opts)).await
}

/// Dial with an explicit strategy selector and a prebuilt bundle.
pub async fn dial_with(
    ctx: &Context,
    selector: &StrategySelector,
    network: &str,
    address: &str,
    opts: DialOptions,
) -> Result<Conn> {
    let strategy = selector.snapshot();

    let mut network: Network = network.parse()?;
    if let Some(family) = opts.only_family() {
        network = network.with_family(family);
    }

    let (ips, port) = parse_addr(ctx, network, address, &opts).await?;
    debug!(
        network = %network,
        address = %address,
        candidates = ips.len(),
        concurrent = strategy.concurrent,
        "dialing"
    );

    let dial = if network.is_dual_stack() {
        strategy.dual_stack
    } else {
        strategy.single_stack
    };
    let plan = Arc::new(DialPlan {
        ctx: ctx.clone(),
        network,
        port,
        opts,
        fallback_delay: strategy.fallback_delay,
    });
    dial(plan, ips).await
}

/// Bind a listener with the process-wide defaults plus `opts`.
pub async fn listen(ctx: &Context, network: &str, address: &str, opts: &[DialOpt]) -> Result<Listener> {
    let network: Network = network.parse()?;
    listen::listen_with(ctx, network, address, &apply_options(opts)).await
}

/// Bind a UDP socket with the process-wide defaults plus `opts`.
pub async fn listen_packet(
    ctx: &Context,
    network: &str,
    address: &str,
    opts: &[DialOpt],
) -> Result<UdpSocket> {
    listen_packet_with(ctx, network, address, &apply_options(opts)).await
}

async fn listen_packet_with(
    ctx: &Context,
    network: &str,
    address: &str,
    opts: &DialOptions,
) -> Result<UdpSocket> {
    let network: Network = network.parse()?;
    if network.is_tcp() {
        return Err(crate::Error::invalid_network(format!("{} is not a packet network", network)));
    }
    let listener = listen::listen_with(ctx, network, address, opts).await?;
    listener
        .into_udp()
        .ok_or_else(|| crate::Error::internal("udp listen produced a stream listener"))
}

/// Interface used when nothing else is configured.
///
/// The configured default wins; otherwise the interface carrying the
/// default route, or an empty name if the platform does not expose one.
pub fn default_interface_name() -> String {
    let configured = default_interface();
    if !configured.is_empty() {
        return configured;
    }
    let name = sys::default_route_interface().unwrap_or_default();
    debug!("default interface: {:?}", name);
    name
}

/// Dialer with a policy bundle folded once and reused for every call
#[derive(Debug, Clone)]
pub struct Dialer {
    opts: DialOptions,
    strategy: Arc<StrategySelector>,
}

impl Dialer {
    pub fn new(opts: &[DialOpt]) -> Self {
        Dialer {
            opts: apply_options(opts),
            strategy: strategy(),
        }
    }

    /// Use `selector` instead of the process-wide strategy
    pub fn with_strategy(mut self, selector: Arc<StrategySelector>) -> Self {
        self.strategy = selector;
        self
    }

    pub fn options(&self) -> &DialOptions {
        &self.opts
    }

    pub async fn dial(&self, ctx: &Context, network: &str, address: &str) -> Result<Conn> {
        dial_with(ctx, &self.strategy, network, address, self.opts.clone()).await
    }

    /// Bind a UDP socket for traffic to `remote`.
    ///
    /// Interface binding is dropped when `remote` is a loopback address.
    pub async fn listen_packet(
        &self,
        ctx: &Context,
        network: &str,
        address: &str,
        remote: SocketAddr,
    ) -> Result<UdpSocket> {
        let mut opts = self.opts.clone();
        if remote.ip().is_loopback() {
            opts.interface_name = None;
        }
        listen_packet_with(ctx, network, address, &opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::race::tests::MockDialer;
    use super::*;
    use crate::dns::Resolve;
    use crate::Error;
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticResolver {
        ips: Vec<IpAddr>,
        lookups: AtomicUsize,
    }

    impl StaticResolver {
        fn new(ips: &[&str]) -> Arc<Self> {
            Arc::new(StaticResolver {
                ips: ips.iter().map(|s| s.parse().unwrap()).collect(),
                lookups: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Resolve for StaticResolver {
        async fn lookup_ipv4(&self, _host: &str) -> Result<Vec<IpAddr>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.ips.clone())
        }

        async fn lookup_ipv6(&self, _host: &str) -> Result<Vec<IpAddr>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.ips.clone())
        }

        async fn lookup_ip(&self, _host: &str) -> Result<Vec<IpAddr>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.ips.clone())
        }
    }

    fn bundle(resolver: Arc<StaticResolver>, dialer: Arc<MockDialer>, extra: &[DialOpt]) -> DialOptions {
        let mut opts = vec![DialOpt::resolver(resolver), DialOpt::net_dialer(dialer)];
        opts.extend_from_slice(extra);
        apply_options_with(&DialDefaults::default(), &opts)
    }

    #[tokio::test]
    async fn test_invalid_network_skips_resolution() {
        let resolver = StaticResolver::new(&["10.0.0.1"]);
        let opts = bundle(resolver.clone(), Arc::new(MockDialer::new()), &[]);
        let err = dial_with(&Context::background(), &StrategySelector::new(), "sctp", "example.com:80", opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidNetwork(_)));
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tcp4_with_v6_only_answer() {
        let resolver = StaticResolver::new(&["2001:db8::1"]);
        let opts = bundle(resolver, Arc::new(MockDialer::new().ok("2001:db8::1", 0)), &[]);
        let err = dial_with(&Context::background(), &StrategySelector::new(), "tcp4", "example.com:80", opts)
            .await
            .unwrap_err();
        assert!(err.is_no_address());
    }

    #[tokio::test]
    async fn test_forced_family_rewrites_network() {
        let resolver = StaticResolver::new(&["2001:db8::1", "93.184.216.34"]);
        let dialer = Arc::new(MockDialer::new().ok("2001:db8::1", 0).ok("93.184.216.34", 0));
        let opts = bundle(resolver, dialer, &[DialOpt::only_single_stack(false)]);
        let conn = dial_with(&Context::background(), &StrategySelector::new(), "tcp", "example.com:443", opts)
            .await
            .unwrap();
        assert!(conn.peer_addr().unwrap().is_ipv6());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ipv6_fails_fast_ipv4_wins() {
        let resolver = StaticResolver::new(&["2001:db8::1", "93.184.216.34"]);
        let dialer = Arc::new(MockDialer::new().fail("2001:db8::1", 0).ok("93.184.216.34", 30));

        for concurrent in [false, true] {
            let selector = Arc::new(StrategySelector::new());
            selector.set_concurrent(concurrent);
            let d = Dialer {
                opts: bundle(resolver.clone(), dialer.clone(), &[]),
                strategy: selector,
            };
            let conn = d.dial(&Context::background(), "tcp", "example.com:443").await.unwrap();
            assert_eq!(conn.peer_addr().unwrap(), "93.184.216.34:443".parse().unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_during_dial_keeps_start_mode() {
        // Serial: the second address is only tried after the first fails.
        let resolver = StaticResolver::new(&["10.0.0.1", "10.0.0.2"]);
        let dialer = Arc::new(MockDialer::new().fail("10.0.0.1", 100).ok("10.0.0.2", 0));
        let selector = Arc::new(StrategySelector::new());

        let opts = bundle(resolver, dialer.clone(), &[]);
        let task = {
            let selector = selector.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now();
                let conn = dial_with(&Context::background(), &selector, "tcp4", "example.com:80", opts)
                    .await
                    .unwrap();
                (conn, start.elapsed())
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        selector.set_concurrent(true);

        let (conn, elapsed) = task.await.unwrap();
        assert_eq!(conn.peer_addr().unwrap().ip(), "10.0.0.2".parse::<IpAddr>().unwrap());
        assert!(elapsed >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_dial_timeout_from_context() {
        let resolver = StaticResolver::new(&["10.0.0.1"]);
        let dialer = Arc::new(MockDialer::new().ok("10.0.0.1", 5_000));
        let opts = bundle(resolver, dialer, &[]);
        let ctx = Context::with_timeout(Duration::from_millis(20));
        let err = dial_with(&ctx, &StrategySelector::new(), "tcp4", "example.com:80", opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect { ref source, .. } if matches!(**source, Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_listen_packet_rejects_stream_network() {
        let err = listen_packet(&Context::background(), "tcp", "127.0.0.1:0", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidNetwork(_)));
    }

    #[tokio::test]
    async fn test_dialer_listen_packet_drops_interface_for_loopback() {
        let d = Dialer {
            opts: apply_options_with(&DialDefaults::default(), &[DialOpt::interface("nope-if0")]),
            strategy: Arc::new(StrategySelector::new()),
        };
        let socket = d
            .listen_packet(
                &Context::background(),
                "udp",
                "127.0.0.1:0",
                "127.0.0.1:53".parse().unwrap(),
            )
            .await
            .unwrap();
        assert!(socket.local_addr().unwrap().ip().is_loopback());

        let err = d
            .listen_packet(
                &Context::background(),
                "udp",
                "127.0.0.1:0",
                "8.8.8.8:53".parse().unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Interface(_)));
        assert_eq!(d.options().interface_name(), Some("nope-if0"));
    }
}
