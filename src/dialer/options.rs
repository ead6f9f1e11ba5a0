//! Dial policy bundle and the options that build it
//!
//! A [`DialOptions`] is folded once per call: process-wide defaults first,
//! then the process-wide option list, then call-site options. Each
//! [`DialOpt`] is a pure `DialOptions -> DialOptions` transform.

use super::connect::{NetDialer, SystemDialer};
use super::network::IpFamily;
use crate::dns::Resolve;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

static DEFAULT_INTERFACE: OnceLock<RwLock<String>> = OnceLock::new();
static DEFAULT_ROUTING_MARK: AtomicU32 = AtomicU32::new(0);
static DEFAULT_OPTIONS: OnceLock<RwLock<Vec<DialOpt>>> = OnceLock::new();

fn default_interface_slot() -> &'static RwLock<String> {
    DEFAULT_INTERFACE.get_or_init(|| RwLock::new(String::new()))
}

fn default_options_slot() -> &'static RwLock<Vec<DialOpt>> {
    DEFAULT_OPTIONS.get_or_init(|| RwLock::new(Vec::new()))
}

/// Set the interface every dial binds to unless overridden ("" = none)
pub fn set_default_interface<S: Into<String>>(name: S) {
    *default_interface_slot().write() = name.into();
}

pub fn default_interface() -> String {
    default_interface_slot().read().clone()
}

/// Set the routing mark every dial uses unless overridden (0 = none)
pub fn set_default_routing_mark(mark: u32) {
    DEFAULT_ROUTING_MARK.store(mark, Ordering::Relaxed);
}

pub fn default_routing_mark() -> u32 {
    DEFAULT_ROUTING_MARK.load(Ordering::Relaxed)
}

/// Replace the option list applied before call-site options
pub fn set_default_options(opts: Vec<DialOpt>) {
    *default_options_slot().write() = opts;
}

pub fn default_options() -> Vec<DialOpt> {
    default_options_slot().read().clone()
}

/// Transport used for each connect attempt
#[derive(Clone)]
pub enum Transport {
    /// Built-in socket dialer; copied per attempt before policy is applied
    System(SystemDialer),
    /// Caller supplied transport; dial policy is not applied to it
    Custom(Arc<dyn NetDialer>),
}

impl Default for Transport {
    fn default() -> Self {
        Transport::System(SystemDialer::default())
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::System(d) => f.debug_tuple("System").field(d).finish(),
            Transport::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Fully resolved dial configuration for one call
#[derive(Clone, Default)]
pub struct DialOptions {
    pub(crate) interface_name: Option<String>,
    pub(crate) addr_reuse: bool,
    pub(crate) routing_mark: Option<u32>,
    pub(crate) network: Option<IpFamily>,
    pub(crate) prefer: Option<IpFamily>,
    pub(crate) tfo: bool,
    pub(crate) mptcp: bool,
    pub(crate) resolver: Option<Arc<dyn Resolve>>,
    pub(crate) transport: Transport,
}

impl DialOptions {
    pub fn interface_name(&self) -> Option<&str> {
        self.interface_name.as_deref()
    }

    pub fn addr_reuse(&self) -> bool {
        self.addr_reuse
    }

    pub fn routing_mark(&self) -> Option<u32> {
        self.routing_mark
    }

    /// Forced single-stack family
    pub fn only_family(&self) -> Option<IpFamily> {
        self.network
    }

    /// Preferred family for dual-stack races
    pub fn prefer(&self) -> Option<IpFamily> {
        self.prefer
    }

    pub fn tfo(&self) -> bool {
        self.tfo
    }

    pub fn mptcp(&self) -> bool {
        self.mptcp
    }

    pub fn resolver(&self) -> Option<&Arc<dyn Resolve>> {
        self.resolver.as_ref()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialOptions")
            .field("interface_name", &self.interface_name)
            .field("addr_reuse", &self.addr_reuse)
            .field("routing_mark", &self.routing_mark)
            .field("network", &self.network)
            .field("prefer", &self.prefer)
            .field("tfo", &self.tfo)
            .field("mptcp", &self.mptcp)
            .field("resolver", &self.resolver.as_ref().map(|r| r.server()))
            .field("transport", &self.transport)
            .finish()
    }
}

/// One composable policy setter
#[derive(Clone)]
pub struct DialOpt(Arc<dyn Fn(DialOptions) -> DialOptions + Send + Sync>);

impl DialOpt {
    fn new<F>(f: F) -> Self
    where
        F: Fn(DialOptions) -> DialOptions + Send + Sync + 'static,
    {
        DialOpt(Arc::new(f))
    }

    pub fn apply(&self, opts: DialOptions) -> DialOptions {
        (self.0)(opts)
    }

    /// Bind to a named interface ("" clears it)
    pub fn interface<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        Self::new(move |opts| DialOptions {
            interface_name: (!name.is_empty()).then(|| name.clone()),
            ..opts
        })
    }

    pub fn addr_reuse(reuse: bool) -> Self {
        Self::new(move |opts| DialOptions {
            addr_reuse: reuse,
            ..opts
        })
    }

    /// Set the routing mark (0 clears it)
    pub fn routing_mark(mark: u32) -> Self {
        Self::new(move |opts| DialOptions {
            routing_mark: (mark != 0).then_some(mark),
            ..opts
        })
    }

    pub fn resolver(resolver: Arc<dyn Resolve>) -> Self {
        Self::new(move |opts| DialOptions {
            resolver: Some(resolver.clone()),
            ..opts
        })
    }

    pub fn prefer_ipv4() -> Self {
        Self::new(|opts| DialOptions {
            prefer: Some(IpFamily::V4),
            ..opts
        })
    }

    pub fn prefer_ipv6() -> Self {
        Self::new(|opts| DialOptions {
            prefer: Some(IpFamily::V6),
            ..opts
        })
    }

    /// Restrict dials to a single family
    pub fn only_single_stack(ipv4: bool) -> Self {
        let family = if ipv4 { IpFamily::V4 } else { IpFamily::V6 };
        Self::new(move |opts| DialOptions {
            network: Some(family),
            ..opts
        })
    }

    pub fn tfo(tfo: bool) -> Self {
        Self::new(move |opts| DialOptions { tfo, ..opts })
    }

    pub fn mptcp(mptcp: bool) -> Self {
        Self::new(move |opts| DialOptions { mptcp, ..opts })
    }

    /// Use a caller supplied transport for every attempt.
    ///
    /// The transport only receives the network and socket address, so
    /// interface binding, routing mark, MPTCP and fast open are not applied.
    pub fn net_dialer(dialer: Arc<dyn NetDialer>) -> Self {
        Self::new(move |opts| DialOptions {
            transport: Transport::Custom(dialer.clone()),
            ..opts
        })
    }

    /// Replace the built-in dialer template
    pub fn system_dialer(dialer: SystemDialer) -> Self {
        Self::new(move |opts| DialOptions {
            transport: Transport::System(dialer.clone()),
            ..opts
        })
    }

    /// Replace the whole bundle with a prebuilt one
    pub fn options(bundle: DialOptions) -> Self {
        Self::new(move |_| bundle.clone())
    }
}

impl fmt::Debug for DialOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DialOpt")
    }
}

/// Snapshot of the process-wide defaults
#[derive(Debug, Clone, Default)]
pub struct DialDefaults {
    pub interface: String,
    pub routing_mark: u32,
    pub options: Vec<DialOpt>,
}

impl DialDefaults {
    pub fn current() -> Self {
        DialDefaults {
            interface: default_interface(),
            routing_mark: default_routing_mark(),
            options: default_options(),
        }
    }
}

/// Fold the process-wide defaults and `opts` into a bundle
pub fn apply_options(opts: &[DialOpt]) -> DialOptions {
    apply_options_with(&DialDefaults::current(), opts)
}

/// Fold `defaults` and `opts` into a bundle
pub fn apply_options_with(defaults: &DialDefaults, opts: &[DialOpt]) -> DialOptions {
    let base = DialOptions {
        interface_name: (!defaults.interface.is_empty()).then(|| defaults.interface.clone()),
        routing_mark: (defaults.routing_mark != 0).then_some(defaults.routing_mark),
        ..Default::default()
    };

    defaults
        .options
        .iter()
        .chain(opts)
        .fold(base, |acc, opt| opt.apply(acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_seed_bundle() {
        let defaults = DialDefaults {
            interface: "eth0".to_string(),
            routing_mark: 255,
            options: vec![DialOpt::prefer_ipv6()],
        };
        let opts = apply_options_with(&defaults, &[]);
        assert_eq!(opts.interface_name(), Some("eth0"));
        assert_eq!(opts.routing_mark(), Some(255));
        assert_eq!(opts.prefer(), Some(IpFamily::V6));
    }

    #[test]
    fn test_call_site_overrides_defaults() {
        let defaults = DialDefaults {
            interface: "eth0".to_string(),
            routing_mark: 255,
            options: vec![DialOpt::prefer_ipv6(), DialOpt::tfo(true)],
        };
        let opts = apply_options_with(
            &defaults,
            &[
                DialOpt::interface("wlan0"),
                DialOpt::routing_mark(0),
                DialOpt::prefer_ipv4(),
                DialOpt::only_single_stack(false),
            ],
        );
        assert_eq!(opts.interface_name(), Some("wlan0"));
        assert_eq!(opts.routing_mark(), None);
        assert_eq!(opts.prefer(), Some(IpFamily::V4));
        assert_eq!(opts.only_family(), Some(IpFamily::V6));
        assert!(opts.tfo());
        assert!(!opts.mptcp());
    }

    #[test]
    fn test_later_options_win() {
        let opts = apply_options_with(
            &DialDefaults::default(),
            &[DialOpt::interface("a"), DialOpt::interface("b"), DialOpt::interface("")],
        );
        assert_eq!(opts.interface_name(), None);
    }

    #[test]
    fn test_prebuilt_bundle_replaces_everything() {
        let prebuilt = apply_options_with(
            &DialDefaults::default(),
            &[DialOpt::mptcp(true), DialOpt::addr_reuse(true)],
        );
        let defaults = DialDefaults {
            interface: "eth0".to_string(),
            ..Default::default()
        };
        let opts = apply_options_with(&defaults, &[DialOpt::options(prebuilt)]);
        assert_eq!(opts.interface_name(), None);
        assert!(opts.mptcp());
        assert!(opts.addr_reuse());
    }

    #[test]
    fn test_default_transport_is_system() {
        let opts = DialOptions::default();
        assert!(matches!(opts.transport(), Transport::System(_)));
    }
}
