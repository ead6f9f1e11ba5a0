//! Mihomo Dialer - outbound connection establishment for a rule-based proxy
//!
//! Given a destination and a bundle of dial policies, produce exactly one
//! usable connection:
//! - Layered dial options (process-wide defaults, then call-site overrides)
//! - Proxy server host resolution through a pluggable resolver
//! - Serial or concurrent address racing, per address family or flat
//! - Happy-Eyeballs style dual-stack racing with a repeating fallback tick
//! - Interface binding, routing mark, TCP fast open and MPTCP on the built-in transport
//!
//! # Architecture
//!
//! ```text
//!  +-------------+     +-----------------------------------------------+
//!  |   config/   +---->|                   dialer/                     |
//!  +-------------+     |                                               |
//!                      |  options --> resolve --> strategy --> race    |
//!  +-------------+     |                 |                      |      |
//!  |    dns/     |<----+-----------------+                   connect   |
//!  +-------------+     |                                        |      |
//!                      |  listen ---------------------------> sys      |
//!                      +-----------------------------------------------+
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mihomo_dialer::{dialer, Context, DialOpt};
//! use std::time::Duration;
//!
//! # async fn run() -> mihomo_dialer::Result<()> {
//! let ctx = Context::with_timeout(Duration::from_secs(5));
//! let conn = dialer::dial_context(&ctx, "tcp", "example.com:443", &[DialOpt::prefer_ipv6()]).await?;
//! println!("connected to {}", conn.peer_addr()?);
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod config;
pub mod dialer;
pub mod dns;

pub use common::context::Context;
pub use common::error::{Error, JoinedError, Result};
pub use config::Config;
pub use dialer::{Conn, DialOpt, DialOptions, Dialer, Network};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
