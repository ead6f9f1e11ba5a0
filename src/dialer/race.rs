//! Address racing: serial chains, flat races and the dual-stack racer
//!
//! Every attempt runs in a detached task that owns its result. A finished
//! attempt hands its result to the coordinator with a non-blocking send; if
//! the coordinator has already returned, the receiver is gone and the
//! attempt closes its own connection. Sibling attempts are never aborted.

use super::conn::Conn;
use super::connect::connect;
use super::network::{IpFamily, Network};
use super::options::DialOptions;
use crate::common::net::sort_addrs;
use crate::common::Context;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, trace};

/// Strategy entry point over a candidate list
pub(crate) type DialFn = fn(Arc<DialPlan>, Vec<IpAddr>) -> BoxFuture<'static, Result<Conn>>;

/// Everything an attempt needs apart from its address
#[derive(Debug)]
pub struct DialPlan {
    pub ctx: Context,
    pub network: Network,
    pub port: u16,
    pub opts: DialOptions,
    pub fallback_delay: Duration,
}

struct Attempt {
    result: Result<Conn>,
    primary: bool,
}

/// Hand a finished attempt to the coordinator, or close it if the race is over.
fn deliver(tx: &mpsc::Sender<Attempt>, attempt: Attempt) {
    if let Err(e) = tx.try_send(attempt) {
        if let Ok(conn) = e.into_inner().result {
            debug!(
                peer = ?conn.peer_addr().ok(),
                "race already decided, closing late connection"
            );
            drop(conn);
        }
    }
}

async fn dial_one(plan: &DialPlan, ip: IpAddr) -> Result<Conn> {
    let addr = SocketAddr::new(ip, plan.port);
    match connect(&plan.ctx, plan.network, ip, plan.port, &plan.opts).await {
        Ok(conn) => {
            trace!(network = %plan.network, addr = %addr, "attempt connected");
            Ok(conn)
        }
        Err(e) => {
            trace!(network = %plan.network, addr = %addr, error = %e, "attempt failed");
            Err(Error::connect(addr, e))
        }
    }
}

/// Try each address in order, returning the first success.
pub(crate) async fn serial_dial(plan: Arc<DialPlan>, ips: Vec<IpAddr>) -> Result<Conn> {
    if ips.is_empty() {
        return Err(Error::NoAddress);
    }

    let mut errors = Vec::with_capacity(ips.len());
    for ip in ips {
        match dial_one(&plan, ip).await {
            Ok(conn) => return Ok(conn),
            Err(e) => errors.push(e),
        }
    }
    Err(Error::join(errors))
}

/// Dial every address at once; the first success wins.
///
/// Errors are reported in completion order.
pub(crate) async fn parallel_dial(plan: Arc<DialPlan>, ips: Vec<IpAddr>) -> Result<Conn> {
    if ips.is_empty() {
        return Err(Error::NoAddress);
    }

    let (tx, mut rx) = mpsc::channel(ips.len());
    for ip in ips {
        let plan = plan.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = dial_one(&plan, ip).await;
            deliver(&tx, Attempt { result, primary: true });
        });
    }
    drop(tx);

    let mut errors = Vec::new();
    while let Some(attempt) = rx.recv().await {
        match attempt.result {
            Ok(conn) => return Ok(conn),
            Err(e) => errors.push(e),
        }
    }

    // Only reachable if an attempt task died without reporting.
    if errors.is_empty() {
        return Err(Error::timeout("deadline exceeded"));
    }
    Err(Error::join(errors))
}

/// Race the IPv4 group against the IPv6 group, each dialed with `inner`.
///
/// Without a preference both groups are primary. With one, the other group
/// is a fallback: its success is held and released on a fallback tick or
/// once every group has finished.
pub(crate) async fn dual_stack_dial(
    plan: Arc<DialPlan>,
    ips: Vec<IpAddr>,
    inner: DialFn,
) -> Result<Conn> {
    let (v4, v6) = sort_addrs(&ips);
    if v4.is_empty() && v6.is_empty() {
        return Err(Error::NoAddress);
    }

    let prefer = plan.opts.prefer();
    let (tx, mut rx) = mpsc::channel(2);
    for (family, group) in [(IpFamily::V4, v4), (IpFamily::V6, v6)] {
        if group.is_empty() {
            continue;
        }
        let primary = prefer.map_or(true, |p| p == family);
        trace!(family = %family, primary, candidates = group.len(), "starting family race");

        let plan = plan.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = inner(plan, group).await;
            deliver(&tx, Attempt { result, primary });
        });
    }
    drop(tx);

    let delay = plan.fallback_delay.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + delay, delay);
    let mut fallback: Option<Conn> = None;
    let mut primary_errors = Vec::new();
    let mut fallback_errors = Vec::new();

    loop {
        tokio::select! {
            attempt = rx.recv() => match attempt {
                Some(Attempt { result: Ok(conn), primary: true }) => return Ok(conn),
                Some(Attempt { result: Ok(conn), primary: false }) => fallback = Some(conn),
                Some(Attempt { result: Err(e), primary: true }) => primary_errors.push(e),
                Some(Attempt { result: Err(e), primary: false }) => fallback_errors.push(e),
                None => break,
            },
            _ = ticker.tick() => {
                if let Some(conn) = fallback.take() {
                    debug!(network = %plan.network, "primary family still pending, using fallback");
                    return Ok(conn);
                }
            }
        }
    }

    if let Some(conn) = fallback {
        return Ok(conn);
    }
    primary_errors.append(&mut fallback_errors);
    if primary_errors.is_empty() {
        return Err(Error::timeout("deadline exceeded"));
    }
    Err(Error::join(primary_errors))
}

pub(crate) fn serial_single_stack(plan: Arc<DialPlan>, ips: Vec<IpAddr>) -> BoxFuture<'static, Result<Conn>> {
    serial_dial(plan, ips).boxed()
}

pub(crate) fn serial_dual_stack(plan: Arc<DialPlan>, ips: Vec<IpAddr>) -> BoxFuture<'static, Result<Conn>> {
    dual_stack_dial(plan, ips, serial_single_stack).boxed()
}

pub(crate) fn concurrent_single_stack(plan: Arc<DialPlan>, ips: Vec<IpAddr>) -> BoxFuture<'static, Result<Conn>> {
    parallel_dial(plan, ips).boxed()
}

pub(crate) fn concurrent_dual_stack(plan: Arc<DialPlan>, ips: Vec<IpAddr>) -> BoxFuture<'static, Result<Conn>> {
    if plan.opts.prefer().is_none() {
        return parallel_dial(plan, ips).boxed();
    }
    dual_stack_dial(plan, ips, concurrent_single_stack).boxed()
}
