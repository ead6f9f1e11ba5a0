//! Platform socket options: interface binding, routing mark, TFO and MPTCP

use crate::{Error, Result};
use socket2::{Domain, Socket};
use std::net::IpAddr;

/// Interface resolved to its platform index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundInterface {
    pub name: String,
    pub index: u32,
}

/// Resolve an interface name to its platform index
#[cfg(unix)]
pub fn resolve_interface(name: &str) -> Result<BoundInterface> {
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| Error::interface(format!("invalid interface name {:?}", name)))?;
    // SAFETY: c_name is a valid NUL-terminated string for the duration of the call.
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(Error::interface(format!(
            "interface {} not found: {}",
            name,
            std::io::Error::last_os_error()
        )));
    }
    Ok(BoundInterface {
        name: name.to_string(),
        index,
    })
}

#[cfg(not(unix))]
pub fn resolve_interface(name: &str) -> Result<BoundInterface> {
    Err(Error::interface(format!(
        "interface {}: lookup not supported on this platform",
        name
    )))
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "ios"))]
fn setsockopt_int(socket: &Socket, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the fd is owned by `socket` and `value` outlives the call.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Bind `socket` to `iface` (SO_BINDTODEVICE)
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn bind_to_interface(socket: &Socket, iface: &BoundInterface, _dest: IpAddr) -> Result<()> {
    socket.bind_device(Some(iface.name.as_bytes()))?;
    tracing::debug!("bind to interface {}", iface.name);
    Ok(())
}

/// Bind `socket` to `iface` (IP_BOUND_IF). Non global unicast peers are left unbound.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn bind_to_interface(socket: &Socket, iface: &BoundInterface, dest: IpAddr) -> Result<()> {
    use crate::common::net::is_global_unicast;

    if !is_global_unicast(dest) {
        return Ok(());
    }
    let (level, opt) = match dest {
        IpAddr::V4(_) => (libc::IPPROTO_IP, libc::IP_BOUND_IF),
        IpAddr::V6(_) => (libc::IPPROTO_IPV6, libc::IPV6_BOUND_IF),
    };
    setsockopt_int(socket, level, opt, iface.index as libc::c_int)?;
    tracing::debug!("darwin bind {} to interface {}", dest, iface.name);
    Ok(())
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub fn bind_to_interface(_socket: &Socket, iface: &BoundInterface, _dest: IpAddr) -> Result<()> {
    Err(Error::unsupported(format!(
        "binding to interface {} is not supported on this platform",
        iface.name
    )))
}

/// Apply a routing mark (SO_MARK)
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn set_routing_mark(socket: &Socket, mark: u32) -> Result<()> {
    socket.set_mark(mark)?;
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn set_routing_mark(_socket: &Socket, _mark: u32) -> Result<()> {
    static WARN: std::sync::Once = std::sync::Once::new();
    WARN.call_once(|| tracing::warn!("Routing mark on socket is not supported on current platform"));
    Ok(())
}

/// Ask the kernel to carry the first write in the SYN. Returns false when unsupported.
#[cfg(target_os = "linux")]
pub fn enable_fast_open_connect(socket: &Socket) -> Result<bool> {
    match setsockopt_int(socket, libc::IPPROTO_TCP, libc::TCP_FASTOPEN_CONNECT, 1) {
        Ok(()) => Ok(true),
        Err(Error::Io(e)) if e.raw_os_error() == Some(libc::ENOPROTOOPT) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn enable_fast_open_connect(_socket: &Socket) -> Result<bool> {
    Ok(false)
}

#[cfg(target_os = "linux")]
const IPPROTO_MPTCP: i32 = 262;

/// Create a multipath TCP stream socket
#[cfg(target_os = "linux")]
pub fn new_mptcp_socket(domain: Domain) -> Result<Socket> {
    let socket = Socket::new(
        domain,
        socket2::Type::STREAM,
        Some(socket2::Protocol::from(IPPROTO_MPTCP)),
    )?;
    Ok(socket)
}

#[cfg(not(target_os = "linux"))]
pub fn new_mptcp_socket(_domain: Domain) -> Result<Socket> {
    Err(Error::unsupported("MPTCP is only supported on Linux"))
}

/// Interface carrying the default route, if the platform exposes it
#[cfg(target_os = "linux")]
pub fn default_route_interface() -> Option<String> {
    let content = std::fs::read_to_string("/proc/net/route").ok()?;
    parse_default_route(&content)
}

#[cfg(not(target_os = "linux"))]
pub fn default_route_interface() -> Option<String> {
    None
}

/// Pick the default route interface out of `/proc/net/route` content
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_default_route(content: &str) -> Option<String> {
    content
        .lines()
        .skip(1)
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|fields| fields.len() >= 8)
        .find(|fields| fields[1] == "00000000" && fields[7] == "00000000")
        .map(|fields| fields[0].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_route() {
        let content = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
docker0\t000011AC\t00000000\t0001\t0\t0\t0\t0000FFFF\t0\t0\t0
eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0
";
        assert_eq!(parse_default_route(content), Some("eth0".to_string()));
        assert_eq!(parse_default_route("Iface\tDestination\n"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_interface_missing() {
        let err = resolve_interface("does-not-exist0").unwrap_err();
        assert!(matches!(err, Error::Interface(_)));
    }

    #[test]
    fn test_fast_open_reports_support() {
        let socket = Socket::new(Domain::IPV4, socket2::Type::STREAM, None).unwrap();
        let supported = enable_fast_open_connect(&socket).unwrap();
        if !cfg!(target_os = "linux") {
            assert!(!supported);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resolve_loopback() {
        let iface = resolve_interface("lo").unwrap();
        assert_eq!(iface.name, "lo");
        assert!(iface.index > 0);
    }
}
