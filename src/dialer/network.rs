//! Network tokens and address families

use crate::dns::LookupMode;
use crate::Error;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            IpFamily::V4 => ip.is_ipv4(),
            IpFamily::V6 => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => write!(f, "4"),
            IpFamily::V6 => write!(f, "6"),
        }
    }
}

/// Requested network: transport plus optional family restriction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl Network {
    pub fn is_tcp(&self) -> bool {
        matches!(self, Network::Tcp | Network::Tcp4 | Network::Tcp6)
    }

    /// No family restriction: both families are candidates
    pub fn is_dual_stack(&self) -> bool {
        matches!(self, Network::Tcp | Network::Udp)
    }

    pub fn family(&self) -> Option<IpFamily> {
        match self {
            Network::Tcp4 | Network::Udp4 => Some(IpFamily::V4),
            Network::Tcp6 | Network::Udp6 => Some(IpFamily::V6),
            Network::Tcp | Network::Udp => None,
        }
    }

    /// Same transport, restricted to `family`
    pub fn with_family(&self, family: IpFamily) -> Network {
        match (self.is_tcp(), family) {
            (true, IpFamily::V4) => Network::Tcp4,
            (true, IpFamily::V6) => Network::Tcp6,
            (false, IpFamily::V4) => Network::Udp4,
            (false, IpFamily::V6) => Network::Udp6,
        }
    }

    pub fn lookup_mode(&self) -> LookupMode {
        match self.family() {
            Some(IpFamily::V4) => LookupMode::V4,
            Some(IpFamily::V6) => LookupMode::V6,
            None => LookupMode::Any,
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            other => Err(Error::invalid_network(other)),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("udp6".parse::<Network>().unwrap(), Network::Udp6);
        assert!(matches!(
            "sctp".parse::<Network>(),
            Err(Error::InvalidNetwork(n)) if n == "sctp"
        ));
        assert!("TCP".parse::<Network>().is_err());
    }

    #[test]
    fn test_with_family_rewrites_token() {
        assert_eq!(Network::Tcp.with_family(IpFamily::V6), Network::Tcp6);
        assert_eq!(Network::Udp6.with_family(IpFamily::V4), Network::Udp4);
        assert_eq!(Network::Tcp4.with_family(IpFamily::V4).to_string(), "tcp4");
    }

    #[test]
    fn test_lookup_mode() {
        assert_eq!(Network::Tcp4.lookup_mode(), LookupMode::V4);
        assert_eq!(Network::Udp6.lookup_mode(), LookupMode::V6);
        assert_eq!(Network::Udp.lookup_mode(), LookupMode::Any);
        assert!(Network::Udp.is_dual_stack());
        assert!(!Network::Tcp6.is_dual_stack());
    }
}
