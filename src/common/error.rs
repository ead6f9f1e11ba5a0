//! Error types for the dialer

use std::fmt;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Dialer error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Unrecognized network token
    #[error("invalid network stack: {0}")]
    InvalidNetwork(String),

    /// Candidate address list was empty when racing started
    #[error("no ip address")]
    NoAddress,

    /// Malformed "host:port"
    #[error("invalid address: {0}")]
    AddressParse(String),

    /// Failure reported by the resolution backend itself
    #[error("DNS error: {0}")]
    Dns(String),

    /// Resolution failed while preparing a dial
    #[error("dns resolve failed: {0}")]
    DnsResolve(#[source] Box<Error>),

    /// One connect attempt failed
    #[error("connect {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: Box<Error>,
    },

    /// Bind interface could not be resolved
    #[error("interface error: {0}")]
    Interface(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("operation canceled")]
    Canceled,

    /// Every attempt of a race failed
    #[error("{0}")]
    Joined(JoinedError),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn invalid_network<S: Into<String>>(network: S) -> Self {
        Error::InvalidNetwork(network.into())
    }

    pub fn address<S: Into<String>>(msg: S) -> Self {
        Error::AddressParse(msg.into())
    }

    pub fn dns<S: Into<String>>(msg: S) -> Self {
        Error::Dns(msg.into())
    }

    pub fn dns_resolve(cause: Error) -> Self {
        Error::DnsResolve(Box::new(cause))
    }

    pub fn connect(addr: SocketAddr, cause: Error) -> Self {
        Error::Connect {
            addr,
            source: Box::new(cause),
        }
    }

    pub fn interface<S: Into<String>>(msg: S) -> Self {
        Error::Interface(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Join a list of attempt errors, keeping their order.
    ///
    /// A single error is returned as-is.
    pub fn join(errors: Vec<Error>) -> Self {
        let mut joined = JoinedError::default();
        for e in errors {
            joined.push(e);
        }
        if joined.len() == 1 {
            return joined.errors.remove(0);
        }
        Error::Joined(joined)
    }

    /// Errors carried by this value, flattened.
    pub fn causes(&self) -> Vec<&Error> {
        match self {
            Error::Joined(joined) => joined.iter().collect(),
            e => vec![e],
        }
    }

    pub fn is_no_address(&self) -> bool {
        matches!(self, Error::NoAddress)
    }
}

/// Aggregate of per-attempt errors, order preserving.
#[derive(Debug, Default)]
pub struct JoinedError {
    errors: Vec<Error>,
}

impl JoinedError {
    /// Append an error; joined errors are flattened in place.
    pub fn push(&mut self, error: Error) {
        match error {
            Error::Joined(inner) => self.errors.extend(inner.errors),
            e => self.errors.push(e),
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    pub fn into_inner(self) -> Vec<Error> {
        self.errors
    }
}

impl fmt::Display for JoinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::config("test error");
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::invalid_network("sctp");
        assert_eq!(e.to_string(), "invalid network stack: sctp");
        assert_eq!(Error::NoAddress.to_string(), "no ip address");
    }

    #[test]
    fn test_join_flattens_and_keeps_order() {
        let inner = Error::join(vec![Error::dns("a"), Error::dns("b")]);
        let outer = Error::join(vec![Error::dns("first"), inner, Error::dns("c")]);

        let msgs: Vec<String> = outer.causes().iter().map(|e| e.to_string()).collect();
        assert_eq!(
            msgs,
            vec!["DNS error: first", "DNS error: a", "DNS error: b", "DNS error: c"]
        );
        assert_eq!(outer.to_string().lines().count(), 4);
    }

    #[test]
    fn test_join_single_is_unwrapped() {
        let e = Error::join(vec![Error::NoAddress]);
        assert!(e.is_no_address());
    }

    #[test]
    fn test_dns_resolve_wraps_source() {
        use std::error::Error as _;

        let e = Error::dns_resolve(Error::dns("servfail"));
        assert_eq!(e.to_string(), "dns resolve failed: DNS error: servfail");
        assert!(e.source().is_some());
    }
}
