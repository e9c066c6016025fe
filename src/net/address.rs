//! Listen address parsing and matching.
//!
//! Addresses take the form `[network/]host:port[-port]`; the network defaults
//! to `tcp`. A listen address covers every port in its inclusive range.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Network used when an address does not name one.
pub const DEFAULT_NETWORK: &str = "tcp";

const NETWORKS: [&str; 3] = ["tcp", "tcp4", "tcp6"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address {0:?} is missing a port")]
    MissingPort(String),

    #[error("address {0:?} has an invalid port")]
    InvalidPort(String),

    #[error("address {0:?} has an empty or inverted port range")]
    InvalidRange(String),

    #[error("address {0:?} uses unsupported network {1:?}")]
    UnsupportedNetwork(String, String),
}

/// A parsed listen address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddress {
    pub network: String,
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
}

impl ListenAddress {
    /// True if `network` is ours and `port` falls inside the range.
    ///
    /// The host part is not compared: a listener on `0.0.0.0:8080` and one
    /// on `localhost:8080` both accept a target of `127.0.0.1:8080`.
    pub fn matches(&self, network: &str, port: u16) -> bool {
        self.network == network && (self.start_port..=self.end_port).contains(&port)
    }

    /// Socket addresses to bind, one per port in the range.
    pub fn bind_addresses(&self) -> impl Iterator<Item = String> + '_ {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        (self.start_port..=self.end_port).map(move |port| {
            if host.contains(':') {
                format!("[{}]:{}", host, port)
            } else {
                format!("{}:{}", host, port)
            }
        })
    }
}

impl FromStr for ListenAddress {
    type Err = AddressError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (network, rest) = match raw.split_once('/') {
            Some((network, rest)) => (network.to_ascii_lowercase(), rest),
            None => (DEFAULT_NETWORK.to_string(), raw),
        };
        if !NETWORKS.contains(&network.as_str()) {
            return Err(AddressError::UnsupportedNetwork(raw.to_string(), network));
        }

        let (host, ports) = rest
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(raw.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        let parse = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| AddressError::InvalidPort(raw.to_string()))
        };
        let (start_port, end_port) = match ports.split_once('-') {
            Some((start, end)) => (parse(start)?, parse(end)?),
            None => {
                let port = parse(ports)?;
                (port, port)
            }
        };
        if end_port < start_port {
            return Err(AddressError::InvalidRange(raw.to_string()));
        }

        Ok(Self {
            network,
            host: host.to_string(),
            start_port,
            end_port,
        })
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.network, self.host, self.start_port)?;
        if self.end_port != self.start_port {
            write!(f, "-{}", self.end_port)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let addr: ListenAddress = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(addr.network, "tcp");
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!((addr.start_port, addr.end_port), (8080, 8080));
    }

    #[test]
    fn test_parse_network_and_range() {
        let addr: ListenAddress = "tcp6/[::1]:9000-9002".parse().unwrap();
        assert_eq!(addr.network, "tcp6");
        assert_eq!(addr.host, "::1");
        assert_eq!(
            addr.bind_addresses().collect::<Vec<_>>(),
            ["[::1]:9000", "[::1]:9001", "[::1]:9002"]
        );
    }

    #[test]
    fn test_empty_host_binds_all_interfaces() {
        let addr: ListenAddress = ":80".parse().unwrap();
        assert_eq!(addr.bind_addresses().collect::<Vec<_>>(), ["0.0.0.0:80"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("localhost".parse::<ListenAddress>(), Err(AddressError::MissingPort(_))));
        assert!(matches!("localhost:http".parse::<ListenAddress>(), Err(AddressError::InvalidPort(_))));
        assert!(matches!("localhost:90-80".parse::<ListenAddress>(), Err(AddressError::InvalidRange(_))));
        assert!(matches!(
            "udp/localhost:80".parse::<ListenAddress>(),
            Err(AddressError::UnsupportedNetwork(..))
        ));
    }

    #[test]
    fn test_matches_ignores_host() {
        let addr: ListenAddress = "localhost:8000-8010".parse().unwrap();
        assert!(addr.matches("tcp", 8000));
        assert!(addr.matches("tcp", 8010));
        assert!(!addr.matches("tcp", 8011));
        assert!(!addr.matches("tcp6", 8005));
    }
}
