//! Core value types exchanged with the dataplane.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;

/// Runtime index assigned by the dataplane to an interface.
///
/// Indices are only meaningful for the lifetime of one dataplane process.
pub type InterfaceIndex = u32;

/// Index of the built-in local interface that always exists.
pub const LOCAL_INTERFACE_INDEX: InterfaceIndex = 0;

/// A value that does not parse as an address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{0:?} is not a MAC address")]
    Mac(String),

    #[error("{0:?} is not an IP address")]
    Address(String),

    #[error("{0:?} is not an address with a prefix length")]
    Network(String),
}

/// Hardware address of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", octet)?;
        }
        Ok(())
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    /// Accepts colon or dash separated hex octets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::Mac(s.to_string());
        let mut octets = [0u8; 6];
        let mut groups = s.split([':', '-']);
        for slot in octets.iter_mut() {
            let group = groups.next().filter(|g| g.len() == 2).ok_or_else(invalid)?;
            *slot = u8::from_str_radix(group, 16).map_err(|_| invalid())?;
        }
        if groups.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddress(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

/// An interface address with its prefix length (e.g. `10.0.0.1/24`).
///
/// Unlike a route prefix, host bits are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpNetwork {
    address: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    /// Creates a new network, validating the prefix length.
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = if address.is_ipv4() { 32 } else { 128 };
        if prefix_len > max_len {
            return Err(ParseError::Network(format!(
                "{}/{}",
                address, prefix_len
            )));
        }
        Ok(IpNetwork {
            address,
            prefix_len,
        })
    }

    /// Creates a host network (/32 or /128) for a bare address.
    pub fn host(address: IpAddr) -> Self {
        let prefix_len = if address.is_ipv4() { 32 } else { 128 };
        IpNetwork {
            address,
            prefix_len,
        }
    }

    /// Returns the address part.
    pub const fn address(&self) -> IpAddr {
        self.address
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns true if this is an IPv6 link-local address (fe80::/10).
    pub fn is_link_local(&self) -> bool {
        match self.address {
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
            IpAddr::V4(_) => false,
        }
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpNetwork {
    type Err = ParseError;

    /// Parses `addr/len`; a bare address becomes a host network.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('/') {
            Some((addr, len)) => {
                let address: IpAddr = addr
                    .parse()
                    .map_err(|_| ParseError::Network(s.to_string()))?;
                let prefix_len: u8 = len
                    .parse()
                    .map_err(|_| ParseError::Network(s.to_string()))?;
                IpNetwork::new(address, prefix_len)
            }
            None => s
                .parse::<IpAddr>()
                .map(IpNetwork::host)
                .map_err(|_| ParseError::Address(s.to_string())),
        }
    }
}

impl TryFrom<String> for IpNetwork {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpNetwork> for String {
    fn from(net: IpNetwork) -> Self {
        net.to_string()
    }
}

/// Parses an address that may carry a mask suffix, dropping the mask.
pub fn parse_address_strip_mask(s: &str) -> Result<IpAddr, ParseError> {
    let addr = s.split_once('/').map_or(s, |(addr, _)| addr);
    addr.trim()
        .parse()
        .map_err(|_| ParseError::Address(s.to_string()))
}

/// Parses an IPv6 address used as a segment identifier.
pub fn parse_sid(s: &str) -> Result<Ipv6Addr, ParseError> {
    s.trim()
        .parse()
        .map_err(|_| ParseError::Address(s.to_string()))
}
