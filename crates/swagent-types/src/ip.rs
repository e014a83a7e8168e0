//! IP address and prefix types with safe parsing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IPv4 address wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv4Address(Ipv4Addr);

impl Ipv4Address {
    pub const UNSPECIFIED: Self = Ipv4Address(Ipv4Addr::UNSPECIFIED);

    /// Returns the address with every bit past `len` cleared.
    pub fn masked(&self, len: u8) -> Self {
        let bits = u32::from(self.0);
        let mask = if len == 0 { 0 } else { u32::MAX << (32 - u32::from(len.min(32))) };
        Ipv4Address(Ipv4Addr::from(bits & mask))
    }

    /// Returns true for 169.254.0.0/16.
    pub fn is_link_local(&self) -> bool {
        self.0.is_link_local()
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv4Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Ipv4Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Ipv4Address(addr)
    }
}

/// An IPv6 address wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv6Address(Ipv6Addr);

impl Ipv6Address {
    pub const UNSPECIFIED: Self = Ipv6Address(Ipv6Addr::UNSPECIFIED);

    /// Returns the address with every bit past `len` cleared.
    pub fn masked(&self, len: u8) -> Self {
        let bits = u128::from(self.0);
        let mask = if len == 0 { 0 } else { u128::MAX << (128 - u32::from(len.min(128))) };
        Ipv6Address(Ipv6Addr::from(bits & mask))
    }

    /// fe80::/10
    pub fn is_link_local(&self) -> bool {
        (self.0.segments()[0] & 0xffc0) == 0xfe80
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv6Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv6Addr>()
            .map(Ipv6Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv6Addr> for Ipv6Address {
    fn from(addr: Ipv6Addr) -> Self {
        Ipv6Address(addr)
    }
}

/// An IP address that can be either IPv4 or IPv6.
///
/// Orders all IPv4 addresses before IPv6 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpAddress {
    V4(Ipv4Address),
    V6(Ipv6Address),
}

impl IpAddress {
    pub const fn is_ipv4(&self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    pub const fn is_ipv6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// Returns 32 for IPv4 and 128 for IPv6.
    pub const fn max_prefix_len(&self) -> u8 {
        match self {
            IpAddress::V4(_) => 32,
            IpAddress::V6(_) => 128,
        }
    }

    /// Returns the network part of this address for a prefix of `len` bits.
    pub fn masked(&self, len: u8) -> Self {
        match self {
            IpAddress::V4(addr) => IpAddress::V4(addr.masked(len)),
            IpAddress::V6(addr) => IpAddress::V6(addr.masked(len)),
        }
    }

    pub fn is_link_local(&self) -> bool {
        match self {
            IpAddress::V4(addr) => addr.is_link_local(),
            IpAddress::V6(addr) => addr.is_link_local(),
        }
    }

    pub fn is_unspecified(&self) -> bool {
        match self {
            IpAddress::V4(addr) => *addr == Ipv4Address::UNSPECIFIED,
            IpAddress::V6(addr) => *addr == Ipv6Address::UNSPECIFIED,
        }
    }

    /// Returns true when both addresses belong to the same family.
    pub const fn same_family(&self, other: &IpAddress) -> bool {
        self.is_ipv4() == other.is_ipv4()
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(addr) => addr.fmt(f),
            IpAddress::V6(addr) => addr.fmt(f),
        }
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            s.parse::<Ipv6Address>().map(IpAddress::V6)
        } else {
            s.parse::<Ipv4Address>().map(IpAddress::V4)
        }
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(Ipv4Address(addr))
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(Ipv6Address(addr))
    }
}

/// An IP prefix in CIDR notation (e.g., 10.0.0.0/24 or 2001:db8::/32).
///
/// The stored address is always the network address: host bits are cleared
/// on construction, so `10.0.0.7/24` and `10.0.0.0/24` are the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    address: IpAddress,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a new IP prefix, clearing any host bits.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address type
    /// (>32 for IPv4, >128 for IPv6).
    pub fn new(address: IpAddress, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = address.max_prefix_len();
        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {} for address type",
                prefix_len, max_len
            )));
        }

        Ok(IpPrefix {
            address: address.masked(prefix_len),
            prefix_len,
        })
    }

    /// Host route covering exactly `address`.
    pub fn host(address: IpAddress) -> Self {
        IpPrefix {
            address,
            prefix_len: address.max_prefix_len(),
        }
    }

    /// `0.0.0.0/0` or `::/0`, in the family of `addr`.
    pub fn default_for(addr: &IpAddress) -> Self {
        let address = match addr {
            IpAddress::V4(_) => IpAddress::V4(Ipv4Address::UNSPECIFIED),
            IpAddress::V6(_) => IpAddress::V6(Ipv6Address::UNSPECIFIED),
        };
        IpPrefix {
            address,
            prefix_len: 0,
        }
    }

    pub const fn address(&self) -> &IpAddress {
        &self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    pub const fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    pub const fn is_host_route(&self) -> bool {
        self.prefix_len == self.address.max_prefix_len()
    }

    /// Returns true if this is the default route (0.0.0.0/0 or ::/0).
    pub fn is_default(&self) -> bool {
        self.prefix_len == 0
    }

    /// Returns true if `addr` lies inside this prefix.
    pub fn contains(&self, addr: &IpAddress) -> bool {
        self.address.same_family(addr) && addr.masked(self.prefix_len) == self.address
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: IpAddress = addr_str.parse()?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> String {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_link_local_both_families() {
        let addr = |s: &str| s.parse::<IpAddress>().unwrap();
        assert!(addr("fe80::1").is_link_local());
        assert!(addr("febf::1").is_link_local());
        assert!(!addr("fec0::1").is_link_local());
        assert!(addr("169.254.10.1").is_link_local());
        assert!(!addr("10.0.0.1").is_link_local());
    }

    #[test]
    fn test_default_for_family() {
        let v4 = IpPrefix::default_for(&"192.0.2.1".parse().unwrap());
        assert_eq!(v4.to_string(), "0.0.0.0/0");
        assert!(v4.is_default() && v4.is_ipv4());
        let v6 = IpPrefix::default_for(&"2001:db8::1".parse().unwrap());
        assert_eq!(v6.to_string(), "::/0");
        assert!(v6.contains(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_prefix_host_bits_cleared() {
        let prefix: IpPrefix = "10.0.0.77/24".parse().unwrap();
        assert_eq!(prefix.to_string(), "10.0.0.0/24");

        let v6: IpPrefix = "2001:db8::ff/64".parse().unwrap();
        assert_eq!(v6.to_string(), "2001:db8::/64");
    }

    #[test]
    fn test_prefix_contains() {
        let prefix: IpPrefix = "10.0.0.0/24".parse().unwrap();
        assert!(prefix.contains(&"10.0.0.200".parse().unwrap()));
        assert!(!prefix.contains(&"10.0.1.1".parse().unwrap()));
        assert!(!prefix.contains(&"::1".parse().unwrap()));

        let default: IpPrefix = "0.0.0.0/0".parse().unwrap();
        assert!(default.contains(&"192.0.2.1".parse().unwrap()));
        assert!(default.is_default());
    }

    #[test]
    fn test_host_route() {
        let host = IpPrefix::host("10.0.0.1".parse().unwrap());
        assert!(host.is_host_route());
        assert_eq!(host.to_string(), "10.0.0.1/32");
    }

    #[test]
    fn test_invalid_prefix_length() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("2001:db8::/129".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_v4_orders_before_v6() {
        let v4: IpAddress = "255.255.255.255".parse().unwrap();
        let v6: IpAddress = "::".parse().unwrap();
        assert!(v4 < v6);
    }

    #[test]
    fn test_prefix_serde_as_string() {
        let prefix: IpPrefix = "192.168.0.0/16".parse().unwrap();
        let json = serde_json::to_string(&prefix).unwrap();
        assert_eq!(json, "\"192.168.0.0/16\"");
        let back: IpPrefix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, prefix);
    }
}
