//! Common types for the switch agent control plane.
//!
//! This crate provides type-safe representations of the network primitives
//! shared by the state tree and the route/label engines:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`IpAddress`]: IPv4 and IPv6 addresses
//! - [`IpPrefix`]: canonical IP network prefixes (CIDR notation)
//! - [`AdminState`] / [`OperState`]: port states
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`MplsLabel`]: 20-bit MPLS labels
//! - [`ClientId`] / [`AdminDistance`]: route announcement sources and their priority

mod client;
mod ip;
mod label;
mod mac;
mod port;
mod vlan;

pub use client::{AdminDistance, ClientId};
pub use ip::{IpAddress, IpPrefix, Ipv4Address, Ipv6Address};
pub use label::MplsLabel;
pub use mac::MacAddress;
pub use port::{AdminState, OperState};
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid MPLS label: {0}")]
    InvalidLabel(String),

    #[error("invalid port state: {0}")]
    InvalidPortState(String),
}
