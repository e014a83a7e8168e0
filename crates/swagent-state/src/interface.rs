//! Routed interfaces and their connected subnets.

use crate::{InterfaceId, VrfId};
use serde::{Deserialize, Serialize};
use swagent_types::{IpAddress, IpPrefix, MacAddress, VlanId};

/// One address configured on an interface, with the length of its subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub address: IpAddress,
    pub prefix_len: u8,
}

impl InterfaceAddress {
    pub fn new(address: IpAddress, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
        }
    }

    /// Connected subnet of this address, if the length is valid for its family.
    pub fn subnet(&self) -> Option<IpPrefix> {
        IpPrefix::new(self.address, self.prefix_len).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    #[serde(default)]
    pub vrf: VrfId,
    #[serde(default)]
    pub vlan: Option<VlanId>,
    #[serde(default)]
    pub mac: Option<MacAddress>,
    #[serde(default)]
    pub addresses: Vec<InterfaceAddress>,
}

impl Interface {
    pub fn new(id: InterfaceId, name: impl Into<String>, vrf: VrfId) -> Self {
        Self {
            id,
            name: name.into(),
            vrf,
            vlan: None,
            mac: None,
            addresses: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: IpAddress, prefix_len: u8) -> Self {
        self.addresses.push(InterfaceAddress::new(address, prefix_len));
        self
    }

    /// Returns the connected subnet of this interface that contains `addr`.
    ///
    /// When several subnets match, the longest one wins.
    pub fn subnet_containing(&self, addr: &IpAddress) -> Option<IpPrefix> {
        self.addresses
            .iter()
            .filter_map(InterfaceAddress::subnet)
            .filter(|subnet| subnet.contains(addr))
            .max_by_key(IpPrefix::prefix_len)
    }

    /// True if `addr` is one of this interface's own addresses.
    pub fn has_address(&self, addr: &IpAddress) -> bool {
        self.addresses.iter().any(|a| a.address == *addr)
    }
}
