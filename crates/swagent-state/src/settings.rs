//! Switch-wide settings.

use crate::node::NodeFields;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use swagent_types::{IpAddress, MacAddress, VlanId};

/// A neighbor whose traffic must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockedNeighbor {
    pub vlan: VlanId,
    pub address: IpAddress,
}

/// A MAC address whose traffic must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockedMac {
    pub vlan: VlanId,
    pub mac: MacAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchSettings {
    pub blocked_neighbors: BTreeSet<BlockedNeighbor>,
    pub mac_addrs_to_block: BTreeSet<BlockedMac>,
}

impl NodeFields for SwitchSettings {}
