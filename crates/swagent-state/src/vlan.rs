//! VLAN collection entries.

use crate::PortId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use swagent_types::VlanId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    pub id: VlanId,
    pub name: String,
    #[serde(default)]
    pub member_ports: BTreeSet<PortId>,
}

impl Vlan {
    pub fn new(id: VlanId) -> Self {
        Self {
            id,
            name: format!("Vlan{}", id),
            member_ports: BTreeSet::new(),
        }
    }
}
