//! Port collection entries.

use crate::PortId;
use serde::{Deserialize, Serialize};
use swagent_types::{AdminState, OperState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub oper_state: OperState,
    #[serde(default)]
    pub speed_mbps: u32,
}

impl Port {
    pub fn new(id: PortId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            admin_state: AdminState::Down,
            oper_state: OperState::Down,
            speed_mbps: 0,
        }
    }

    /// Up both administratively and operationally.
    pub fn is_up(&self) -> bool {
        self.admin_state.is_up() && self.oper_state.is_up()
    }
}
