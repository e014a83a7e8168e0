//! ACL entries, including policy redirect to next hops.

use crate::route::NextHop;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use swagent_types::{IpAddress, IpPrefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclAction {
    #[default]
    Permit,
    Deny,
    /// Forward matching traffic to the resolved redirect next hops.
    Redirect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub name: String,
    pub priority: u32,
    #[serde(default)]
    pub action: AclAction,
    #[serde(default)]
    pub dst_prefix: Option<IpPrefix>,
    /// Addresses to redirect to, as configured.
    #[serde(default)]
    pub redirect_next_hops: Vec<IpAddress>,
    /// Forwarding next hops the redirect addresses currently resolve to.
    #[serde(default)]
    pub resolved_redirect: BTreeSet<NextHop>,
}

impl AclEntry {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            action: AclAction::Permit,
            dst_prefix: None,
            redirect_next_hops: Vec::new(),
            resolved_redirect: BTreeSet::new(),
        }
    }

    pub fn has_redirect(&self) -> bool {
        self.action == AclAction::Redirect && !self.redirect_next_hops.is_empty()
    }
}
