//! Unicast routing: per-client route merging and next-hop resolution.

pub mod ecmp;
mod engine;
mod resolve;

pub use engine::{RouteEngine, RouteEngineConfig};
pub use resolve::{longest_match, MAX_RESOLVE_DEPTH};

use serde::{Deserialize, Serialize};
use swagent_state::route::{ForwardAction, NextHop};
use swagent_types::{AdminDistance, IpPrefix};

/// A route as a client announces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnicastRoute {
    pub prefix: IpPrefix,
    #[serde(default)]
    pub next_hops: Vec<NextHop>,
    /// Overrides the next hops with DROP or TO_CPU.
    #[serde(default)]
    pub action: Option<ForwardAction>,
    #[serde(default)]
    pub admin_distance: Option<AdminDistance>,
    #[serde(default)]
    pub counter_id: Option<String>,
}

impl UnicastRoute {
    pub fn new(prefix: IpPrefix, next_hops: impl IntoIterator<Item = NextHop>) -> Self {
        Self {
            prefix,
            next_hops: next_hops.into_iter().collect(),
            action: None,
            admin_distance: None,
            counter_id: None,
        }
    }

    pub fn with_action(mut self, action: ForwardAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_admin_distance(mut self, distance: AdminDistance) -> Self {
        self.admin_distance = Some(distance);
        self
    }
}
