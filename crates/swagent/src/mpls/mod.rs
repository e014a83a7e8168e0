//! MPLS label FIB.

mod engine;

pub use engine::LabelEngine;

use serde::{Deserialize, Serialize};
use swagent_state::route::NextHop;
use swagent_types::{AdminDistance, MplsLabel};

/// A label route as a client announces it. Every next hop carries its label
/// action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MplsRoute {
    pub label: MplsLabel,
    #[serde(default)]
    pub next_hops: Vec<NextHop>,
    #[serde(default)]
    pub admin_distance: Option<AdminDistance>,
}

impl MplsRoute {
    pub fn new(label: MplsLabel, next_hops: impl IntoIterator<Item = NextHop>) -> Self {
        Self {
            label,
            next_hops: next_hops.into_iter().collect(),
            admin_distance: None,
        }
    }

    pub fn with_admin_distance(mut self, distance: AdminDistance) -> Self {
        self.admin_distance = Some(distance);
        self
    }
}
