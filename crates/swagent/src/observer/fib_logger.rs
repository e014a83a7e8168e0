//! Route update logging.

use super::StateObserver;
use crate::coordinator::UpdateQueue;
use crate::hw::describe;
use log::info;
use swagent_state::route::ForwardInfo;
use swagent_state::{ForwardChange, StateDelta};
use swagent_types::IpPrefix;

/// Logs a one-line summary of every committed forwarding change, plus each
/// change to a prefix covered by one of the tracked prefixes.
#[derive(Debug, Clone, Default)]
pub struct FibChangeLogger {
    tracked: Vec<IpPrefix>,
}

impl FibChangeLogger {
    pub fn new(tracked: impl IntoIterator<Item = IpPrefix>) -> Self {
        Self {
            tracked: tracked.into_iter().collect(),
        }
    }

    pub fn is_tracked(&self, prefix: &IpPrefix) -> bool {
        self.tracked.iter().any(|t| {
            t.prefix_len() <= prefix.prefix_len() && t.contains(prefix.address())
        })
    }
}

fn next_hops(fwd: &ForwardInfo) -> String {
    if fwd.next_hops.is_empty() {
        return format!("{:?}", fwd.action);
    }
    fwd.next_hops
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl StateObserver for FibChangeLogger {
    fn name(&self) -> &str {
        "FibChangeLogger"
    }

    fn state_updated(&self, delta: &StateDelta, _queue: &UpdateQueue) {
        let routes = delta.fib_changes();
        let labels = delta.label_changes();
        if routes.is_empty() && labels.is_empty() {
            return;
        }
        info!(
            "generation {}: {} route changes, {} label changes",
            delta.new_state().generation(),
            routes.len(),
            labels.len()
        );
        for change in routes.iter().filter(|c| self.is_tracked(&c.prefix)) {
            let detail = match &change.change {
                ForwardChange::Add(fwd) => next_hops(fwd),
                ForwardChange::Update { old, new } => format!("{} -> {}", next_hops(old), next_hops(new)),
                ForwardChange::Remove(fwd) => next_hops(fwd),
            };
            info!(
                "route {} {} in {} via {}",
                describe(&change.change),
                change.prefix,
                change.vrf,
                detail
            );
        }
    }
}
