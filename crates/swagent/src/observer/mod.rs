//! Reactions to committed state changes.
//!
//! Observers run on the coordinator's worker right after each commit, in
//! registration order. They must not block; follow-up changes go back
//! through the [`UpdateQueue`] as new transactions.

#[cfg(feature = "mod-acl-nexthop")]
mod acl_nexthop;
mod fib_logger;

#[cfg(feature = "mod-acl-nexthop")]
pub use acl_nexthop::AclNexthopObserver;
pub use fib_logger::FibChangeLogger;

use crate::coordinator::UpdateQueue;
use log::debug;
use std::fmt;
use std::sync::Arc;
use swagent_state::StateDelta;

pub trait StateObserver: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per committed transaction with the delta from the
    /// previous published tree to the new one.
    fn state_updated(&self, delta: &StateDelta, queue: &UpdateQueue);
}

#[derive(Default, Clone)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn StateObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn StateObserver>) {
        debug!("registering state observer {}", observer.name());
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify(&self, delta: &StateDelta, queue: &UpdateQueue) {
        for observer in &self.observers {
            observer.state_updated(delta, queue);
        }
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.observers.iter().map(|o| o.name()))
            .finish()
    }
}
