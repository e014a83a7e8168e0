//! Hardware programming seam.
//!
//! The coordinator hands every non-empty [`StateDelta`] to a [`HardwareSync`]
//! implementation and reconciles the committed state with what it reports
//! back. The engines never see this layer.

mod simulated;

pub use simulated::SimulatedAsic;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use swagent_state::{ForwardChange, StateDelta, VrfId};
use swagent_types::{IpPrefix, MplsLabel};
use thiserror::Error;

/// Entries the hardware failed to program, by VRF and by label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FibUpdateError {
    pub vrf_failed_add_update: BTreeMap<VrfId, Vec<IpPrefix>>,
    pub vrf_failed_delete: BTreeMap<VrfId, Vec<IpPrefix>>,
    pub failed_add_update_labels: Vec<MplsLabel>,
    pub failed_delete_labels: Vec<MplsLabel>,
}

impl FibUpdateError {
    /// Every forwarding change in `delta`, reported as failed.
    pub fn all_failed(delta: &StateDelta) -> Self {
        let mut err = FibUpdateError::default();
        for change in delta.fib_changes() {
            if change.change.is_removal() {
                err.fail_delete(change.vrf, change.prefix);
            } else {
                err.fail_add_update(change.vrf, change.prefix);
            }
        }
        for change in delta.label_changes() {
            if change.change.is_removal() {
                err.failed_delete_labels.push(change.label);
            } else {
                err.failed_add_update_labels.push(change.label);
            }
        }
        err
    }

    pub fn fail_add_update(&mut self, vrf: VrfId, prefix: IpPrefix) {
        self.vrf_failed_add_update.entry(vrf).or_default().push(prefix);
    }

    pub fn fail_delete(&mut self, vrf: VrfId, prefix: IpPrefix) {
        self.vrf_failed_delete.entry(vrf).or_default().push(prefix);
    }

    pub fn failed_prefixes(&self) -> impl Iterator<Item = (VrfId, &IpPrefix)> {
        self.vrf_failed_add_update
            .iter()
            .chain(self.vrf_failed_delete.iter())
            .flat_map(|(vrf, prefixes)| prefixes.iter().map(move |p| (*vrf, p)))
    }

    pub fn failed_labels(&self) -> impl Iterator<Item = MplsLabel> + '_ {
        self.failed_add_update_labels
            .iter()
            .chain(self.failed_delete_labels.iter())
            .copied()
    }

    pub fn total(&self) -> usize {
        self.failed_prefixes().count() + self.failed_labels().count()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for FibUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes_add: usize = self.vrf_failed_add_update.values().map(Vec::len).sum();
        let routes_del: usize = self.vrf_failed_delete.values().map(Vec::len).sum();
        write!(
            f,
            "{} route add/update, {} route delete, {} label add/update, {} label delete failures",
            routes_add,
            routes_del,
            self.failed_add_update_labels.len(),
            self.failed_delete_labels.len()
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum HwSyncError {
    /// The hardware applied everything except the listed entries.
    #[error("partial hardware failure: {0}")]
    Partial(FibUpdateError),

    /// The hardware cannot tell what it applied.
    #[error("fatal hardware failure: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait HardwareSync: Send + Sync {
    /// Programs the transition from `delta`'s old state to its new state.
    async fn apply(&self, delta: &StateDelta) -> Result<(), HwSyncError>;

    /// Restores the hardware to `delta`'s old state after a fatal failure.
    async fn rollback(&self, delta: &StateDelta) -> Result<(), HwSyncError>;
}

/// Short form of one forwarding change for logs.
pub(crate) fn describe(change: &ForwardChange<'_>) -> &'static str {
    match change {
        ForwardChange::Add(_) => "add",
        ForwardChange::Update { .. } => "update",
        ForwardChange::Remove(_) => "remove",
    }
}
