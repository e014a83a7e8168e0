//! In-memory ASIC model.

use super::{describe, FibUpdateError, HardwareSync, HwSyncError};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use swagent_state::route::ForwardInfo;
use swagent_state::{ForwardChange, StateDelta, VrfId};
use swagent_types::{IpPrefix, MplsLabel};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct AsicTables {
    routes: BTreeMap<(VrfId, IpPrefix), ForwardInfo>,
    labels: BTreeMap<MplsLabel, ForwardInfo>,
    failing_prefixes: BTreeSet<IpPrefix>,
    failing_labels: BTreeSet<MplsLabel>,
    fatal_next_apply: bool,
    apply_calls: usize,
}

/// Route and label tables held in memory, with a route capacity and
/// injectable failures.
#[derive(Debug, Default)]
pub struct SimulatedAsic {
    route_capacity: Option<usize>,
    tables: Mutex<AsicTables>,
}

impl SimulatedAsic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total routes across all VRFs the model accepts.
    pub fn with_route_capacity(mut self, capacity: usize) -> Self {
        self.route_capacity = Some(capacity);
        self
    }

    /// Every add, update or delete of `prefix` fails until cleared.
    pub async fn fail_prefix(&self, prefix: IpPrefix) {
        self.tables.lock().await.failing_prefixes.insert(prefix);
    }

    pub async fn fail_label(&self, label: MplsLabel) {
        self.tables.lock().await.failing_labels.insert(label);
    }

    /// The next `apply` fails without telling what was programmed.
    pub async fn fail_next_apply_fatally(&self) {
        self.tables.lock().await.fatal_next_apply = true;
    }

    pub async fn clear_failures(&self) {
        let mut tables = self.tables.lock().await;
        tables.failing_prefixes.clear();
        tables.failing_labels.clear();
        tables.fatal_next_apply = false;
    }

    pub async fn programmed_route(&self, vrf: VrfId, prefix: &IpPrefix) -> Option<ForwardInfo> {
        self.tables.lock().await.routes.get(&(vrf, *prefix)).cloned()
    }

    pub async fn programmed_label(&self, label: MplsLabel) -> Option<ForwardInfo> {
        self.tables.lock().await.labels.get(&label).cloned()
    }

    pub async fn route_count(&self) -> usize {
        self.tables.lock().await.routes.len()
    }

    pub async fn label_count(&self) -> usize {
        self.tables.lock().await.labels.len()
    }

    pub async fn apply_calls(&self) -> usize {
        self.tables.lock().await.apply_calls
    }
}

#[async_trait]
impl HardwareSync for SimulatedAsic {
    async fn apply(&self, delta: &StateDelta) -> Result<(), HwSyncError> {
        let mut tables = self.tables.lock().await;
        tables.apply_calls += 1;
        if std::mem::take(&mut tables.fatal_next_apply) {
            return Err(HwSyncError::Fatal("simulated ASIC lost sync".to_string()));
        }

        let mut failures = FibUpdateError::default();
        for change in delta.fib_changes() {
            let key = (change.vrf, change.prefix);
            debug!("asic: {} route {} {}", describe(&change.change), change.vrf, change.prefix);
            if tables.failing_prefixes.contains(&change.prefix) {
                if change.change.is_removal() {
                    failures.fail_delete(change.vrf, change.prefix);
                } else {
                    failures.fail_add_update(change.vrf, change.prefix);
                }
                continue;
            }
            match change.change {
                ForwardChange::Remove(_) => {
                    tables.routes.remove(&key);
                }
                ForwardChange::Add(fwd) | ForwardChange::Update { new: fwd, .. } => {
                    let is_new = !tables.routes.contains_key(&key);
                    let full = self
                        .route_capacity
                        .is_some_and(|cap| tables.routes.len() >= cap);
                    if is_new && full {
                        warn!("asic: route table full, rejecting {} {}", change.vrf, change.prefix);
                        failures.fail_add_update(change.vrf, change.prefix);
                        continue;
                    }
                    tables.routes.insert(key, fwd.clone());
                }
            }
        }

        for change in delta.label_changes() {
            if tables.failing_labels.contains(&change.label) {
                if change.change.is_removal() {
                    failures.failed_delete_labels.push(change.label);
                } else {
                    failures.failed_add_update_labels.push(change.label);
                }
                continue;
            }
            match change.change {
                ForwardChange::Remove(_) => {
                    tables.labels.remove(&change.label);
                }
                ForwardChange::Add(fwd) | ForwardChange::Update { new: fwd, .. } => {
                    tables.labels.insert(change.label, fwd.clone());
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HwSyncError::Partial(failures))
        }
    }

    async fn rollback(&self, delta: &StateDelta) -> Result<(), HwSyncError> {
        let mut tables = self.tables.lock().await;
        for change in delta.fib_changes() {
            let key = (change.vrf, change.prefix);
            match change.change {
                ForwardChange::Add(_) => {
                    tables.routes.remove(&key);
                }
                ForwardChange::Remove(old) | ForwardChange::Update { old, .. } => {
                    tables.routes.insert(key, old.clone());
                }
            }
        }
        for change in delta.label_changes() {
            match change.change {
                ForwardChange::Add(_) => {
                    tables.labels.remove(&change.label);
                }
                ForwardChange::Remove(old) | ForwardChange::Update { old, .. } => {
                    tables.labels.insert(change.label, old.clone());
                }
            }
        }
        Ok(())
    }
}
