use crate::hw::FibUpdateError;
use serde::Serialize;
use std::fmt;
use swagent_state::StateTree;

/// How a transaction reacts to a hardware failure that leaves it unknown
/// what was programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Keep the old tree and report the failure as fatal.
    Blocking,
    /// Roll the hardware back to the old tree and report every change as
    /// failed.
    WithHardwareFailureProtection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    #[default]
    Idle,
    Applying,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Idle => "idle",
            TransactionState::Applying => "applying",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// A new tree was published.
    Committed { generation: u64 },
    /// The update produced no difference; nothing was published.
    NoChange,
}

impl TransactionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed { .. })
    }
}

/// The tree the hardware actually holds after a partial failure: `candidate`
/// with every failed route and label put back the way `old` had it.
pub(crate) fn reconcile(mut candidate: StateTree, old: &StateTree, failed: &FibUpdateError) -> StateTree {
    for (vrf, prefix) in failed.failed_prefixes() {
        candidate.restore_route(old, vrf, prefix);
    }
    for label in failed.failed_labels() {
        candidate.restore_label(old, label);
    }
    candidate
}
