//! Single-writer transactional updates of the state tree.
//!
//! Every change to the switch state is a named update function run by one
//! worker task, in submission order, against the latest committed tree. The
//! worker diffs the result, validates it, programs the hardware and only then
//! publishes the new tree. Readers load the published tree without locking
//! and never see a tree the hardware has not accepted.

mod transaction;
mod validate;

pub use transaction::{TransactionOutcome, TransactionState, UpdateMode};

use crate::error::{AgentError, Result};
use crate::hw::{FibUpdateError, HardwareSync, HwSyncError};
use crate::observer::ObserverRegistry;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use arc_swap::ArcSwap;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use swagent_state::{StateDelta, StateTree};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const SOURCE: &str = "TransactionCoordinator";

/// Pure function from the latest committed tree to the desired one.
pub type UpdateFn = Box<dyn FnOnce(&StateTree) -> Result<StateTree> + Send>;

struct Update {
    name: String,
    update_fn: UpdateFn,
    mode: UpdateMode,
    reply: Option<oneshot::Sender<Result<TransactionOutcome>>>,
}

/// Handle for queueing updates without waiting for them.
///
/// Observers receive one while they are notified; anything they enqueue runs
/// after the transaction that notified them.
#[derive(Clone)]
pub struct UpdateQueue {
    tx: mpsc::UnboundedSender<Update>,
    /// Updates sent and not yet processed.
    pending: Arc<AtomicUsize>,
}

impl UpdateQueue {
    pub fn enqueue<F>(&self, name: impl Into<String>, update_fn: F, mode: UpdateMode) -> Result<()>
    where
        F: FnOnce(&StateTree) -> Result<StateTree> + Send + 'static,
    {
        self.send(Update {
            name: name.into(),
            update_fn: Box::new(update_fn),
            mode,
            reply: None,
        })
    }

    fn send(&self, update: Update) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(update).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            AgentError::QueueClosed
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("closed", &self.tx.is_closed())
            .field("pending", &self.pending())
            .finish()
    }
}

pub struct TransactionCoordinator {
    queue: UpdateQueue,
    current: Arc<ArcSwap<StateTree>>,
    state: watch::Receiver<TransactionState>,
    worker: JoinHandle<()>,
}

impl TransactionCoordinator {
    /// Publishes `initial` and spawns the worker on the current tokio
    /// runtime.
    pub fn start(initial: StateTree, hw: Arc<dyn HardwareSync>, observers: ObserverRegistry) -> Self {
        initial.publish();
        let current = Arc::new(ArcSwap::from_pointee(initial));
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TransactionState::Idle);
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            queue: tx.downgrade(),
            pending: Arc::clone(&pending),
            current: Arc::clone(&current),
            state: state_tx,
            hw,
            observers,
        };
        info!(
            "starting state update worker with {} observers",
            worker.observers.len()
        );
        let handle = tokio::spawn(worker.run(rx));

        Self {
            queue: UpdateQueue { tx, pending },
            current,
            state: state_rx,
            worker: handle,
        }
    }

    /// Runs `update_fn` as one transaction and waits for it to commit or
    /// roll back.
    ///
    /// # Errors
    ///
    /// Whatever `update_fn` returns, `Validation` for a structurally invalid
    /// result, `HardwareProgram` after a partial (or protected fatal)
    /// hardware failure, `HardwareFatal` after a fatal failure in blocking
    /// mode, and `QueueClosed` if the worker is gone.
    pub async fn submit<F>(&self, name: impl Into<String>, update_fn: F, mode: UpdateMode) -> Result<TransactionOutcome>
    where
        F: FnOnce(&StateTree) -> Result<StateTree> + Send + 'static,
    {
        let (reply, done) = oneshot::channel();
        self.queue.send(Update {
            name: name.into(),
            update_fn: Box::new(update_fn),
            mode,
            reply: Some(reply),
        })?;
        done.await.map_err(|_| AgentError::QueueClosed)?
    }

    pub fn enqueue<F>(&self, name: impl Into<String>, update_fn: F, mode: UpdateMode) -> Result<()>
    where
        F: FnOnce(&StateTree) -> Result<StateTree> + Send + 'static,
    {
        self.queue.enqueue(name, update_fn, mode)
    }

    /// Latest published tree.
    pub fn current(&self) -> Arc<StateTree> {
        self.current.load_full()
    }

    /// State of the most recent transaction.
    pub fn state(&self) -> TransactionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TransactionState> {
        self.state.clone()
    }

    /// Waits until every update queued so far has been processed, including
    /// follow-ups queued by observers along the way.
    pub async fn flush(&self) -> Result<()> {
        loop {
            let outcome = self
                .submit("flush", |tree: &StateTree| Ok(tree.clone()), UpdateMode::Blocking)
                .await?;
            if outcome == TransactionOutcome::NoChange && self.queue.pending() == 0 {
                return Ok(());
            }
        }
    }

    /// Stops accepting updates, drains the queue and waits for the worker.
    pub async fn shutdown(self) {
        let TransactionCoordinator { queue, worker, .. } = self;
        drop(queue);
        if let Err(e) = worker.await {
            error!("state update worker failed: {}", e);
        }
    }
}

struct Worker {
    queue: mpsc::WeakUnboundedSender<Update>,
    pending: Arc<AtomicUsize>,
    current: Arc<ArcSwap<StateTree>>,
    state: watch::Sender<TransactionState>,
    hw: Arc<dyn HardwareSync>,
    observers: ObserverRegistry,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Update>) {
        while let Some(update) = rx.recv().await {
            let Update {
                name,
                update_fn,
                mode,
                reply,
            } = update;
            let result = self.process(&name, update_fn, mode).await;
            self.pending.fetch_sub(1, Ordering::SeqCst);
            match reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(e) = result {
                        warn!("queued update {} failed: {}", name, e);
                    }
                }
            }
        }
        info!("state update queue closed, worker exiting");
    }

    async fn process(&self, name: &str, update_fn: UpdateFn, mode: UpdateMode) -> Result<TransactionOutcome> {
        let old = self.current.load_full();
        let candidate = update_fn(old.as_ref()).inspect_err(|e| debug!("update {} rejected: {}", name, e))?;

        let delta = StateDelta::new(&old, &candidate);
        if delta.is_empty() {
            debug!("update {} changed nothing", name);
            return Ok(TransactionOutcome::NoChange);
        }
        if let Err(e) = validate::validate(&delta) {
            crate::audit_log!(AuditRecord::new(AuditCategory::ConfigurationChange, SOURCE, name)
                .with_outcome(AuditOutcome::Denied)
                .with_error(&e));
            return Err(e);
        }

        self.set_state(TransactionState::Applying);
        match self.hw.apply(&delta).await {
            Ok(()) => {
                let generation = self.commit(name, &old, candidate);
                Ok(TransactionOutcome::Committed { generation })
            }
            Err(HwSyncError::Partial(failed)) => {
                warn!("update {} partially failed in hardware: {}", name, failed);
                crate::audit_log!(AuditRecord::new(AuditCategory::HardwareFailure, SOURCE, name)
                    .with_error(&failed)
                    .with_details(serde_json::to_value(&failed).unwrap_or_default()));
                let applied = transaction::reconcile(candidate, &old, &failed);
                if StateDelta::new(&old, &applied).is_empty() {
                    self.set_state(TransactionState::RolledBack);
                } else {
                    self.commit(name, &old, applied);
                }
                Err(AgentError::HardwareProgram(failed))
            }
            Err(HwSyncError::Fatal(reason)) => {
                error!("update {} failed fatally in hardware: {}", name, reason);
                crate::audit_log!(AuditRecord::new(AuditCategory::HardwareFailure, SOURCE, name)
                    .with_error(&reason)
                    .with_details(serde_json::json!({ "mode": mode })));
                let result = match mode {
                    UpdateMode::WithHardwareFailureProtection => {
                        if let Err(e) = self.hw.rollback(&delta).await {
                            error!("hardware rollback of {} failed: {}", name, e);
                        }
                        Err(AgentError::HardwareProgram(FibUpdateError::all_failed(&delta)))
                    }
                    UpdateMode::Blocking => Err(AgentError::HardwareFatal(reason)),
                };
                self.set_state(TransactionState::RolledBack);
                crate::audit_log!(AuditRecord::new(AuditCategory::StateRollback, SOURCE, name)
                    .with_outcome(AuditOutcome::Success)
                    .with_generation(old.generation()));
                result
            }
        }
    }

    /// Publishes `tree`, makes it current and notifies observers.
    fn commit(&self, name: &str, old: &StateTree, tree: StateTree) -> u64 {
        tree.publish();
        let generation = tree.generation();
        let delta = StateDelta::new(old, &tree);
        self.current.store(Arc::new(tree));
        self.set_state(TransactionState::Committed);

        let fib_changes = delta.fib_changes().len();
        let label_changes = delta.label_changes().len();
        debug!(
            "committed {} as generation {} ({} route, {} label changes)",
            name, generation, fib_changes, label_changes
        );
        crate::audit_log!(AuditRecord::new(AuditCategory::StateCommit, SOURCE, name)
            .with_outcome(AuditOutcome::Success)
            .with_generation(generation)
            .with_details(serde_json::json!({
                "route_changes": fib_changes,
                "label_changes": label_changes,
            })));

        match self.queue.upgrade() {
            Some(tx) => {
                let queue = UpdateQueue {
                    tx,
                    pending: Arc::clone(&self.pending),
                };
                self.observers.notify(&delta, &queue);
            }
            None => debug!("queue closing, observers not notified of {}", name),
        }
        generation
    }

    fn set_state(&self, state: TransactionState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::SimulatedAsic;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use swagent_state::route::{ForwardInfo, NextHop, NextHopEntry, RouteEntry, RouteState};
    use swagent_state::{InterfaceId, VrfId};
    use swagent_types::{AdminDistance, ClientId, IpPrefix};

    fn resolved_route(prefix: &str) -> RouteEntry {
        let nh = NextHop::new("10.0.0.2".parse().unwrap());
        let mut entry = RouteEntry::new(prefix.parse().unwrap())
            .with_client(ClientId::BGPD, NextHopEntry::new([nh.clone()], AdminDistance::EBGP));
        entry.set_state(RouteState::Resolved(ForwardInfo {
            client: ClientId::BGPD,
            admin_distance: AdminDistance::EBGP,
            action: Default::default(),
            next_hops: [nh].into_iter().collect(),
            counter_id: None,
        }));
        entry
    }

    fn add(prefixes: &'static [&'static str]) -> impl FnOnce(&StateTree) -> Result<StateTree> + Send + 'static {
        move |tree: &StateTree| {
            let mut tree = tree.clone();
            for prefix in prefixes {
                let prefix: IpPrefix = prefix.parse().unwrap();
                tree.route_table_mut(VrfId::DEFAULT)
                    .insert(prefix, resolved_route(&prefix.to_string()));
            }
            Ok(tree)
        }
    }

    fn start(asic: &Arc<SimulatedAsic>) -> TransactionCoordinator {
        TransactionCoordinator::start(StateTree::new(), asic.clone(), ObserverRegistry::new())
    }

    #[tokio::test]
    async fn test_commit_publishes_new_tree() {
        let asic = Arc::new(SimulatedAsic::new());
        let coordinator = start(&asic);
        let before = coordinator.current();

        let outcome = coordinator
            .submit("add", add(&["10.1.0.0/24"]), UpdateMode::WithHardwareFailureProtection)
            .await
            .unwrap();
        assert!(outcome.is_committed());

        let after = coordinator.current();
        assert!(after.is_published());
        assert!(before.route_table(VrfId::DEFAULT).unwrap().is_empty());
        assert_eq!(after.route_table(VrfId::DEFAULT).unwrap().len(), 1);
        assert_eq!(asic.route_count().await, 1);
        assert_eq!(coordinator.state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_unchanged_tree_skips_hardware() {
        let asic = Arc::new(SimulatedAsic::new());
        let coordinator = start(&asic);
        let outcome = coordinator
            .submit("noop", |tree: &StateTree| Ok(tree.clone()), UpdateMode::Blocking)
            .await
            .unwrap();
        assert_eq!(outcome, TransactionOutcome::NoChange);
        assert_eq!(asic.apply_calls().await, 0);
    }

    #[tokio::test]
    async fn test_update_error_leaves_state() {
        let asic = Arc::new(SimulatedAsic::new());
        let coordinator = start(&asic);
        let before = coordinator.current();
        let err = coordinator
            .submit(
                "bad",
                |_: &StateTree| Err(AgentError::validation("no")),
                UpdateMode::Blocking,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert!(coordinator.current().ptr_eq(&before));
    }

    #[tokio::test]
    async fn test_partial_failure_commits_the_rest() {
        let asic = Arc::new(SimulatedAsic::new());
        asic.fail_prefix("10.2.0.0/24".parse().unwrap()).await;
        let coordinator = start(&asic);

        let err = coordinator
            .submit(
                "add",
                add(&["10.1.0.0/24", "10.2.0.0/24", "10.3.0.0/24"]),
                UpdateMode::WithHardwareFailureProtection,
            )
            .await
            .unwrap_err();
        let AgentError::HardwareProgram(failed) = err else {
            panic!("expected a hardware programming error");
        };
        assert_eq!(
            failed.vrf_failed_add_update[&VrfId::DEFAULT],
            vec!["10.2.0.0/24".parse::<IpPrefix>().unwrap()]
        );
        let table_len = coordinator.current().route_table(VrfId::DEFAULT).unwrap().len();
        assert_eq!(table_len, 2);
        assert_eq!(asic.route_count().await, 2);
    }

    #[tokio::test]
    async fn test_fatal_failure_modes() {
        let asic = Arc::new(SimulatedAsic::new());
        let coordinator = start(&asic);
        let before = coordinator.current();

        asic.fail_next_apply_fatally().await;
        let err = coordinator
            .submit("blocking", add(&["10.1.0.0/24"]), UpdateMode::Blocking)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::HardwareFatal(_)));
        assert!(coordinator.current().ptr_eq(&before));
        assert_eq!(coordinator.state(), TransactionState::RolledBack);

        asic.fail_next_apply_fatally().await;
        let err = coordinator
            .submit("protected", add(&["10.1.0.0/24"]), UpdateMode::WithHardwareFailureProtection)
            .await
            .unwrap_err();
        let AgentError::HardwareProgram(failed) = err else {
            panic!("expected a hardware programming error");
        };
        assert_eq!(failed.total(), 1);
        assert!(coordinator.current().ptr_eq(&before));
        assert_eq!(asic.route_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_next_hop_rejected_before_hardware() {
        let asic = Arc::new(SimulatedAsic::new());
        let coordinator = start(&asic);
        let err = coordinator
            .submit(
                "bad_interface",
                |tree: &StateTree| {
                    let mut tree = tree.clone();
                    let nh = NextHop::new("10.0.0.2".parse().unwrap()).with_interface(InterfaceId::new(9));
                    let entry = RouteEntry::new("10.1.0.0/24".parse().unwrap())
                        .with_client(ClientId::BGPD, NextHopEntry::new([nh], AdminDistance::EBGP));
                    tree.route_table_mut(VrfId::DEFAULT)
                        .insert("10.1.0.0/24".parse().unwrap(), entry);
                    Ok(tree)
                },
                UpdateMode::Blocking,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert_eq!(asic.apply_calls().await, 0);
    }

    #[tokio::test]
    async fn test_updates_run_in_order() {
        let asic = Arc::new(SimulatedAsic::new());
        let coordinator = start(&asic);
        coordinator
            .enqueue("first", add(&["10.1.0.0/24"]), UpdateMode::Blocking)
            .unwrap();
        let outcome = coordinator
            .submit(
                "second",
                |tree: &StateTree| {
                    // runs after "first" committed
                    assert_eq!(tree.route_table(VrfId::DEFAULT).unwrap().len(), 1);
                    Ok(tree.clone())
                },
                UpdateMode::Blocking,
            )
            .await
            .unwrap();
        assert_eq!(outcome, TransactionOutcome::NoChange);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let asic = Arc::new(SimulatedAsic::new());
        let coordinator = start(&asic);
        coordinator
            .enqueue("add", add(&["10.1.0.0/24"]), UpdateMode::Blocking)
            .unwrap();
        coordinator.shutdown().await;
        assert_eq!(asic.route_count().await, 1);
    }

    /// Holds every apply until released.
    struct GatedAsic {
        inner: SimulatedAsic,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl HardwareSync for GatedAsic {
        async fn apply(&self, delta: &StateDelta) -> std::result::Result<(), HwSyncError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.apply(delta).await
        }

        async fn rollback(&self, delta: &StateDelta) -> std::result::Result<(), HwSyncError> {
            self.inner.rollback(delta).await
        }
    }

    #[tokio::test]
    async fn test_readers_see_committed_tree_while_applying() {
        let asic = Arc::new(GatedAsic {
            inner: SimulatedAsic::new(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let coordinator = Arc::new(TransactionCoordinator::start(
            StateTree::new(),
            asic.clone(),
            ObserverRegistry::new(),
        ));
        let before = coordinator.current();

        let writer = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .submit("add", add(&["10.1.0.0/24"]), UpdateMode::Blocking)
                    .await
            })
        };
        asic.entered.notified().await;

        assert_eq!(coordinator.state(), TransactionState::Applying);
        let during = coordinator.current();
        assert!(during.ptr_eq(&before));
        assert!(during.route_table(VrfId::DEFAULT).unwrap().is_empty());

        asic.release.notify_one();
        let outcome = writer.await.unwrap().unwrap();
        assert!(outcome.is_committed());
        assert_eq!(coordinator.current().route_table(VrfId::DEFAULT).unwrap().len(), 1);
        assert!(before.route_table(VrfId::DEFAULT).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_submitters_are_serialized() {
        const WRITERS: usize = 8;
        let asic = Arc::new(SimulatedAsic::new());
        let coordinator = Arc::new(start(&asic));
        let start_generation = coordinator.current().generation();
        // (writer, routes seen when its update ran), in execution order
        let runs = Arc::new(Mutex::new(Vec::new()));

        let writers: Vec<_> = (0..WRITERS)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                let runs = Arc::clone(&runs);
                tokio::spawn(async move {
                    let outcome = coordinator
                        .submit(
                            format!("writer{}", i),
                            move |tree: &StateTree| {
                                let seen = tree.route_table(VrfId::DEFAULT).map_or(0, |t| t.len());
                                runs.lock().unwrap().push((i, seen));
                                let prefix: IpPrefix = format!("10.{}.0.0/24", i).parse().unwrap();
                                let mut tree = tree.clone();
                                tree.route_table_mut(VrfId::DEFAULT)
                                    .insert(prefix, resolved_route(&prefix.to_string()));
                                Ok(tree)
                            },
                            UpdateMode::WithHardwareFailureProtection,
                        )
                        .await
                        .unwrap();
                    (i, outcome)
                })
            })
            .collect();

        let mut generations = BTreeMap::new();
        for writer in writers {
            let (i, outcome) = writer.await.unwrap();
            let TransactionOutcome::Committed { generation } = outcome else {
                panic!("writer {} did not commit", i);
            };
            generations.insert(i, generation);
        }

        let runs = runs.lock().unwrap().clone();
        assert_eq!(runs.len(), WRITERS);
        for (position, (writer, seen)) in runs.iter().enumerate() {
            // every update saw all earlier commits and nothing else
            assert_eq!(*seen, position);
            assert_eq!(generations[writer], start_generation + position as u64 + 1);
        }
        assert_eq!(coordinator.current().route_table(VrfId::DEFAULT).unwrap().len(), WRITERS);
        assert_eq!(asic.route_count().await, WRITERS);
    }
}
