//! Client-facing API of the agent.
//!
//! Every mutating call maps to one engine operation inside one transaction.
//! Reads work on the current published tree and never wait for the writer.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::coordinator::{TransactionCoordinator, TransactionOutcome, UpdateMode};
use crate::error::{AgentError, Result};
#[cfg(feature = "mod-mpls")]
use crate::mpls::{LabelEngine, MplsRoute};
use crate::route::{longest_match, RouteEngine, RouteEngineConfig, UnicastRoute};
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swagent_state::interface::Interface;
use swagent_state::route::{ForwardAction, ForwardInfo, MultiClientEntry, NextHop, NextHopEntry, RouteEntry};
#[cfg(feature = "mod-mpls")]
use swagent_state::route::LabelEntry;
use swagent_state::settings::{BlockedMac, BlockedNeighbor};
use swagent_state::{InterfaceId, PersistedState, StateTree, VrfId};
use swagent_types::{AdminDistance, ClientId, IpAddress, IpPrefix};
#[cfg(feature = "mod-mpls")]
use swagent_types::MplsLabel;

const SOURCE: &str = "SwitchHandler";

/// Resolved forwarding entry as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnicastRouteInfo {
    pub prefix: IpPrefix,
    pub action: ForwardAction,
    pub next_hops: Vec<NextHop>,
    pub client: Option<ClientId>,
    pub admin_distance: Option<AdminDistance>,
    pub counter_id: Option<String>,
}

impl UnicastRouteInfo {
    fn from_forward(prefix: IpPrefix, fwd: &ForwardInfo) -> Self {
        Self {
            prefix,
            action: fwd.action,
            next_hops: fwd.next_hops.iter().cloned().collect(),
            client: Some(fwd.client),
            admin_distance: Some(fwd.admin_distance),
            counter_id: fwd.counter_id.clone(),
        }
    }

    /// Answer for an address no route covers.
    fn no_route(addr: &IpAddress) -> Self {
        Self {
            prefix: IpPrefix::default_for(addr),
            action: ForwardAction::Drop,
            next_hops: Vec::new(),
            client: None,
            admin_distance: None,
            counter_id: None,
        }
    }
}

/// Every client contribution of one entry plus what it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryDetails<K> {
    pub key: K,
    pub clients: BTreeMap<ClientId, NextHopEntry>,
    pub forward: Option<ForwardInfo>,
}

pub type RouteDetails = EntryDetails<IpPrefix>;
#[cfg(feature = "mod-mpls")]
pub type LabelDetails = EntryDetails<MplsLabel>;

impl<K: Clone> EntryDetails<K> {
    fn of(entry: &MultiClientEntry<K>) -> Self {
        Self {
            key: entry.key.clone(),
            clients: entry.clients().clone(),
            forward: entry.forward_info().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceDetail {
    pub interface: Interface,
    pub connected_subnets: Vec<IpPrefix>,
    /// Resolved routes of the interface's VRF forwarding out of it.
    pub routes_via: usize,
}

fn client_route(prefix: IpPrefix, nhe: &NextHopEntry) -> UnicastRoute {
    UnicastRoute {
        prefix,
        next_hops: nhe.next_hops.iter().cloned().collect(),
        action: (nhe.action != ForwardAction::NextHops).then_some(nhe.action),
        admin_distance: nhe.admin_distance_explicit.then_some(nhe.admin_distance),
        counter_id: nhe.counter_id.clone(),
    }
}

pub struct SwitchHandler {
    coordinator: TransactionCoordinator,
    routes: Arc<RouteEngine>,
    #[cfg(feature = "mod-mpls")]
    labels: Arc<LabelEngine>,
    configured: AtomicBool,
}

impl SwitchHandler {
    pub fn new(coordinator: TransactionCoordinator, config: RouteEngineConfig) -> Self {
        Self {
            coordinator,
            #[cfg(feature = "mod-mpls")]
            labels: Arc::new(LabelEngine::new(config.clone())),
            routes: Arc::new(RouteEngine::new(config)),
            configured: AtomicBool::new(false),
        }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// Drains queued updates and stops the coordinator.
    pub async fn shutdown(self) {
        self.coordinator.shutdown().await;
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    /// Opens the client API once the initial state is in place.
    pub fn mark_configured(&self) {
        if !self.configured.swap(true, Ordering::AcqRel) {
            info!("switch configured, accepting client requests");
            crate::audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "configured")
                .with_outcome(AuditOutcome::Success)
                .with_generation(self.coordinator.current().generation()));
        }
    }

    fn ensure_configured(&self, op: &str) -> Result<()> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(AgentError::ConfigurationNotReady(format!("{} called before initial configuration", op)))
        }
    }

    /// Generation of the current published tree. Always available.
    pub fn generation(&self) -> u64 {
        self.coordinator.current().generation()
    }

    /// Replaces the whole state with `tree`, e.g. from config or a warm boot
    /// snapshot. Allowed before configuration completes.
    pub async fn load_state(&self, name: &str, tree: StateTree) -> Result<TransactionOutcome> {
        self.coordinator
            .submit(
                name,
                move |current: &StateTree| {
                    let mut next = current.clone();
                    next.replace_with(&tree);
                    Ok(next)
                },
                UpdateMode::Blocking,
            )
            .await
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let current = self.coordinator.current();
        let result = PersistedState::capture(&current).save(path);
        let record = AuditRecord::new(AuditCategory::WarmBoot, SOURCE, "save_snapshot")
            .with_object_id(path.display().to_string())
            .with_generation(current.generation());
        match &result {
            Ok(()) => crate::audit_log!(record.with_outcome(AuditOutcome::Success)),
            Err(e) => crate::audit_log!(record.with_error(e)),
        }
        Ok(result?)
    }

    async fn run_routes<F>(&self, name: &str, mode: UpdateMode, op: F) -> Result<TransactionOutcome>
    where
        F: FnOnce(&RouteEngine, &mut StateTree) + Send + 'static,
    {
        self.ensure_configured(name)?;
        let engine = Arc::clone(&self.routes);
        self.coordinator
            .submit(
                name,
                move |tree: &StateTree| {
                    let mut tree = tree.clone();
                    op(engine.as_ref(), &mut tree);
                    Ok(tree)
                },
                mode,
            )
            .await
    }

    pub async fn add_unicast_route(&self, client: ClientId, route: UnicastRoute) -> Result<TransactionOutcome> {
        self.add_unicast_routes(VrfId::DEFAULT, client, vec![route]).await
    }

    pub async fn add_unicast_routes(
        &self,
        vrf: VrfId,
        client: ClientId,
        routes: Vec<UnicastRoute>,
    ) -> Result<TransactionOutcome> {
        self.ensure_configured("add_unicast_routes")?;
        for route in &routes {
            if let Some(nh) = route
                .next_hops
                .iter()
                .find(|nh| !nh.address.same_family(route.prefix.address()))
            {
                return Err(AgentError::validation(format!(
                    "next hop {} does not match the family of {}",
                    nh.address, route.prefix
                )));
            }
        }
        self.run_routes("add_unicast_routes", UpdateMode::WithHardwareFailureProtection, move |engine, tree| {
            engine.add_routes(tree, vrf, client, routes)
        })
        .await
    }

    pub async fn delete_unicast_route(&self, client: ClientId, prefix: IpPrefix) -> Result<TransactionOutcome> {
        self.delete_unicast_routes(VrfId::DEFAULT, client, vec![prefix]).await
    }

    pub async fn delete_unicast_routes(
        &self,
        vrf: VrfId,
        client: ClientId,
        prefixes: Vec<IpPrefix>,
    ) -> Result<TransactionOutcome> {
        self.run_routes("delete_unicast_routes", UpdateMode::Blocking, move |engine, tree| {
            engine.del_routes(tree, vrf, client, prefixes)
        })
        .await
    }

    pub async fn sync_fib(&self, vrf: VrfId, client: ClientId, routes: Vec<UnicastRoute>) -> Result<TransactionOutcome> {
        self.run_routes("sync_fib", UpdateMode::WithHardwareFailureProtection, move |engine, tree| {
            engine.sync_fib(tree, vrf, client, routes)
        })
        .await
    }

    /// Resolved routes of `vrf`; unresolved entries are left out.
    pub fn route_table(&self, vrf: VrfId) -> Result<Vec<UnicastRouteInfo>> {
        self.ensure_configured("route_table")?;
        let tree = self.coordinator.current();
        Ok(tree
            .route_table(vrf)
            .map(|table| {
                table
                    .iter()
                    .filter_map(|(prefix, entry)| {
                        entry
                            .forward_info()
                            .map(|fwd| UnicastRouteInfo::from_forward(*prefix, fwd))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// What `client` announced in `vrf`, resolved or not.
    pub fn route_table_by_client(&self, vrf: VrfId, client: ClientId) -> Result<Vec<UnicastRoute>> {
        self.ensure_configured("route_table_by_client")?;
        let tree = self.coordinator.current();
        Ok(tree
            .route_table(vrf)
            .map(|table| {
                table
                    .iter()
                    .filter_map(|(prefix, entry)| entry.client(&client).map(|nhe| client_route(*prefix, nhe)))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Every route of `vrf` with all client contributions, unresolved ones
    /// included.
    pub fn route_table_details(&self, vrf: VrfId) -> Result<Vec<RouteDetails>> {
        self.ensure_configured("route_table_details")?;
        let tree = self.coordinator.current();
        Ok(tree
            .route_table(vrf)
            .map(|table| table.values().map(EntryDetails::of).collect())
            .unwrap_or_default())
    }

    /// Longest-match lookup; a default route with no next hops if nothing
    /// covers `addr`.
    pub fn ip_route(&self, vrf: VrfId, addr: IpAddress) -> Result<UnicastRouteInfo> {
        self.ensure_configured("ip_route")?;
        let tree = self.coordinator.current();
        match longest_match(&tree, vrf, &addr).and_then(|entry: &RouteEntry| {
            entry
                .forward_info()
                .map(|fwd| UnicastRouteInfo::from_forward(*entry.prefix(), fwd))
        }) {
            Some(info) => Ok(info),
            None => Ok(UnicastRouteInfo::no_route(&addr)),
        }
    }

    pub fn interfaces(&self) -> Result<Vec<Interface>> {
        self.ensure_configured("interfaces")?;
        Ok(self.coordinator.current().interfaces().values().cloned().collect())
    }

    pub fn interface_detail(&self, id: InterfaceId) -> Result<Option<InterfaceDetail>> {
        self.ensure_configured("interface_detail")?;
        let tree = self.coordinator.current();
        let Some(intf) = tree.interfaces().get(&id) else {
            return Ok(None);
        };
        let routes_via = tree
            .route_table(intf.vrf)
            .map(|table| {
                table
                    .values()
                    .filter_map(|entry| entry.forward_info())
                    .filter(|fwd| fwd.next_hops.iter().any(|nh| nh.interface == Some(id)))
                    .count()
            })
            .unwrap_or(0);
        Ok(Some(InterfaceDetail {
            connected_subnets: intf.addresses.iter().filter_map(|a| a.subnet()).collect(),
            interface: intf.clone(),
            routes_via,
        }))
    }

    /// Replaces the blocked neighbor list. Rejected while MAC addresses are
    /// blocked.
    pub async fn set_neighbors_to_block(&self, neighbors: Vec<BlockedNeighbor>) -> Result<TransactionOutcome> {
        self.ensure_configured("set_neighbors_to_block")?;
        let count = neighbors.len();
        let result = self
            .coordinator
            .submit(
                "set_neighbors_to_block",
                move |tree: &StateTree| {
                    if !neighbors.is_empty() && !tree.switch_settings().mac_addrs_to_block.is_empty() {
                        return Err(AgentError::validation(
                            "cannot block neighbors while MAC addresses are blocked",
                        ));
                    }
                    let mut tree = tree.clone();
                    tree.switch_settings_mut().blocked_neighbors = neighbors.into_iter().collect();
                    Ok(tree)
                },
                UpdateMode::Blocking,
            )
            .await;
        audit_settings("set_neighbors_to_block", count, &result);
        result
    }

    /// Replaces the blocked MAC list. Rejected while neighbors are blocked.
    pub async fn set_mac_addrs_to_block(&self, macs: Vec<BlockedMac>) -> Result<TransactionOutcome> {
        self.ensure_configured("set_mac_addrs_to_block")?;
        let count = macs.len();
        let result = self
            .coordinator
            .submit(
                "set_mac_addrs_to_block",
                move |tree: &StateTree| {
                    if !macs.is_empty() && !tree.switch_settings().blocked_neighbors.is_empty() {
                        return Err(AgentError::validation(
                            "cannot block MAC addresses while neighbors are blocked",
                        ));
                    }
                    let mut tree = tree.clone();
                    tree.switch_settings_mut().mac_addrs_to_block = macs.into_iter().collect();
                    Ok(tree)
                },
                UpdateMode::Blocking,
            )
            .await;
        audit_settings("set_mac_addrs_to_block", count, &result);
        result
    }

    pub fn neighbors_to_block(&self) -> Result<Vec<BlockedNeighbor>> {
        self.ensure_configured("neighbors_to_block")?;
        Ok(self
            .coordinator
            .current()
            .switch_settings()
            .blocked_neighbors
            .iter()
            .copied()
            .collect())
    }

    pub fn mac_addrs_to_block(&self) -> Result<Vec<BlockedMac>> {
        self.ensure_configured("mac_addrs_to_block")?;
        Ok(self
            .coordinator
            .current()
            .switch_settings()
            .mac_addrs_to_block
            .iter()
            .copied()
            .collect())
    }
}

fn audit_settings(action: &str, count: usize, result: &Result<TransactionOutcome>) {
    let record = AuditRecord::new(AuditCategory::AdminAction, SOURCE, action)
        .with_details(serde_json::json!({ "entries": count }));
    match result {
        Ok(_) => crate::audit_log!(record.with_outcome(AuditOutcome::Success)),
        Err(AgentError::Validation(msg)) => crate::audit_log!(record.with_error(msg).with_outcome(AuditOutcome::Denied)),
        Err(e) => crate::audit_log!(record.with_error(e)),
    }
}

#[cfg(feature = "mod-mpls")]
impl SwitchHandler {
    async fn run_labels<F>(&self, name: &str, mode: UpdateMode, op: F) -> Result<TransactionOutcome>
    where
        F: FnOnce(&LabelEngine, &mut StateTree) -> Result<()> + Send + 'static,
    {
        self.ensure_configured(name)?;
        let engine = Arc::clone(&self.labels);
        self.coordinator
            .submit(
                name,
                move |tree: &StateTree| {
                    let mut tree = tree.clone();
                    op(engine.as_ref(), &mut tree)?;
                    Ok(tree)
                },
                mode,
            )
            .await
    }

    pub async fn add_mpls_routes(&self, client: ClientId, routes: Vec<MplsRoute>) -> Result<TransactionOutcome> {
        self.run_labels("add_mpls_routes", UpdateMode::WithHardwareFailureProtection, move |engine, tree| {
            engine.add_labels(tree, client, routes)
        })
        .await
    }

    pub async fn delete_mpls_routes(&self, client: ClientId, labels: Vec<MplsLabel>) -> Result<TransactionOutcome> {
        self.run_labels("delete_mpls_routes", UpdateMode::Blocking, move |engine, tree| {
            engine.del_labels(tree, client, labels)
        })
        .await
    }

    pub async fn sync_mpls_fib(&self, client: ClientId, routes: Vec<MplsRoute>) -> Result<TransactionOutcome> {
        self.run_labels("sync_mpls_fib", UpdateMode::WithHardwareFailureProtection, move |engine, tree| {
            engine.sync_label_fib(tree, client, routes)
        })
        .await
    }

    pub fn mpls_route_table_by_client(&self, client: ClientId) -> Result<Vec<MplsRoute>> {
        self.ensure_configured("mpls_route_table_by_client")?;
        let tree = self.coordinator.current();
        Ok(tree
            .label_fib()
            .iter()
            .filter_map(|(label, entry)| {
                entry.client(&client).map(|nhe| MplsRoute {
                    label: *label,
                    next_hops: nhe.next_hops.iter().cloned().collect(),
                    admin_distance: nhe.admin_distance_explicit.then_some(nhe.admin_distance),
                })
            })
            .collect())
    }

    pub fn mpls_route_details(&self, label: MplsLabel) -> Result<Option<LabelDetails>> {
        self.ensure_configured("mpls_route_details")?;
        Ok(self
            .coordinator
            .current()
            .label_fib()
            .get(&label)
            .map(|entry: &LabelEntry| EntryDetails::of(entry)))
    }

    pub fn all_mpls_route_details(&self) -> Result<Vec<LabelDetails>> {
        self.ensure_configured("all_mpls_route_details")?;
        Ok(self
            .coordinator
            .current()
            .label_fib()
            .values()
            .map(EntryDetails::of)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::SimulatedAsic;
    use crate::observer::ObserverRegistry;
    use pretty_assertions::assert_eq;

    fn handler() -> SwitchHandler {
        let coordinator = TransactionCoordinator::start(
            StateTree::new(),
            Arc::new(SimulatedAsic::new()),
            ObserverRegistry::new(),
        );
        SwitchHandler::new(coordinator, RouteEngineConfig::default())
    }

    #[tokio::test]
    async fn test_calls_rejected_until_configured() {
        let handler = handler();
        let route = UnicastRoute::new("10.0.0.0/24".parse().unwrap(), Vec::new());
        let err = handler.add_unicast_route(ClientId::BGPD, route).await.unwrap_err();
        assert!(matches!(err, AgentError::ConfigurationNotReady(_)));
        assert!(matches!(
            handler.route_table(VrfId::DEFAULT),
            Err(AgentError::ConfigurationNotReady(_))
        ));
        assert_eq!(handler.generation(), 0);

        handler.mark_configured();
        assert!(handler.route_table(VrfId::DEFAULT).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ip_route_without_match() {
        let handler = handler();
        handler.mark_configured();
        let info = handler.ip_route(VrfId::DEFAULT, "192.0.2.1".parse().unwrap()).unwrap();
        assert_eq!(info.prefix.to_string(), "0.0.0.0/0");
        assert!(info.next_hops.is_empty());
        let info = handler.ip_route(VrfId::DEFAULT, "2001:db8::1".parse().unwrap()).unwrap();
        assert_eq!(info.prefix.to_string(), "::/0");
    }

    #[tokio::test]
    async fn test_family_mismatch_rejected() {
        let handler = handler();
        let route = UnicastRoute::new(
            "10.0.0.0/24".parse().unwrap(),
            [NextHop::new("2001:db8::1".parse().unwrap())],
        );
        // readiness is checked before the route itself
        let err = handler.add_unicast_route(ClientId::BGPD, route.clone()).await.unwrap_err();
        assert!(matches!(err, AgentError::ConfigurationNotReady(_)));

        handler.mark_configured();
        let err = handler.add_unicast_route(ClientId::BGPD, route).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_block_lists_are_exclusive() {
        let handler = handler();
        handler.mark_configured();
        let neighbor = BlockedNeighbor {
            vlan: swagent_types::VlanId::new(10).unwrap(),
            address: "10.0.0.9".parse().unwrap(),
        };
        let mac = BlockedMac {
            vlan: swagent_types::VlanId::new(10).unwrap(),
            mac: "00:11:22:33:44:55".parse().unwrap(),
        };
        handler.set_neighbors_to_block(vec![neighbor]).await.unwrap();
        let err = handler.set_mac_addrs_to_block(vec![mac]).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert_eq!(handler.neighbors_to_block().unwrap(), vec![neighbor]);

        handler.set_neighbors_to_block(Vec::new()).await.unwrap();
        handler.set_mac_addrs_to_block(vec![mac]).await.unwrap();
        assert_eq!(handler.mac_addrs_to_block().unwrap(), vec![mac]);
        assert!(handler.neighbors_to_block().unwrap().is_empty());
    }
}
