//! Label FIB merge and next-hop interface binding.

use super::MplsRoute;
use crate::error::{AgentError, Result};
use crate::route::{ecmp, RouteEngineConfig};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use swagent_state::route::{
    ForwardAction, ForwardInfo, LabelAction, LabelEntry, NextHop, NextHopEntry, RouteState,
};
use swagent_state::{InterfaceId, StateTree, VrfId};
use swagent_types::{AdminDistance, ClientId, IpAddress, MplsLabel};

/// Outcome of a connected-subnet lookup for one next-hop address.
#[derive(Debug, Clone, Copy)]
enum Connected {
    Via(InterfaceId),
    LocalAddress(InterfaceId),
    NotConnected,
}

/// Lookups made while processing one batch of label routes.
#[derive(Debug, Default)]
struct LookupCache {
    entries: BTreeMap<(VrfId, IpAddress), Connected>,
}

impl LookupCache {
    fn lookup(&mut self, tree: &StateTree, vrf: VrfId, addr: &IpAddress) -> Connected {
        *self.entries.entry((vrf, *addr)).or_insert_with(|| {
            match tree.connected_interface(vrf, addr) {
                Some((intf, _)) if intf.has_address(addr) => Connected::LocalAddress(intf.id),
                Some((intf, _)) => Connected::Via(intf.id),
                None => Connected::NotConnected,
            }
        })
    }
}

/// Multi-client merge for the label FIB.
///
/// Next hops without an outgoing interface are bound to the default-VRF
/// interface whose subnet holds their address when the route is accepted.
#[derive(Debug, Clone, Default)]
pub struct LabelEngine {
    config: RouteEngineConfig,
}

impl LabelEngine {
    pub fn new(config: RouteEngineConfig) -> Self {
        Self { config }
    }

    fn admin_distance_for(&self, client: ClientId) -> AdminDistance {
        self.config
            .client_admin_distances
            .get(&client)
            .copied()
            .unwrap_or_else(|| client.default_admin_distance())
    }

    pub fn add_label(&self, tree: &mut StateTree, client: ClientId, route: MplsRoute) -> Result<()> {
        self.add_labels(tree, client, vec![route])
    }

    /// # Errors
    ///
    /// `UnresolvedNextHop` if a next hop is in no connected subnet, and
    /// `Validation` if it is an interface's own address or an IPv6 link-local
    /// address without an interface. The tree is left untouched on error.
    pub fn add_labels(&self, tree: &mut StateTree, client: ClientId, routes: Vec<MplsRoute>) -> Result<()> {
        let contributions = self.contributions(tree, client, &routes)?;
        for (label, contribution) in contributions {
            self.store(tree, client, label, contribution);
        }
        self.resolve_label_fib(tree);
        Ok(())
    }

    pub fn del_label(&self, tree: &mut StateTree, client: ClientId, label: MplsLabel) -> Result<()> {
        self.del_labels(tree, client, vec![label])
    }

    /// # Errors
    ///
    /// `Validation` if any label is out of range; nothing is withdrawn then.
    pub fn del_labels(&self, tree: &mut StateTree, client: ClientId, labels: Vec<MplsLabel>) -> Result<()> {
        labels.iter().try_for_each(check_label)?;
        for label in labels {
            self.withdraw(tree, client, label);
        }
        self.resolve_label_fib(tree);
        Ok(())
    }

    /// Makes `routes` the complete set of labels `client` contributes.
    pub fn sync_label_fib(&self, tree: &mut StateTree, client: ClientId, routes: Vec<MplsRoute>) -> Result<()> {
        let contributions = self.contributions(tree, client, &routes)?;
        let wanted: BTreeSet<MplsLabel> = contributions.iter().map(|(label, _)| *label).collect();
        let stale: Vec<MplsLabel> = tree
            .label_fib()
            .iter()
            .filter(|(label, entry)| entry.has_client(&client) && !wanted.contains(*label))
            .map(|(label, _)| *label)
            .collect();

        debug!(
            "sync_label_fib client {}: {} labels, {} stale",
            client,
            contributions.len(),
            stale.len()
        );
        for label in stale {
            self.withdraw(tree, client, label);
        }
        for (label, contribution) in contributions {
            self.store(tree, client, label, contribution);
        }
        self.resolve_label_fib(tree);
        Ok(())
    }

    /// Withdraws every label `client` contributes.
    pub fn purge_client(&self, tree: &mut StateTree, client: ClientId) {
        let labels: Vec<MplsLabel> = tree
            .label_fib()
            .iter()
            .filter(|(_, entry)| entry.has_client(&client))
            .map(|(label, _)| *label)
            .collect();
        if labels.is_empty() {
            return;
        }
        debug!("purging {} labels of client {}", labels.len(), client);
        for label in labels {
            self.withdraw(tree, client, label);
        }
        self.resolve_label_fib(tree);
    }

    fn contributions(
        &self,
        tree: &StateTree,
        client: ClientId,
        routes: &[MplsRoute],
    ) -> Result<Vec<(MplsLabel, NextHopEntry)>> {
        let mut cache = LookupCache::default();
        routes
            .iter()
            .map(|route| {
                check_label(&route.label)?;
                let next_hops = route
                    .next_hops
                    .iter()
                    .map(|nh| bind_interface(tree, &mut cache, nh))
                    .collect::<Result<Vec<_>>>()?;
                let distance = route
                    .admin_distance
                    .unwrap_or_else(|| self.admin_distance_for(client));
                let mut entry = NextHopEntry::new(next_hops, distance);
                if route.admin_distance.is_some() {
                    entry = entry.explicit();
                }
                Ok((route.label, entry))
            })
            .collect()
    }

    fn store(&self, tree: &mut StateTree, client: ClientId, label: MplsLabel, contribution: NextHopEntry) {
        let unchanged = tree
            .label_fib()
            .get(&label)
            .map(|entry| entry.client(&client) == Some(&contribution));
        match unchanged {
            Some(true) => {}
            Some(false) => {
                if let Some(entry) = tree.label_fib_mut().get_mut(&label) {
                    entry.set_client(client, contribution);
                }
            }
            None => {
                let entry = LabelEntry::new(label).with_client(client, contribution);
                tree.label_fib_mut().insert(label, entry);
            }
        }
    }

    fn withdraw(&self, tree: &mut StateTree, client: ClientId, label: MplsLabel) {
        if !tree
            .label_fib()
            .get(&label)
            .is_some_and(|entry| entry.has_client(&client))
        {
            return;
        }
        let fib = tree.label_fib_mut();
        let now_empty = fib.get_mut(&label).is_some_and(|entry| {
            entry.remove_client(&client);
            entry.is_empty()
        });
        if now_empty {
            fib.remove(&label);
        }
    }

    /// Re-resolves every label, writing back only entries whose state
    /// changed.
    pub fn resolve_label_fib(&self, tree: &mut StateTree) {
        let snapshot: &StateTree = tree;
        let changes: Vec<(MplsLabel, RouteState)> = snapshot
            .label_fib()
            .iter()
            .filter_map(|(label, entry)| {
                let state = self.resolve_entry(snapshot, entry);
                (*entry.state() != state).then_some((*label, state))
            })
            .collect();
        if changes.is_empty() {
            return;
        }
        debug!("{} labels changed resolution", changes.len());
        let fib = tree.label_fib_mut();
        for (label, state) in changes {
            if let Some(entry) = fib.get_mut(&label) {
                entry.set_state(state);
            }
        }
    }

    fn resolve_entry(&self, tree: &StateTree, entry: &LabelEntry) -> RouteState {
        let Some((client, best)) = entry.best() else {
            return RouteState::Unresolved;
        };
        let mut fwd = ForwardInfo {
            client,
            admin_distance: best.admin_distance,
            action: best.action,
            next_hops: BTreeSet::new(),
            counter_id: best.counter_id.clone(),
        };
        if best.action != ForwardAction::NextHops {
            return RouteState::Resolved(fwd);
        }
        let all_resolved = best.next_hops.iter().all(|nh| {
            matches!(nh.label_action, Some(LabelAction::PopAndLookup))
                || nh
                    .interface
                    .is_some_and(|id| tree.interfaces().contains_key(&id))
        });
        if !all_resolved {
            return RouteState::Unresolved;
        }
        fwd.next_hops = ecmp::normalize(best.next_hops.clone(), self.config.max_ecmp_width);
        RouteState::Resolved(fwd)
    }
}

fn check_label(label: &MplsLabel) -> Result<()> {
    if label.is_valid() {
        Ok(())
    } else {
        Err(AgentError::validation(format!(
            "invalid value for label {}, maximum is {}",
            label,
            MplsLabel::MAX
        )))
    }
}

fn bind_interface(tree: &StateTree, cache: &mut LookupCache, nh: &NextHop) -> Result<NextHop> {
    if nh.interface.is_some() || matches!(nh.label_action, Some(LabelAction::PopAndLookup)) {
        return Ok(nh.clone());
    }
    if matches!(nh.address, IpAddress::V6(_)) && nh.address.is_link_local() {
        return Err(AgentError::validation(format!(
            "link-local next hop {} needs an interface",
            nh.address
        )));
    }
    match cache.lookup(tree, VrfId::DEFAULT, &nh.address) {
        Connected::Via(id) => Ok(nh.clone().with_interface(id)),
        Connected::LocalAddress(id) => Err(AgentError::validation(format!(
            "next hop {} is the address of {}",
            nh.address, id
        ))),
        Connected::NotConnected => Err(AgentError::UnresolvedNextHop {
            vrf: VrfId::DEFAULT,
            address: nh.address,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use swagent_state::interface::Interface;

    fn tree_with_eth0() -> StateTree {
        let mut tree = StateTree::new();
        tree.interfaces_mut().insert(
            InterfaceId::new(1),
            Interface::new(InterfaceId::new(1), "eth0", VrfId::DEFAULT)
                .with_address("10.0.0.1".parse().unwrap(), 24),
        );
        tree.publish();
        tree
    }

    fn swap_via(addr: &str, out: u32) -> NextHop {
        NextHop::new(addr.parse().unwrap()).with_label_action(LabelAction::Swap(MplsLabel::new(out)))
    }

    fn label(value: u32) -> MplsLabel {
        MplsLabel::new(value)
    }

    #[test]
    fn test_next_hop_bound_to_connected_interface() {
        let engine = LabelEngine::default();
        let mut tree = tree_with_eth0();
        engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(label(100), [swap_via("10.0.0.2", 200)]))
            .unwrap();

        let entry = tree.label_fib().get(&label(100)).unwrap();
        let fwd = entry.forward_info().unwrap();
        let nh = fwd.next_hops.iter().next().unwrap();
        assert_eq!(nh.interface, Some(InterfaceId::new(1)));
        assert_eq!(fwd.admin_distance, AdminDistance::OPENR);
    }

    #[test]
    fn test_interface_address_is_rejected() {
        let engine = LabelEngine::default();
        let mut tree = tree_with_eth0();
        let before = tree.clone();
        let err = engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(label(100), [swap_via("10.0.0.1", 200)]))
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert!(tree.ptr_eq(&before));
    }

    #[test]
    fn test_unconnected_next_hop() {
        let engine = LabelEngine::default();
        let mut tree = tree_with_eth0();
        let err = engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(label(100), [swap_via("10.9.0.2", 200)]))
            .unwrap_err();
        match err {
            AgentError::UnresolvedNextHop { vrf, address } => {
                assert_eq!(vrf, VrfId::DEFAULT);
                assert_eq!(address.to_string(), "10.9.0.2");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_link_local_needs_interface() {
        let engine = LabelEngine::default();
        let mut tree = tree_with_eth0();
        let err = engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(label(100), [swap_via("fe80::1", 200)]))
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        let bound = swap_via("fe80::1", 200).with_interface(InterfaceId::new(1));
        engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(label(100), [bound]))
            .unwrap();
        assert!(tree.label_fib().get(&label(100)).unwrap().is_resolved());
    }

    #[test]
    fn test_pop_and_lookup_needs_no_interface() {
        let engine = LabelEngine::default();
        let mut tree = tree_with_eth0();
        let pop = NextHop::new("0.0.0.0".parse().unwrap()).with_label_action(LabelAction::PopAndLookup);
        engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(label(300), [pop]))
            .unwrap();
        assert!(tree.label_fib().get(&label(300)).unwrap().is_resolved());
    }

    #[test]
    fn test_sync_and_purge_client() {
        let engine = LabelEngine::default();
        let mut tree = tree_with_eth0();
        engine
            .sync_label_fib(
                &mut tree,
                ClientId::OPENR,
                vec![
                    MplsRoute::new(label(100), [swap_via("10.0.0.2", 200)]),
                    MplsRoute::new(label(101), [swap_via("10.0.0.3", 201)]),
                ],
            )
            .unwrap();
        engine
            .add_label(&mut tree, ClientId::BGPD, MplsRoute::new(label(100), [swap_via("10.0.0.4", 400)]))
            .unwrap();
        tree.publish();
        let synced = tree.clone();

        engine
            .sync_label_fib(
                &mut tree,
                ClientId::OPENR,
                vec![
                    MplsRoute::new(label(100), [swap_via("10.0.0.2", 200)]),
                    MplsRoute::new(label(101), [swap_via("10.0.0.3", 201)]),
                ],
            )
            .unwrap();
        assert!(tree.ptr_eq(&synced));

        engine
            .sync_label_fib(
                &mut tree,
                ClientId::OPENR,
                vec![MplsRoute::new(label(101), [swap_via("10.0.0.3", 201)])],
            )
            .unwrap();
        let entry = tree.label_fib().get(&label(100)).unwrap();
        assert!(!entry.has_client(&ClientId::OPENR));
        assert!(entry.has_client(&ClientId::BGPD));

        engine.purge_client(&mut tree, ClientId::OPENR);
        let labels: Vec<u32> = tree.label_fib().keys().map(|l| l.value()).collect();
        assert_eq!(labels, vec![100]);
    }

    #[test]
    fn test_label_unresolved_when_interface_goes_away() {
        let engine = LabelEngine::default();
        let mut tree = tree_with_eth0();
        engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(label(100), [swap_via("10.0.0.2", 200)]))
            .unwrap();
        tree.interfaces_mut().remove(&InterfaceId::new(1));
        engine.resolve_label_fib(&mut tree);
        assert_eq!(*tree.label_fib().get(&label(100)).unwrap().state(), RouteState::Unresolved);
    }

    #[test]
    fn test_del_label_removes_entry() {
        let engine = LabelEngine::default();
        let mut tree = tree_with_eth0();
        engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(label(100), [swap_via("10.0.0.2", 200)]))
            .unwrap();
        engine.del_label(&mut tree, ClientId::BGPD, label(100)).unwrap();
        assert!(tree.label_fib().contains_key(&label(100)));
        engine.del_label(&mut tree, ClientId::OPENR, label(100)).unwrap();
        assert!(tree.label_fib().is_empty());
    }

    #[test]
    fn test_out_of_range_label_rejected() {
        let engine = LabelEngine::default();
        let mut tree = tree_with_eth0();
        engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(label(100), [swap_via("10.0.0.2", 200)]))
            .unwrap();
        tree.publish();
        let before = tree.clone();
        let too_big = label(MplsLabel::MAX + 1);

        let err = engine
            .add_label(&mut tree, ClientId::OPENR, MplsRoute::new(too_big, [swap_via("10.0.0.2", 200)]))
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        let err = engine
            .del_labels(&mut tree, ClientId::OPENR, vec![label(100), too_big])
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert!(tree.ptr_eq(&before));
    }
}
