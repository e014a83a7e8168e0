//! Multi-client unicast route engine.

use super::resolve::Resolver;
use super::UnicastRoute;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use swagent_state::route::{NextHopEntry, RouteEntry};
use swagent_state::{StateTree, VrfId};
use swagent_types::{AdminDistance, ClientId, IpPrefix};

#[derive(Debug, Clone)]
pub struct RouteEngineConfig {
    pub max_ecmp_width: usize,
    /// Per-client admin distance used when a route does not carry one.
    pub client_admin_distances: BTreeMap<ClientId, AdminDistance>,
}

impl Default for RouteEngineConfig {
    fn default() -> Self {
        Self {
            max_ecmp_width: 64,
            client_admin_distances: BTreeMap::new(),
        }
    }
}

/// Merges per-client route contributions into each VRF's route table.
///
/// Every operation edits the candidate tree it is given and finishes by
/// re-resolving the touched VRF.
#[derive(Debug, Clone, Default)]
pub struct RouteEngine {
    config: RouteEngineConfig,
}

impl RouteEngine {
    pub fn new(config: RouteEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouteEngineConfig {
        &self.config
    }

    pub fn admin_distance_for(&self, client: ClientId) -> AdminDistance {
        self.config
            .client_admin_distances
            .get(&client)
            .copied()
            .unwrap_or_else(|| client.default_admin_distance())
    }

    /// Turns a client route into the contribution stored in the table.
    pub fn contribution(&self, client: ClientId, route: &UnicastRoute) -> NextHopEntry {
        let distance = route
            .admin_distance
            .unwrap_or_else(|| self.admin_distance_for(client));
        let mut entry = match route.action {
            Some(action) => NextHopEntry::with_action(action, distance),
            None => NextHopEntry::new(route.next_hops.iter().cloned(), distance),
        };
        if route.admin_distance.is_some() {
            entry = entry.explicit();
        }
        entry.counter_id = route.counter_id.clone();
        entry
    }

    pub fn add_route(
        &self,
        tree: &mut StateTree,
        vrf: VrfId,
        client: ClientId,
        route: UnicastRoute,
    ) {
        self.add_routes(tree, vrf, client, vec![route])
    }

    pub fn add_routes(
        &self,
        tree: &mut StateTree,
        vrf: VrfId,
        client: ClientId,
        routes: Vec<UnicastRoute>,
    ) {
        for route in &routes {
            self.store(tree, vrf, client, route);
        }
        self.resolve_vrf(tree, vrf);
    }

    /// Withdraws `prefix` for `client`; a no-op if the client never
    /// contributed it.
    pub fn del_route(
        &self,
        tree: &mut StateTree,
        vrf: VrfId,
        client: ClientId,
        prefix: IpPrefix,
    ) {
        self.del_routes(tree, vrf, client, vec![prefix])
    }

    pub fn del_routes(
        &self,
        tree: &mut StateTree,
        vrf: VrfId,
        client: ClientId,
        prefixes: Vec<IpPrefix>,
    ) {
        for prefix in &prefixes {
            self.withdraw(tree, vrf, client, prefix);
        }
        self.finish(tree, vrf);
    }

    /// Makes `routes` the complete set `client` contributes to `vrf`.
    ///
    /// Only the difference against the client's previous set is applied, so
    /// replaying the same set changes nothing.
    pub fn sync_fib(
        &self,
        tree: &mut StateTree,
        vrf: VrfId,
        client: ClientId,
        routes: Vec<UnicastRoute>,
    ) {
        let wanted: BTreeSet<IpPrefix> = routes.iter().map(|r| r.prefix).collect();
        let stale: Vec<IpPrefix> = tree
            .route_table(vrf)
            .map(|table| {
                table
                    .iter()
                    .filter(|(prefix, entry)| entry.has_client(&client) && !wanted.contains(*prefix))
                    .map(|(prefix, _)| *prefix)
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            "sync_fib {} client {}: {} routes, {} stale",
            vrf,
            client,
            routes.len(),
            stale.len()
        );
        for prefix in &stale {
            self.withdraw(tree, vrf, client, prefix);
        }
        for route in &routes {
            self.store(tree, vrf, client, route);
        }
        self.finish(tree, vrf);
    }

    fn store(&self, tree: &mut StateTree, vrf: VrfId, client: ClientId, route: &UnicastRoute) {
        let contribution = self.contribution(client, route);
        let existing = tree
            .route_table(vrf)
            .and_then(|table| table.get(&route.prefix))
            .map(|entry| entry.client(&client) == Some(&contribution));
        match existing {
            Some(true) => {}
            Some(false) => {
                if let Some(entry) = tree.route_table_mut(vrf).get_mut(&route.prefix) {
                    entry.set_client(client, contribution);
                }
            }
            None => {
                let entry = RouteEntry::new(route.prefix).with_client(client, contribution);
                tree.route_table_mut(vrf).insert(route.prefix, entry);
            }
        }
    }

    fn withdraw(&self, tree: &mut StateTree, vrf: VrfId, client: ClientId, prefix: &IpPrefix) {
        let contributed = tree
            .route_table(vrf)
            .and_then(|table| table.get(prefix))
            .is_some_and(|entry| entry.has_client(&client));
        if !contributed {
            return;
        }
        let table = tree.route_table_mut(vrf);
        let now_empty = table.get_mut(prefix).is_some_and(|entry| {
            entry.remove_client(&client);
            entry.is_empty()
        });
        if now_empty {
            table.remove(prefix);
        }
    }

    fn finish(&self, tree: &mut StateTree, vrf: VrfId) {
        let empty = tree.route_table(vrf).is_some_and(|table| table.is_empty());
        if empty && tree.remove_route_table(vrf) {
            debug!("removed empty route table of {}", vrf);
            return;
        }
        self.resolve_vrf(tree, vrf);
    }

    /// Re-resolves every route of `vrf`, writing back only entries whose
    /// forwarding state changed.
    pub fn resolve_vrf(&self, tree: &mut StateTree, vrf: VrfId) {
        let snapshot: &StateTree = tree;
        let changes = match snapshot.route_table(vrf) {
            Some(table) => {
                Resolver::new(snapshot, vrf, table, self.config.max_ecmp_width).changed_states()
            }
            None => return,
        };
        if changes.is_empty() {
            return;
        }
        debug!("{}: {} routes changed resolution", vrf, changes.len());
        let table = tree.route_table_mut(vrf);
        for (prefix, state) in changes {
            if let Some(entry) = table.get_mut(&prefix) {
                entry.set_state(state);
            }
        }
    }

    /// Re-resolves every VRF, e.g. after interfaces changed.
    pub fn resolve_all(&self, tree: &mut StateTree) {
        let vrfs: Vec<VrfId> = tree.vrfs().collect();
        for vrf in vrfs {
            self.resolve_vrf(tree, vrf);
        }
    }
}
