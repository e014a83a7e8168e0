//! Next-hop resolution for one VRF.
//!
//! Resolution is a pure function of the route table and the interfaces of
//! the VRF. Each route picks its winning contribution, then every next hop of
//! that contribution must resolve to an outgoing interface, either named
//! explicitly, inferred from a connected subnet, or reached recursively
//! through another resolved route.

use super::ecmp;
use std::collections::{BTreeMap, BTreeSet};
use swagent_state::route::{ForwardAction, ForwardInfo, NextHop, RouteEntry, RouteState};
use swagent_state::{RouteTable, StateTree, VrfId};
use swagent_types::{IpAddress, IpPrefix};

/// Recursive lookups deeper than this leave the route unresolved.
pub const MAX_RESOLVE_DEPTH: usize = 32;

pub(crate) struct Resolver<'a> {
    tree: &'a StateTree,
    vrf: VrfId,
    table: &'a RouteTable,
    max_ecmp_width: usize,
    memo: BTreeMap<IpPrefix, Option<ForwardInfo>>,
    /// Prefixes on the current lookup chain, with their depth.
    in_progress: BTreeMap<IpPrefix, usize>,
    /// Shallowest chain depth a cycle guard pointed back to while resolving
    /// the current subtree.
    cycle_floor: Option<usize>,
    truncated: bool,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        tree: &'a StateTree,
        vrf: VrfId,
        table: &'a RouteTable,
        max_ecmp_width: usize,
    ) -> Self {
        Self {
            tree,
            vrf,
            table,
            max_ecmp_width,
            memo: BTreeMap::new(),
            in_progress: BTreeMap::new(),
            cycle_floor: None,
            truncated: false,
        }
    }

    /// Resolves every route of the table, returning the entries whose state
    /// differs from what the table holds.
    pub(crate) fn changed_states(mut self) -> Vec<(IpPrefix, RouteState)> {
        let mut changed = Vec::new();
        let table = self.table;
        for (prefix, entry) in table.iter() {
            let state = match self.resolve_prefix(prefix, 0) {
                Some(fwd) => RouteState::Resolved(fwd),
                None => RouteState::Unresolved,
            };
            if *entry.state() != state {
                changed.push((*prefix, state));
            }
        }
        changed
    }

    fn resolve_prefix(&mut self, prefix: &IpPrefix, depth: usize) -> Option<ForwardInfo> {
        if let Some(done) = self.memo.get(prefix) {
            return done.clone();
        }
        if let Some(&at) = self.in_progress.get(prefix) {
            self.cycle_floor = Some(self.cycle_floor.map_or(at, |floor| floor.min(at)));
            return None;
        }
        if depth > MAX_RESOLVE_DEPTH {
            self.truncated = true;
            return None;
        }

        let outer_floor = self.cycle_floor.take();
        self.in_progress.insert(*prefix, depth);
        let table = self.table;
        let result = table
            .get(prefix)
            .and_then(|entry| self.resolve_entry(entry, depth));
        self.in_progress.remove(prefix);

        // A result reached through a cycle into a prefix still on the chain
        // is only final once that prefix finishes.
        let inner_floor = self.cycle_floor.filter(|&floor| floor < depth);
        if inner_floor.is_none() && !self.truncated {
            self.memo.insert(*prefix, result.clone());
        }
        self.cycle_floor = match (outer_floor, inner_floor) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        result
    }

    fn resolve_entry(&mut self, entry: &RouteEntry, depth: usize) -> Option<ForwardInfo> {
        let (client, best) = entry.best()?;
        let mut fwd = ForwardInfo {
            client,
            admin_distance: best.admin_distance,
            action: best.action,
            next_hops: BTreeSet::new(),
            counter_id: best.counter_id.clone(),
        };
        if best.action != ForwardAction::NextHops {
            return Some(fwd);
        }
        if best.next_hops.is_empty() {
            fwd.action = ForwardAction::Drop;
            return Some(fwd);
        }

        let mut resolved = BTreeSet::new();
        for nh in &best.next_hops {
            resolved.extend(self.resolve_next_hop(nh, entry.prefix(), depth)?);
        }
        fwd.next_hops = ecmp::normalize(resolved, self.max_ecmp_width);
        Some(fwd)
    }

    fn resolve_next_hop(
        &mut self,
        nh: &NextHop,
        own_prefix: &IpPrefix,
        depth: usize,
    ) -> Option<Vec<NextHop>> {
        if let Some(intf_id) = nh.interface {
            let intf = self.tree.interfaces().get(&intf_id)?;
            return (intf.vrf == self.vrf).then(|| vec![nh.clone()]);
        }

        if let Some((intf, _)) = self.tree.connected_interface(self.vrf, &nh.address) {
            if intf.has_address(&nh.address) {
                return None;
            }
            return Some(vec![nh.clone().with_interface(intf.id)]);
        }

        let via = self.longest_other(&nh.address, own_prefix)?;
        match self.resolve_prefix(&via, depth + 1) {
            Some(fwd) if fwd.action == ForwardAction::NextHops => Some(inherit(nh, fwd.next_hops)),
            _ => None,
        }
    }

    /// Longest route of the table other than `own_prefix` covering `addr`,
    /// whatever its resolution state.
    fn longest_other(&self, addr: &IpAddress, own_prefix: &IpPrefix) -> Option<IpPrefix> {
        (0..=addr.max_prefix_len()).rev().find_map(|len| {
            let candidate = IpPrefix::new(*addr, len).ok()?;
            (candidate != *own_prefix && self.table.contains_key(&candidate)).then_some(candidate)
        })
    }
}

/// Next hops reached recursively keep the weight and label action of the
/// next hop that pointed at them, when it set any.
fn inherit(origin: &NextHop, via: BTreeSet<NextHop>) -> Vec<NextHop> {
    via.into_iter()
        .map(|mut nh| {
            if origin.weight != 0 {
                nh.weight = origin.weight;
            }
            if origin.label_action.is_some() {
                nh.label_action = origin.label_action.clone();
            }
            nh
        })
        .collect()
}

/// Longest resolved route in `vrf` covering `addr`.
pub fn longest_match<'t>(tree: &'t StateTree, vrf: VrfId, addr: &IpAddress) -> Option<&'t RouteEntry> {
    let table = tree.route_table(vrf)?;
    (0..=addr.max_prefix_len()).rev().find_map(|len| {
        let prefix = IpPrefix::new(*addr, len).ok()?;
        table.get(&prefix).filter(|entry| entry.is_resolved())
    })
}
