//! Route and label entries.
//!
//! A unicast route and an MPLS label entry share the same shape: every client
//! that announced the key contributes one [`NextHopEntry`], and the entry
//! carries the forwarding state resolved from the winning contribution.

use crate::InterfaceId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use swagent_types::{AdminDistance, ClientId, IpAddress, IpPrefix, MplsLabel};

/// What a label switch router does with the top label before forwarding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelAction {
    Swap(MplsLabel),
    Push(Vec<MplsLabel>),
    PopAndLookup,
    Php,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NextHop {
    pub address: IpAddress,
    #[serde(default)]
    pub interface: Option<InterfaceId>,
    /// 0 marks a plain ECMP member; non-zero weights make the set UCMP.
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub label_action: Option<LabelAction>,
}

impl NextHop {
    pub fn new(address: IpAddress) -> Self {
        Self {
            address,
            interface: None,
            weight: 0,
            label_action: None,
        }
    }

    pub fn with_interface(mut self, interface: InterfaceId) -> Self {
        self.interface = Some(interface);
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_label_action(mut self, action: LabelAction) -> Self {
        self.label_action = Some(action);
        self
    }

    /// A next hop that names its outgoing interface needs no lookup.
    pub fn is_resolved(&self) -> bool {
        self.interface.is_some()
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(intf) = self.interface {
            write!(f, "@{}", intf)?;
        }
        if self.weight != 0 {
            write!(f, " weight {}", self.weight)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardAction {
    #[default]
    NextHops,
    Drop,
    ToCpu,
}

/// One client's contribution to a route or label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextHopEntry {
    #[serde(default)]
    pub next_hops: BTreeSet<NextHop>,
    #[serde(default)]
    pub action: ForwardAction,
    pub admin_distance: AdminDistance,
    /// Set when the client supplied the distance rather than inheriting the
    /// per-client default.
    #[serde(default)]
    pub admin_distance_explicit: bool,
    #[serde(default)]
    pub counter_id: Option<String>,
}

impl NextHopEntry {
    /// Forward to `next_hops`; an empty set means drop.
    pub fn new(next_hops: impl IntoIterator<Item = NextHop>, admin_distance: AdminDistance) -> Self {
        let next_hops: BTreeSet<NextHop> = next_hops.into_iter().collect();
        let action = if next_hops.is_empty() {
            ForwardAction::Drop
        } else {
            ForwardAction::NextHops
        };
        Self {
            next_hops,
            action,
            admin_distance,
            admin_distance_explicit: false,
            counter_id: None,
        }
    }

    pub fn with_action(action: ForwardAction, admin_distance: AdminDistance) -> Self {
        Self {
            next_hops: BTreeSet::new(),
            action,
            admin_distance,
            admin_distance_explicit: false,
            counter_id: None,
        }
    }

    pub fn explicit(mut self) -> Self {
        self.admin_distance_explicit = true;
        self
    }

    pub fn with_counter(mut self, counter_id: impl Into<String>) -> Self {
        self.counter_id = Some(counter_id.into());
        self
    }
}

/// Forwarding state programmed to hardware for one route or label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardInfo {
    pub client: ClientId,
    pub admin_distance: AdminDistance,
    pub action: ForwardAction,
    #[serde(default)]
    pub next_hops: BTreeSet<NextHop>,
    #[serde(default)]
    pub counter_id: Option<String>,
}

impl ForwardInfo {
    pub fn drop(client: ClientId, admin_distance: AdminDistance) -> Self {
        Self {
            client,
            admin_distance,
            action: ForwardAction::Drop,
            next_hops: BTreeSet::new(),
            counter_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "forward")]
pub enum RouteState {
    Resolved(ForwardInfo),
    #[default]
    Unresolved,
}

/// Entry keyed by prefix or label, merging every client's contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiClientEntry<K> {
    pub key: K,
    #[serde(default)]
    clients: BTreeMap<ClientId, NextHopEntry>,
    #[serde(default)]
    state: RouteState,
}

pub type RouteEntry = MultiClientEntry<IpPrefix>;
pub type LabelEntry = MultiClientEntry<MplsLabel>;

impl<K> MultiClientEntry<K> {
    pub fn new(key: K) -> Self {
        Self {
            key,
            clients: BTreeMap::new(),
            state: RouteState::Unresolved,
        }
    }

    pub fn with_client(mut self, client: ClientId, entry: NextHopEntry) -> Self {
        self.clients.insert(client, entry);
        self
    }

    pub fn clients(&self) -> &BTreeMap<ClientId, NextHopEntry> {
        &self.clients
    }

    pub fn client(&self, client: &ClientId) -> Option<&NextHopEntry> {
        self.clients.get(client)
    }

    pub fn has_client(&self, client: &ClientId) -> bool {
        self.clients.contains_key(client)
    }

    /// Stores `entry` for `client`; returns false if it was already there.
    pub fn set_client(&mut self, client: ClientId, entry: NextHopEntry) -> bool {
        if self.clients.get(&client) == Some(&entry) {
            return false;
        }
        self.clients.insert(client, entry);
        true
    }

    pub fn remove_client(&mut self, client: &ClientId) -> Option<NextHopEntry> {
        self.clients.remove(client)
    }

    /// True once the last contribution has been withdrawn.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Winning contribution: lowest admin distance, ties broken by lowest
    /// client id.
    pub fn best(&self) -> Option<(ClientId, &NextHopEntry)> {
        self.clients
            .iter()
            .min_by_key(|(client, entry)| (entry.admin_distance, **client))
            .map(|(client, entry)| (*client, entry))
    }

    pub fn state(&self) -> &RouteState {
        &self.state
    }

    pub fn set_state(&mut self, state: RouteState) {
        self.state = state;
    }

    pub fn forward_info(&self) -> Option<&ForwardInfo> {
        match &self.state {
            RouteState::Resolved(fwd) => Some(fwd),
            RouteState::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, RouteState::Resolved(_))
    }
}

impl RouteEntry {
    pub fn prefix(&self) -> &IpPrefix {
        &self.key
    }
}

impl LabelEntry {
    pub fn label(&self) -> MplsLabel {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nh(addr: &str) -> NextHop {
        NextHop::new(addr.parse().unwrap())
    }

    #[test]
    fn test_best_by_distance_then_client() {
        let entry = RouteEntry::new("10.0.0.0/24".parse().unwrap())
            .with_client(
                ClientId::OPENR,
                NextHopEntry::new([nh("10.1.0.1")], AdminDistance::new(10)),
            )
            .with_client(
                ClientId::BGPD,
                NextHopEntry::new([nh("10.1.0.2")], AdminDistance::new(10)),
            )
            .with_client(
                ClientId::STATIC_ROUTE,
                NextHopEntry::new([nh("10.1.0.3")], AdminDistance::new(20)),
            );

        let (winner, _) = entry.best().unwrap();
        assert_eq!(winner, ClientId::BGPD);
    }

    #[test]
    fn test_set_client_reports_change() {
        let mut entry = LabelEntry::new(MplsLabel::new(100));
        let contribution = NextHopEntry::new([nh("10.0.0.2")], AdminDistance::OPENR);
        assert!(entry.set_client(ClientId::OPENR, contribution.clone()));
        assert!(!entry.set_client(ClientId::OPENR, contribution));
        assert_eq!(entry.label().value(), 100);
    }

    #[test]
    fn test_empty_next_hops_means_drop() {
        let entry = NextHopEntry::new(Vec::new(), AdminDistance::STATIC_ROUTE);
        assert_eq!(entry.action, ForwardAction::Drop);
    }

    #[test]
    fn test_entry_empty_after_last_client() {
        let mut entry = RouteEntry::new("10.0.0.0/24".parse().unwrap()).with_client(
            ClientId::BGPD,
            NextHopEntry::new([nh("10.1.0.1")], AdminDistance::EBGP),
        );
        assert!(entry.remove_client(&ClientId::OPENR).is_none());
        assert!(!entry.is_empty());
        assert!(entry.remove_client(&ClientId::BGPD).is_some());
        assert!(entry.is_empty());
        assert!(entry.best().is_none());
    }

    #[test]
    fn test_state_serde_shape() {
        let mut entry = RouteEntry::new("10.0.0.0/24".parse().unwrap());
        entry.set_state(RouteState::Resolved(ForwardInfo::drop(
            ClientId::STATIC_ROUTE,
            AdminDistance::STATIC_ROUTE,
        )));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["state"]["state"], "resolved");
        assert_eq!(json["state"]["forward"]["action"], "drop");
        assert_eq!(json["key"], "10.0.0.0/24");
    }
}
