//! The aggregate state tree.

use crate::acl::AclEntry;
use crate::interface::Interface;
use crate::map::NodeMap;
use crate::node::{Node, NodeFields};
use crate::port::Port;
use crate::route::{LabelEntry, RouteEntry};
use crate::settings::SwitchSettings;
use crate::transceiver::Transceiver;
use crate::vlan::Vlan;
use crate::{InterfaceId, PortId, VrfId};
use std::collections::BTreeMap;
use std::sync::Arc;
use swagent_types::{IpAddress, IpPrefix, MplsLabel, VlanId};

pub type PortMap = NodeMap<PortId, Port>;
pub type VlanMap = NodeMap<VlanId, Vlan>;
pub type InterfaceMap = NodeMap<InterfaceId, Interface>;
pub type AclMap = NodeMap<String, AclEntry>;
pub type RouteTable = NodeMap<IpPrefix, RouteEntry>;
pub type LabelFib = NodeMap<MplsLabel, LabelEntry>;
pub type TransceiverMap = NodeMap<PortId, Transceiver>;

/// Root fields. Each collection is its own node so that two trees share any
/// collection neither of them touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeFields {
    pub ports: Arc<Node<PortMap>>,
    pub vlans: Arc<Node<VlanMap>>,
    pub interfaces: Arc<Node<InterfaceMap>>,
    pub acls: Arc<Node<AclMap>>,
    pub fibs: BTreeMap<VrfId, Arc<Node<RouteTable>>>,
    pub label_fib: Arc<Node<LabelFib>>,
    pub transceivers: Arc<Node<TransceiverMap>>,
    pub switch_settings: Arc<Node<SwitchSettings>>,
}

impl NodeFields for TreeFields {
    fn publish_children(&self) {
        self.ports.publish();
        self.vlans.publish();
        self.interfaces.publish();
        self.acls.publish();
        for table in self.fibs.values() {
            table.publish();
        }
        self.label_fib.publish();
        self.transceivers.publish();
        self.switch_settings.publish();
    }
}

/// One version of the switch state.
///
/// Cloning a tree is a pointer copy. Mutating accessors clone the path from
/// the root to the touched collection and leave the rest shared.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTree {
    root: Arc<Node<TreeFields>>,
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTree {
    /// Empty tree holding only the (empty) default VRF route table.
    pub fn new() -> Self {
        let mut fields = TreeFields::default();
        fields
            .fibs
            .insert(VrfId::DEFAULT, Arc::new(Node::new(RouteTable::new())));
        Self {
            root: Arc::new(Node::new(fields)),
        }
    }

    pub fn from_fields(fields: TreeFields) -> Self {
        Self {
            root: Arc::new(Node::new(fields)),
        }
    }

    pub fn fields(&self) -> &TreeFields {
        self.root.fields()
    }

    pub fn is_published(&self) -> bool {
        self.root.is_published()
    }

    pub fn generation(&self) -> u64 {
        self.root.generation()
    }

    /// Seals the tree; it can no longer be changed in place.
    pub fn publish(&self) {
        self.root.publish();
    }

    /// True if both handles point at the same root node.
    pub fn ptr_eq(&self, other: &StateTree) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    /// Takes every collection from `other` while staying on this tree's
    /// generation line.
    pub fn replace_with(&mut self, other: &StateTree) {
        *self.root_mut() = other.fields().clone();
    }

    fn root_mut(&mut self) -> &mut TreeFields {
        Node::modify(&mut self.root)
    }

    pub fn ports(&self) -> &PortMap {
        self.fields().ports.fields()
    }

    pub fn ports_mut(&mut self) -> &mut PortMap {
        Node::modify(&mut self.root_mut().ports)
    }

    pub fn vlans(&self) -> &VlanMap {
        self.fields().vlans.fields()
    }

    pub fn vlans_mut(&mut self) -> &mut VlanMap {
        Node::modify(&mut self.root_mut().vlans)
    }

    pub fn interfaces(&self) -> &InterfaceMap {
        self.fields().interfaces.fields()
    }

    pub fn interfaces_mut(&mut self) -> &mut InterfaceMap {
        Node::modify(&mut self.root_mut().interfaces)
    }

    pub fn acls(&self) -> &AclMap {
        self.fields().acls.fields()
    }

    pub fn acls_mut(&mut self) -> &mut AclMap {
        Node::modify(&mut self.root_mut().acls)
    }

    pub fn route_table(&self, vrf: VrfId) -> Option<&RouteTable> {
        self.fields().fibs.get(&vrf).map(|table| table.fields())
    }

    /// Route table of `vrf`, created empty if the VRF has none yet.
    pub fn route_table_mut(&mut self, vrf: VrfId) -> &mut RouteTable {
        let slot = self
            .root_mut()
            .fibs
            .entry(vrf)
            .or_insert_with(|| Arc::new(Node::new(RouteTable::new())));
        Node::modify(slot)
    }

    /// Drops the route table of a non-default VRF. The default VRF table is
    /// permanent; returns false for it or for a VRF without a table.
    pub fn remove_route_table(&mut self, vrf: VrfId) -> bool {
        if vrf.is_default() || !self.fields().fibs.contains_key(&vrf) {
            return false;
        }
        self.root_mut().fibs.remove(&vrf).is_some()
    }

    pub fn vrfs(&self) -> impl Iterator<Item = VrfId> + '_ {
        self.fields().fibs.keys().copied()
    }

    pub fn label_fib(&self) -> &LabelFib {
        self.fields().label_fib.fields()
    }

    pub fn label_fib_mut(&mut self) -> &mut LabelFib {
        Node::modify(&mut self.root_mut().label_fib)
    }

    pub fn transceivers(&self) -> &TransceiverMap {
        self.fields().transceivers.fields()
    }

    pub fn transceivers_mut(&mut self) -> &mut TransceiverMap {
        Node::modify(&mut self.root_mut().transceivers)
    }

    pub fn switch_settings(&self) -> &SwitchSettings {
        self.fields().switch_settings.fields()
    }

    pub fn switch_settings_mut(&mut self) -> &mut SwitchSettings {
        Node::modify(&mut self.root_mut().switch_settings)
    }

    /// Interfaces bound to `vrf`, in id order.
    pub fn interfaces_in_vrf(&self, vrf: VrfId) -> impl Iterator<Item = &Interface> + '_ {
        self.interfaces().values().filter(move |intf| intf.vrf == vrf)
    }

    /// Interface of `vrf` whose connected subnet contains `addr`, with that
    /// subnet. The longest subnet wins across interfaces.
    pub fn connected_interface(&self, vrf: VrfId, addr: &IpAddress) -> Option<(&Interface, IpPrefix)> {
        self.interfaces_in_vrf(vrf)
            .filter_map(|intf| intf.subnet_containing(addr).map(|subnet| (intf, subnet)))
            .max_by_key(|(_, subnet)| subnet.prefix_len())
    }

    /// Interface of `vrf` that owns `addr` as one of its own addresses.
    pub fn interface_with_address(&self, vrf: VrfId, addr: &IpAddress) -> Option<&Interface> {
        self.interfaces_in_vrf(vrf).find(|intf| intf.has_address(addr))
    }

    /// Replaces the route at (`vrf`, `prefix`) with whatever `from` holds
    /// there, removing it if `from` has none.
    pub fn restore_route(&mut self, from: &StateTree, vrf: VrfId, prefix: &IpPrefix) {
        let previous = from
            .fields()
            .fibs
            .get(&vrf)
            .and_then(|table| table.fields().get_arc(prefix))
            .cloned();
        match previous {
            Some(entry) => {
                self.route_table_mut(vrf).insert_arc(*prefix, entry);
            }
            None => {
                if self
                    .route_table(vrf)
                    .is_some_and(|table| table.contains_key(prefix))
                {
                    self.route_table_mut(vrf).remove(prefix);
                }
            }
        }
    }

    /// Label counterpart of [`restore_route`](StateTree::restore_route).
    pub fn restore_label(&mut self, from: &StateTree, label: MplsLabel) {
        match from.label_fib().get_arc(&label).cloned() {
            Some(entry) => {
                self.label_fib_mut().insert_arc(label, entry);
            }
            None => {
                if self.label_fib().contains_key(&label) {
                    self.label_fib_mut().remove(&label);
                }
            }
        }
    }
}
