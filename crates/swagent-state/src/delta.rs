//! Differences between two state trees.
//!
//! Nothing is computed up front: each accessor walks the two versions of one
//! collection in key order when iterated. Collections (and entries) that are
//! the same allocation in both trees are skipped without being compared.

use crate::acl::AclEntry;
use crate::interface::Interface;
use crate::map::NodeMap;
use crate::port::Port;
use crate::route::{ForwardInfo, LabelEntry, RouteEntry};
use crate::settings::SwitchSettings;
use crate::transceiver::Transceiver;
use crate::tree::StateTree;
use crate::vlan::Vlan;
use crate::{InterfaceId, PortId, VrfId};
use std::cmp::Ordering;
use std::collections::{btree_map, BTreeSet};
use std::iter::Peekable;
use std::sync::Arc;
use swagent_types::{IpPrefix, MplsLabel, VlanId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEntry<'a, K, V> {
    Added(&'a K, &'a V),
    Removed(&'a K, &'a V),
    Changed { key: &'a K, old: &'a V, new: &'a V },
}

impl<'a, K, V> DeltaEntry<'a, K, V> {
    pub fn key(&self) -> &'a K {
        match self {
            DeltaEntry::Added(key, _) | DeltaEntry::Removed(key, _) => key,
            DeltaEntry::Changed { key, .. } => key,
        }
    }

    pub fn old_value(&self) -> Option<&'a V> {
        match self {
            DeltaEntry::Added(..) => None,
            DeltaEntry::Removed(_, old) | DeltaEntry::Changed { old, .. } => Some(old),
        }
    }

    pub fn new_value(&self) -> Option<&'a V> {
        match self {
            DeltaEntry::Removed(..) => None,
            DeltaEntry::Added(_, new) | DeltaEntry::Changed { new, .. } => Some(new),
        }
    }
}

/// Delta of one keyed collection.
pub struct MapDelta<'a, K, V> {
    old: Option<&'a NodeMap<K, V>>,
    new: Option<&'a NodeMap<K, V>>,
}

impl<'a, K, V> Clone for MapDelta<'a, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, K, V> Copy for MapDelta<'a, K, V> {}

impl<'a, K: Ord, V: PartialEq> MapDelta<'a, K, V> {
    /// Either side may be absent, e.g. a VRF table that exists in only one
    /// tree.
    pub fn new(old: Option<&'a NodeMap<K, V>>, new: Option<&'a NodeMap<K, V>>) -> Self {
        match (old, new) {
            (Some(o), Some(n)) if std::ptr::eq(o, n) => Self {
                old: None,
                new: None,
            },
            _ => Self { old, new },
        }
    }

    pub fn iter(&self) -> MapDeltaIter<'a, K, V> {
        MapDeltaIter {
            old: self.old.map(|m| m.arc_iter().peekable()),
            new: self.new.map(|m| m.arc_iter().peekable()),
        }
    }

    pub fn added(&self) -> impl Iterator<Item = (&'a K, &'a V)> {
        self.iter().filter_map(|entry| match entry {
            DeltaEntry::Added(key, value) => Some((key, value)),
            _ => None,
        })
    }

    pub fn removed(&self) -> impl Iterator<Item = (&'a K, &'a V)> {
        self.iter().filter_map(|entry| match entry {
            DeltaEntry::Removed(key, value) => Some((key, value)),
            _ => None,
        })
    }

    pub fn changed(&self) -> impl Iterator<Item = (&'a K, &'a V, &'a V)> {
        self.iter().filter_map(|entry| match entry {
            DeltaEntry::Changed { key, old, new } => Some((key, old, new)),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Merge-join over two ordered collections.
pub struct MapDeltaIter<'a, K, V> {
    old: Option<Peekable<btree_map::Iter<'a, K, Arc<V>>>>,
    new: Option<Peekable<btree_map::Iter<'a, K, Arc<V>>>>,
}

impl<'a, K: Ord, V: PartialEq> Iterator for MapDeltaIter<'a, K, V> {
    type Item = DeltaEntry<'a, K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let order = match (
                self.old.as_mut().and_then(Peekable::peek),
                self.new.as_mut().and_then(Peekable::peek),
            ) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((old_key, _)), Some((new_key, _))) => old_key.cmp(new_key),
            };

            match order {
                Ordering::Less => {
                    let (key, value) = self.old.as_mut()?.next()?;
                    return Some(DeltaEntry::Removed(key, &**value));
                }
                Ordering::Greater => {
                    let (key, value) = self.new.as_mut()?.next()?;
                    return Some(DeltaEntry::Added(key, &**value));
                }
                Ordering::Equal => {
                    let (key, old) = self.old.as_mut()?.next()?;
                    let (_, new) = self.new.as_mut()?.next()?;
                    if Arc::ptr_eq(old, new) || old == new {
                        continue;
                    }
                    return Some(DeltaEntry::Changed {
                        key,
                        old: &**old,
                        new: &**new,
                    });
                }
            }
        }
    }
}

/// Hardware-level change to one forwarding entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardChange<'a> {
    Add(&'a ForwardInfo),
    Update {
        old: &'a ForwardInfo,
        new: &'a ForwardInfo,
    },
    Remove(&'a ForwardInfo),
}

impl<'a> ForwardChange<'a> {
    fn between(old: Option<&'a ForwardInfo>, new: Option<&'a ForwardInfo>) -> Option<Self> {
        match (old, new) {
            (None, None) => None,
            (None, Some(new)) => Some(ForwardChange::Add(new)),
            (Some(old), None) => Some(ForwardChange::Remove(old)),
            (Some(old), Some(new)) if old == new => None,
            (Some(old), Some(new)) => Some(ForwardChange::Update { old, new }),
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, ForwardChange::Remove(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibChange<'a> {
    pub vrf: VrfId,
    pub prefix: IpPrefix,
    pub change: ForwardChange<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelChange<'a> {
    pub label: MplsLabel,
    pub change: ForwardChange<'a>,
}

/// Comparison of an old and a new tree.
#[derive(Debug, Clone)]
pub struct StateDelta {
    old: StateTree,
    new: StateTree,
}

impl StateDelta {
    pub fn new(old: &StateTree, new: &StateTree) -> Self {
        Self {
            old: old.clone(),
            new: new.clone(),
        }
    }

    pub fn old_state(&self) -> &StateTree {
        &self.old
    }

    pub fn new_state(&self) -> &StateTree {
        &self.new
    }

    pub fn ports(&self) -> MapDelta<'_, PortId, Port> {
        MapDelta::new(Some(self.old.ports()), Some(self.new.ports()))
    }

    pub fn vlans(&self) -> MapDelta<'_, VlanId, Vlan> {
        MapDelta::new(Some(self.old.vlans()), Some(self.new.vlans()))
    }

    pub fn interfaces(&self) -> MapDelta<'_, InterfaceId, Interface> {
        MapDelta::new(Some(self.old.interfaces()), Some(self.new.interfaces()))
    }

    pub fn acls(&self) -> MapDelta<'_, String, AclEntry> {
        MapDelta::new(Some(self.old.acls()), Some(self.new.acls()))
    }

    pub fn route_table(&self, vrf: VrfId) -> MapDelta<'_, IpPrefix, RouteEntry> {
        MapDelta::new(self.old.route_table(vrf), self.new.route_table(vrf))
    }

    /// Per-VRF route deltas for every VRF present in either tree whose table
    /// differs.
    pub fn fibs(&self) -> impl Iterator<Item = (VrfId, MapDelta<'_, IpPrefix, RouteEntry>)> + '_ {
        let vrfs: BTreeSet<VrfId> = self.old.vrfs().chain(self.new.vrfs()).collect();
        vrfs.into_iter()
            .map(move |vrf| (vrf, self.route_table(vrf)))
            .filter(|(_, delta)| !delta.is_empty())
    }

    /// Whether a VRF route table exists in only one of the trees, including
    /// an empty one.
    pub fn vrf_tables_changed(&self) -> bool {
        !self.old.vrfs().eq(self.new.vrfs())
    }

    pub fn label_fib(&self) -> MapDelta<'_, MplsLabel, LabelEntry> {
        MapDelta::new(Some(self.old.label_fib()), Some(self.new.label_fib()))
    }

    pub fn transceivers(&self) -> MapDelta<'_, PortId, Transceiver> {
        MapDelta::new(Some(self.old.transceivers()), Some(self.new.transceivers()))
    }

    /// Old and new settings, if they differ.
    pub fn switch_settings(&self) -> Option<(&SwitchSettings, &SwitchSettings)> {
        let old = &self.old.fields().switch_settings;
        let new = &self.new.fields().switch_settings;
        if Arc::ptr_eq(old, new) || old == new {
            None
        } else {
            Some((old.fields(), new.fields()))
        }
    }

    pub fn is_empty(&self) -> bool {
        if self.old.ptr_eq(&self.new) {
            return true;
        }
        self.ports().is_empty()
            && self.vlans().is_empty()
            && self.interfaces().is_empty()
            && self.acls().is_empty()
            && self.fibs().next().is_none()
            && !self.vrf_tables_changed()
            && self.label_fib().is_empty()
            && self.transceivers().is_empty()
            && self.switch_settings().is_none()
    }

    /// Forwarding changes of every VRF, derived from resolved state only.
    /// Entries whose client contributions changed without changing the
    /// forwarding outcome produce nothing.
    pub fn fib_changes(&self) -> Vec<FibChange<'_>> {
        let mut changes = Vec::new();
        for (vrf, delta) in self.fibs() {
            for entry in delta.iter() {
                let old = entry.old_value().and_then(RouteEntry::forward_info);
                let new = entry.new_value().and_then(RouteEntry::forward_info);
                if let Some(change) = ForwardChange::between(old, new) {
                    changes.push(FibChange {
                        vrf,
                        prefix: *entry.key(),
                        change,
                    });
                }
            }
        }
        changes
    }

    pub fn label_changes(&self) -> Vec<LabelChange<'_>> {
        self.label_fib()
            .iter()
            .filter_map(|entry| {
                let old = entry.old_value().and_then(LabelEntry::forward_info);
                let new = entry.new_value().and_then(LabelEntry::forward_info);
                ForwardChange::between(old, new).map(|change| LabelChange {
                    label: *entry.key(),
                    change,
                })
            })
            .collect()
    }

    /// True when nothing needs to be written to hardware.
    pub fn is_forwarding_noop(&self) -> bool {
        self.fib_changes().is_empty() && self.label_changes().is_empty()
    }
}
