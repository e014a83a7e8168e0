//! Persisted snapshot of the state tree, used for warm boot.
//!
//! The document is plain JSON with one field per collection. Collections
//! missing from the file load empty and unknown fields are ignored, so older
//! snapshots keep loading. Every map is ordered, which makes a
//! load-then-save cycle reproduce the file byte for byte.

use crate::error::{Result, StateError};
use crate::node::Node;
use crate::settings::SwitchSettings;
use crate::tree::{
    AclMap, InterfaceMap, LabelFib, PortMap, RouteTable, StateTree, TransceiverMap, TreeFields,
    VlanMap,
};
use crate::VrfId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub version: u32,
    /// RFC 3339 UTC timestamp of the save.
    pub saved_at: String,
    pub ports: PortMap,
    pub vlans: VlanMap,
    pub interfaces: InterfaceMap,
    pub acls: AclMap,
    pub fibs: BTreeMap<VrfId, RouteTable>,
    pub label_fib: LabelFib,
    pub transceivers: TransceiverMap,
    pub switch_settings: SwitchSettings,
}

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: u32,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            saved_at: String::new(),
            ports: PortMap::new(),
            vlans: VlanMap::new(),
            interfaces: InterfaceMap::new(),
            acls: AclMap::new(),
            fibs: BTreeMap::new(),
            label_fib: LabelFib::new(),
            transceivers: TransceiverMap::new(),
            switch_settings: SwitchSettings::default(),
        }
    }
}

impl PersistedState {
    pub const CURRENT_VERSION: u32 = 1;

    /// Captures `tree`, stamped with the current time.
    pub fn capture(tree: &StateTree) -> Self {
        let fields = tree.fields();
        Self {
            version: Self::CURRENT_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            ports: fields.ports.fields().clone(),
            vlans: fields.vlans.fields().clone(),
            interfaces: fields.interfaces.fields().clone(),
            acls: fields.acls.fields().clone(),
            fibs: fields
                .fibs
                .iter()
                .map(|(vrf, table)| (*vrf, table.fields().clone()))
                .collect(),
            label_fib: fields.label_fib.fields().clone(),
            transceivers: fields.transceivers.fields().clone(),
            switch_settings: fields.switch_settings.fields().clone(),
        }
    }

    /// Rebuilds an unpublished tree. The default VRF table always exists in
    /// the result.
    pub fn into_tree(self) -> StateTree {
        let mut fibs: BTreeMap<VrfId, Arc<Node<RouteTable>>> = self
            .fibs
            .into_iter()
            .map(|(vrf, table)| (vrf, Arc::new(Node::new(table))))
            .collect();
        fibs.entry(VrfId::DEFAULT)
            .or_insert_with(|| Arc::new(Node::new(RouteTable::new())));

        StateTree::from_fields(TreeFields {
            ports: Arc::new(Node::new(self.ports)),
            vlans: Arc::new(Node::new(self.vlans)),
            interfaces: Arc::new(Node::new(self.interfaces)),
            acls: Arc::new(Node::new(self.acls)),
            fibs,
            label_fib: Arc::new(Node::new(self.label_fib)),
            transceivers: Arc::new(Node::new(self.transceivers)),
            switch_settings: Arc::new(Node::new(self.switch_settings)),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Fails on malformed JSON or on a version newer than
    /// [`CURRENT_VERSION`](PersistedState::CURRENT_VERSION).
    pub fn from_json(json: &str) -> Result<Self> {
        let header: VersionHeader = serde_json::from_str(json)?;
        if header.version > Self::CURRENT_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: header.version,
                supported: Self::CURRENT_VERSION,
            });
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| StateError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = self.to_json()?;
        fs::write(path, json).map_err(io_err)?;
        log::info!("saved state snapshot to {}", path.display());
        Ok(())
    }

    /// Loads a snapshot; `Ok(None)` if the file does not exist (cold boot).
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            log::info!("no state snapshot at {}, cold boot", path.display());
            return Ok(None);
        }
        let json = fs::read_to_string(path).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state = Self::from_json(&json)?;
        log::info!(
            "loaded state snapshot from {} (saved at {})",
            path.display(),
            state.saved_at
        );
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::Interface;
    use crate::port::Port;
    use crate::route::{ForwardInfo, LabelAction, LabelEntry, NextHop, NextHopEntry, RouteEntry, RouteState};
    use crate::settings::BlockedNeighbor;
    use crate::{InterfaceId, PortId};
    use pretty_assertions::assert_eq;
    use swagent_types::{AdminDistance, ClientId, MplsLabel, VlanId};

    fn sample_tree() -> StateTree {
        let mut tree = StateTree::new();
        tree.ports_mut()
            .insert(PortId::new(1), Port::new(PortId::new(1), "eth1/1/1"));
        tree.interfaces_mut().insert(
            InterfaceId::new(1),
            Interface::new(InterfaceId::new(1), "eth0", VrfId::DEFAULT)
                .with_address("10.0.0.1".parse().unwrap(), 24),
        );

        let via = NextHop::new("10.0.0.2".parse().unwrap()).with_interface(InterfaceId::new(1));
        let mut route = RouteEntry::new("192.168.0.0/16".parse().unwrap()).with_client(
            ClientId::BGPD,
            NextHopEntry::new([via.clone()], AdminDistance::EBGP),
        );
        route.set_state(RouteState::Resolved(ForwardInfo {
            client: ClientId::BGPD,
            admin_distance: AdminDistance::EBGP,
            action: crate::route::ForwardAction::NextHops,
            next_hops: [via.clone()].into_iter().collect(),
            counter_id: None,
        }));
        tree.route_table_mut(VrfId::DEFAULT)
            .insert(*route.prefix(), route);
        tree.route_table_mut(VrfId::new(4));

        let label = LabelEntry::new(MplsLabel::new(100)).with_client(
            ClientId::OPENR,
            NextHopEntry::new(
                [via.with_label_action(LabelAction::Swap(MplsLabel::new(200)))],
                AdminDistance::OPENR,
            ),
        );
        tree.label_fib_mut().insert(MplsLabel::new(100), label);

        tree.switch_settings_mut()
            .blocked_neighbors
            .insert(BlockedNeighbor {
                vlan: VlanId::new(10).unwrap(),
                address: "10.0.0.99".parse().unwrap(),
            });
        tree
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let first = PersistedState::capture(&sample_tree()).to_json().unwrap();
        let second = PersistedState::from_json(&first).unwrap().to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_into_tree_restores_collections() {
        let tree = sample_tree();
        let restored = PersistedState::capture(&tree).into_tree();
        assert_eq!(restored.ports(), tree.ports());
        assert_eq!(
            restored.route_table(VrfId::DEFAULT),
            tree.route_table(VrfId::DEFAULT)
        );
        assert!(restored.route_table(VrfId::new(4)).is_some());
        assert_eq!(restored.label_fib(), tree.label_fib());
        assert_eq!(restored.switch_settings(), tree.switch_settings());
    }

    #[test]
    fn test_missing_fields_default_and_unknown_ignored() {
        let state =
            PersistedState::from_json(r#"{"version": 1, "future_collection": {"a": 1}}"#).unwrap();
        assert!(state.ports.is_empty());
        let tree = state.into_tree();
        assert!(tree.route_table(VrfId::DEFAULT).is_some());
    }

    #[test]
    fn test_newer_version_rejected() {
        let err = PersistedState::from_json(r#"{"version": 99}"#).unwrap_err();
        assert!(matches!(
            err,
            StateError::UnsupportedVersion {
                found: 99,
                supported: 1
            }
        ));
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        assert!(matches!(
            PersistedState::from_json("{not json"),
            Err(StateError::Decode(_))
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warmboot").join("state.json");

        assert!(PersistedState::load(&path).unwrap().is_none());

        let state = PersistedState::capture(&sample_tree());
        state.save(&path).unwrap();
        let loaded = PersistedState::load(&path).unwrap().unwrap();
        assert_eq!(loaded, state);
    }
}
