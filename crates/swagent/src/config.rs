//! Agent configuration file.
//!
//! A JSON document describing the switch's ports, VLANs, routed interfaces
//! and ACLs, plus the tunables of the route engines. Every field is optional.

use crate::error::{AgentError, Result};
use crate::route::{RouteEngine, RouteEngineConfig, UnicastRoute};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use swagent_state::acl::AclEntry;
use swagent_state::interface::Interface;
use swagent_state::port::Port;
use swagent_state::route::NextHop;
use swagent_state::vlan::Vlan;
use swagent_state::{InterfaceId, StateTree, VrfId};
use swagent_types::{AdminDistance, ClientId, IpAddress, IpPrefix, MacAddress, ParseError, VlanId};

/// An interface address written as `address/length`, e.g. `10.0.0.1/24`.
/// Unlike a prefix, the host bits are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressConfig {
    pub address: IpAddress,
    pub prefix_len: u8,
}

impl TryFrom<String> for AddressConfig {
    type Error = ParseError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let invalid = || ParseError::InvalidIpPrefix(s.clone());
        let (addr, len) = s.rsplit_once('/').ok_or_else(invalid)?;
        let address: IpAddress = addr.parse()?;
        let prefix_len: u8 = len.parse().map_err(|_| invalid())?;
        if prefix_len > address.max_prefix_len() {
            return Err(invalid());
        }
        Ok(Self {
            address,
            prefix_len,
        })
    }
}

impl From<AddressConfig> for String {
    fn from(addr: AddressConfig) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for AddressConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub id: InterfaceId,
    pub name: String,
    #[serde(default)]
    pub vrf: VrfId,
    #[serde(default)]
    pub vlan: Option<VlanId>,
    #[serde(default)]
    pub mac: Option<MacAddress>,
    #[serde(default)]
    pub addresses: Vec<AddressConfig>,
}

impl InterfaceConfig {
    pub fn to_interface(&self) -> Interface {
        let mut intf = Interface::new(self.id, self.name.clone(), self.vrf);
        intf.vlan = self.vlan;
        intf.mac = self.mac;
        for addr in &self.addresses {
            intf = intf.with_address(addr.address, addr.prefix_len);
        }
        intf
    }

    /// Connected route for each of the interface's subnets.
    fn connected_routes(&self) -> impl Iterator<Item = UnicastRoute> + '_ {
        self.addresses.iter().filter_map(move |addr| {
            let subnet = IpPrefix::new(addr.address, addr.prefix_len).ok()?;
            let nh = NextHop::new(addr.address).with_interface(self.id);
            Some(UnicastRoute::new(subnet, [nh]).with_admin_distance(AdminDistance::DIRECTLY_CONNECTED))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Largest next-hop group the hardware accepts.
    pub max_ecmp_width: usize,
    /// Admin distance per client for routes that do not carry one.
    pub client_admin_distances: BTreeMap<ClientId, AdminDistance>,
    pub ports: Vec<Port>,
    pub vlans: Vec<Vlan>,
    pub interfaces: Vec<InterfaceConfig>,
    pub acls: Vec<AclEntry>,
    /// Changes to routes inside these prefixes are logged individually.
    pub route_update_tracked_prefixes: Vec<IpPrefix>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_ecmp_width: 64,
            client_admin_distances: BTreeMap::new(),
            ports: Vec::new(),
            vlans: Vec::new(),
            interfaces: Vec::new(),
            acls: Vec::new(),
            route_update_tracked_prefixes: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config_err = |reason: String| AgentError::Config {
            path: path.to_path_buf(),
            reason,
        };
        let json = fs::read_to_string(path).map_err(|e| config_err(e.to_string()))?;
        let config = Self::from_json(&json).map_err(|e| config_err(e.to_string()))?;
        if config.max_ecmp_width == 0 {
            return Err(config_err("max_ecmp_width must be at least 1".to_string()));
        }
        log::info!(
            "loaded config {}: {} ports, {} interfaces, {} acls",
            path.display(),
            config.ports.len(),
            config.interfaces.len(),
            config.acls.len()
        );
        Ok(config)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn engine_config(&self) -> RouteEngineConfig {
        RouteEngineConfig {
            max_ecmp_width: self.max_ecmp_width,
            client_admin_distances: self.client_admin_distances.clone(),
        }
    }

    /// `tree` with the configured collections installed and a connected
    /// route for every interface subnet.
    pub fn apply(&self, tree: &StateTree) -> StateTree {
        let mut tree = tree.clone();
        for port in &self.ports {
            tree.ports_mut().insert(port.id, port.clone());
        }
        for vlan in &self.vlans {
            tree.vlans_mut().insert(vlan.id, vlan.clone());
        }
        for acl in &self.acls {
            tree.acls_mut().insert(acl.name.clone(), acl.clone());
        }

        let mut connected: BTreeMap<VrfId, Vec<UnicastRoute>> = BTreeMap::new();
        for intf in &self.interfaces {
            tree.interfaces_mut().insert(intf.id, intf.to_interface());
            connected
                .entry(intf.vrf)
                .or_default()
                .extend(intf.connected_routes());
        }

        let engine = RouteEngine::new(self.engine_config());
        for (vrf, routes) in connected {
            engine.add_routes(&mut tree, vrf, ClientId::INTERFACE_ROUTE, routes);
        }
        engine.resolve_all(&mut tree);
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "max_ecmp_width": 8,
        "client_admin_distances": { "786": 9 },
        "ports": [ { "id": 1, "name": "eth1/1/1", "admin_state": "up" } ],
        "interfaces": [
            { "id": 1, "name": "eth0", "addresses": ["10.0.0.1/24", "2001:db8::1/64"] },
            { "id": 2, "name": "eth1", "vrf": 3, "addresses": ["10.0.0.1/24"] }
        ],
        "route_update_tracked_prefixes": ["10.0.0.0/8"]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = AgentConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.max_ecmp_width, 8);
        assert_eq!(
            config.client_admin_distances.get(&ClientId::OPENR),
            Some(&AdminDistance::new(9))
        );
        assert_eq!(config.interfaces[0].addresses[0].to_string(), "10.0.0.1/24");
        assert_eq!(config.interfaces[1].vrf, VrfId::new(3));
        assert!(config.vlans.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_json("{}").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.max_ecmp_width, 64);
    }

    #[test]
    fn test_bad_address_rejected() {
        let json = r#"{ "interfaces": [ { "id": 1, "name": "eth0", "addresses": ["10.0.0.1/40"] } ] }"#;
        assert!(AgentConfig::from_json(json).is_err());
        let json = r#"{ "interfaces": [ { "id": 1, "name": "eth0", "addresses": ["10.0.0.1"] } ] }"#;
        assert!(AgentConfig::from_json(json).is_err());
    }

    #[test]
    fn test_apply_installs_connected_routes() {
        let config = AgentConfig::from_json(SAMPLE).unwrap();
        let tree = config.apply(&StateTree::new());

        assert_eq!(tree.ports().len(), 1);
        assert_eq!(tree.interfaces().len(), 2);

        let table = tree.route_table(VrfId::DEFAULT).unwrap();
        let connected = table.get(&"10.0.0.0/24".parse().unwrap()).unwrap();
        let fwd = connected.forward_info().unwrap();
        assert_eq!(fwd.client, ClientId::INTERFACE_ROUTE);
        assert_eq!(fwd.admin_distance, AdminDistance::DIRECTLY_CONNECTED);
        assert!(table.contains_key(&"2001:db8::/64".parse().unwrap()));

        let vrf3 = tree.route_table(VrfId::new(3)).unwrap();
        assert!(vrf3.get(&"10.0.0.0/24".parse().unwrap()).unwrap().is_resolved());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, "{ not json").unwrap();
        match AgentConfig::load(&path) {
            Err(AgentError::Config { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result {:?}", other),
        }

        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(AgentConfig::load(&path).unwrap().max_ecmp_width, 8);
    }
}
