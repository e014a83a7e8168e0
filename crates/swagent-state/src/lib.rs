//! Versioned switch state for the agent control plane.
//!
//! The state is a tree of copy-on-write [`Node`]s rooted at [`StateTree`].
//! A committed tree is published and never changes again; writers clone the
//! path from the root to whatever they touch and leave every other collection
//! shared with the previous version. [`StateDelta`] compares two trees and is
//! what hardware programming and observers consume.

mod delta;
mod error;
mod ids;
mod map;
mod node;
mod snapshot;
mod tree;

pub mod acl;
pub mod interface;
pub mod port;
pub mod route;
pub mod settings;
pub mod transceiver;
pub mod vlan;

pub use delta::{DeltaEntry, FibChange, ForwardChange, LabelChange, MapDelta, StateDelta};
pub use error::{Result, StateError};
pub use ids::{InterfaceId, PortId, VrfId};
pub use map::NodeMap;
pub use node::{Node, NodeFields};
pub use snapshot::PersistedState;
pub use tree::{
    AclMap, InterfaceMap, LabelFib, PortMap, RouteTable, StateTree, TransceiverMap, TreeFields,
    VlanMap,
};
