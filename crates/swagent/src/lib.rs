//! swagent - switch agent control plane
//!
//! Routing clients push unicast and MPLS routes into the agent. The agent
//! resolves them into forwarding entries and programs the hardware in
//! ordered transactions over an immutable, versioned state tree.
//!
//! # Architecture
//!
//! ```text
//! [clients] ──> [SwitchHandler] ──> [UpdateQueue] ──> [Worker]
//!                     │                                  │
//!                     │ reads                  validate / program / commit
//!                     ↓                                  ↓
//!              [current StateTree] <── publish ── [HardwareSync]
//!                                                        │
//!                                                 [StateObserver]s
//! ```
//!
//! # Key Components
//!
//! - [`handler::SwitchHandler`]: client-facing route, label and settings API
//! - [`coordinator::TransactionCoordinator`]: serialized update queue and
//!   the transaction pipeline
//! - [`route::RouteEngine`]: per-VRF route selection and recursive resolution
//! - [`hw::HardwareSync`]: the seam to the forwarding hardware
//! - [`observer`]: subscribers reacting to committed state changes
//!
//! # Feature Flags
//!
//! - `full` (default): everything below
//! - `mod-mpls`: label FIB and the MPLS client API
//! - `mod-acl-nexthop`: ACL redirect next-hop tracking

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod hw;
#[cfg(feature = "mod-mpls")]
pub mod mpls;
pub mod observer;
pub mod route;

pub use config::AgentConfig;
pub use coordinator::{TransactionCoordinator, TransactionOutcome, TransactionState, UpdateMode, UpdateQueue};
pub use error::{AgentError, Result};
pub use handler::{InterfaceDetail, RouteDetails, SwitchHandler, UnicastRouteInfo};
pub use hw::{FibUpdateError, HardwareSync, HwSyncError, SimulatedAsic};
#[cfg(feature = "mod-mpls")]
pub use handler::LabelDetails;
#[cfg(feature = "mod-mpls")]
pub use mpls::{LabelEngine, MplsRoute};
pub use observer::{ObserverRegistry, StateObserver};
pub use route::{RouteEngine, RouteEngineConfig, UnicastRoute};

pub use swagent_state::{PersistedState, StateDelta, StateTree, VrfId};
pub use swagent_types::{AdminDistance, ClientId, IpAddress, IpPrefix, MplsLabel};
