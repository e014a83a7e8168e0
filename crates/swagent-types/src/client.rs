//! Route announcement sources and their preference.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an independent producer of routes or labels.
///
/// Ordering matters: when two clients announce the same prefix with equal
/// admin distance, the lower id wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u16);

impl ClientId {
    pub const BGPD: ClientId = ClientId(0);
    pub const INTERFACE_ROUTE: ClientId = ClientId(1);
    pub const LINKLOCAL_ROUTE: ClientId = ClientId(2);
    pub const STATIC_ROUTE: ClientId = ClientId(3);
    pub const STATIC_INTERNAL: ClientId = ClientId(700);
    pub const OPENR: ClientId = ClientId(786);

    pub const fn new(id: u16) -> Self {
        ClientId(id)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Admin distance used when a route from this client does not carry one.
    pub const fn default_admin_distance(&self) -> AdminDistance {
        match *self {
            ClientId::INTERFACE_ROUTE | ClientId::LINKLOCAL_ROUTE => {
                AdminDistance::DIRECTLY_CONNECTED
            }
            ClientId::STATIC_ROUTE | ClientId::STATIC_INTERNAL => AdminDistance::STATIC_ROUTE,
            ClientId::OPENR => AdminDistance::OPENR,
            ClientId::BGPD => AdminDistance::EBGP,
            _ => AdminDistance::MAX,
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u16> for ClientId {
    fn from(id: u16) -> Self {
        ClientId(id)
    }
}

/// Preference of a route source; lower is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminDistance(u8);

impl AdminDistance {
    pub const DIRECTLY_CONNECTED: AdminDistance = AdminDistance(0);
    pub const STATIC_ROUTE: AdminDistance = AdminDistance(1);
    pub const OPENR: AdminDistance = AdminDistance(10);
    pub const EBGP: AdminDistance = AdminDistance(20);
    pub const IBGP: AdminDistance = AdminDistance(200);
    pub const MAX: AdminDistance = AdminDistance(255);

    pub const fn new(value: u8) -> Self {
        AdminDistance(value)
    }

    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for AdminDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u8> for AdminDistance {
    fn from(value: u8) -> Self {
        AdminDistance(value)
    }
}
