//! Identifier newtypes for state collections.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(id: u32) -> Self {
                $name(id)
            }

            pub const fn as_u32(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(id: u32) -> Self {
                $name(id)
            }
        }
    };
}

id_type!(
    /// Front panel or logical port.
    PortId,
    "port"
);
id_type!(
    /// Routed (layer 3) interface.
    InterfaceId,
    "intf"
);
id_type!(
    /// Virtual routing and forwarding instance. VRF 0 is the default VRF.
    VrfId,
    "vrf"
);

impl VrfId {
    pub const DEFAULT: VrfId = VrfId(0);

    pub const fn is_default(&self) -> bool {
        self.0 == 0
    }
}
