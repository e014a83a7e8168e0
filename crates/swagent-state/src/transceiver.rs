//! Transceiver presence records, keyed by the port they sit in.

use crate::PortId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transceiver {
    pub port: PortId,
    #[serde(default)]
    pub present: bool,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub part_number: Option<String>,
}
