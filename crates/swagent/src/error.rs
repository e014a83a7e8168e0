//! Agent error type.

use crate::hw::FibUpdateError;
use std::path::PathBuf;
use swagent_state::{StateError, VrfId};
use swagent_types::IpAddress;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Malformed or contradictory input. Nothing was changed.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("next hop {address} is not reachable through any connected interface in {vrf}")]
    UnresolvedNextHop { vrf: VrfId, address: IpAddress },

    /// Some entries could not be programmed; the committed state reflects
    /// what the hardware holds.
    #[error("hardware programming failed: {0}")]
    HardwareProgram(FibUpdateError),

    #[error("fatal hardware error: {0}")]
    HardwareFatal(String),

    #[error("switch is not configured yet: {0}")]
    ConfigurationNotReady(String),

    #[error("state update queue is closed")]
    QueueClosed,

    #[error("failed to load config {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error(transparent)]
    State(#[from] StateError),
}

impl AgentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AgentError::Validation(msg.into())
    }
}
