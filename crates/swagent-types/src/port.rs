//! Port administrative and operational state.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Administrative state of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    #[default]
    Down,
    Up,
}

impl AdminState {
    pub const fn is_up(&self) -> bool {
        matches!(self, AdminState::Up)
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdminState::Up => "up",
            AdminState::Down => "down",
        })
    }
}

impl FromStr for AdminState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" | "enabled" => Ok(AdminState::Up),
            "down" | "disabled" => Ok(AdminState::Down),
            _ => Err(ParseError::InvalidPortState(s.to_string())),
        }
    }
}

/// Operational (link) state of a port as reported by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperState {
    #[default]
    Down,
    Up,
    Unknown,
}

impl OperState {
    pub const fn is_up(&self) -> bool {
        matches!(self, OperState::Up)
    }
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperState::Up => "up",
            OperState::Down => "down",
            OperState::Unknown => "unknown",
        })
    }
}

impl FromStr for OperState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(OperState::Up),
            "down" => Ok(OperState::Down),
            "unknown" => Ok(OperState::Unknown),
            _ => Err(ParseError::InvalidPortState(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_state_parse() {
        assert_eq!("UP".parse::<AdminState>().unwrap(), AdminState::Up);
        assert_eq!("disabled".parse::<AdminState>().unwrap(), AdminState::Down);
        assert!("sideways".parse::<AdminState>().is_err());
        assert!(!AdminState::default().is_up());
    }

    #[test]
    fn test_oper_state_display() {
        assert_eq!(OperState::Unknown.to_string(), "unknown");
        assert!(OperState::Up.is_up());
    }
}
