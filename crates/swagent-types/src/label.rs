//! MPLS label values.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A label as announced by a client.
///
/// Values are carried as announced; anything above [`MplsLabel::MAX`] is a
/// structurally invalid label that validation must reject before it reaches
/// the label FIB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MplsLabel(u32);

impl MplsLabel {
    /// Largest value that fits the 20-bit label field.
    pub const MAX: u32 = (1 << 20) - 1;

    pub const fn new(value: u32) -> Self {
        MplsLabel(value)
    }

    /// # Errors
    ///
    /// Returns an error if `value` does not fit in 20 bits.
    pub fn checked(value: u32) -> Result<Self, ParseError> {
        let label = MplsLabel(value);
        if label.is_valid() {
            Ok(label)
        } else {
            Err(ParseError::InvalidLabel(value.to_string()))
        }
    }

    pub const fn value(&self) -> u32 {
        self.0
    }

    pub const fn is_valid(&self) -> bool {
        self.0 <= Self::MAX
    }
}

impl fmt::Display for MplsLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MplsLabel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .parse()
            .map_err(|_| ParseError::InvalidLabel(s.to_string()))?;
        MplsLabel::checked(value)
    }
}

impl From<u32> for MplsLabel {
    fn from(value: u32) -> Self {
        MplsLabel(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_label() {
        assert_eq!(MplsLabel::MAX, 1_048_575);
        assert!(MplsLabel::new(1_048_575).is_valid());
        assert!(!MplsLabel::new(1_048_576).is_valid());
        assert!(MplsLabel::checked(1_048_576).is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("100".parse::<MplsLabel>().unwrap().value(), 100);
        assert!("2000000".parse::<MplsLabel>().is_err());
        assert!("abc".parse::<MplsLabel>().is_err());
    }
}
