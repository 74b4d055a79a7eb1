//! Chaincode identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::ChaincodeError;

/// Identity under which a chaincode is launched, registered and invoked.
///
/// Displayed as `name:version`. Parsing splits on the last `:` so names may
/// themselves contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChaincodeKey {
    name: String,
    version: String,
}

impl ChaincodeKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for ChaincodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

impl FromStr for ChaincodeKey {
    type Err = ChaincodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(name, version))
            }
            _ => Err(ChaincodeError::Protocol(format!(
                "invalid chaincode id '{}', expected name:version",
                s
            ))),
        }
    }
}

impl Serialize for ChaincodeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChaincodeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_name_and_version() {
        assert_eq!(ChaincodeKey::new("cc1", "v1").to_string(), "cc1:v1");
    }

    #[test]
    fn parse_splits_on_last_colon() {
        let key: ChaincodeKey = "org:cc1:v1".parse().unwrap();
        assert_eq!(key.name(), "org:cc1");
        assert_eq!(key.version(), "v1");
    }

    #[test]
    fn parse_rejects_missing_version() {
        assert!("cc1".parse::<ChaincodeKey>().is_err());
        assert!("cc1:".parse::<ChaincodeKey>().is_err());
    }
}
